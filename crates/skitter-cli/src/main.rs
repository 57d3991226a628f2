//! skitter CLI
//!
//! Walks a directory tree through an io_uring completion queue and prints
//! every entry discovered, one name per line.

use clap::Parser;
use std::path::PathBuf;

/// skitter - concurrent directory-tree walker over io_uring
#[derive(Parser)]
#[command(name = "skitter")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory to walk
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Submission/completion queue depth
    #[arg(long, default_value_t = skitter_core::DEFAULT_RING_ENTRIES)]
    ring_entries: u32,

    /// Fail unless at least this many entries were discovered
    #[arg(long)]
    min_entries: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[cfg(target_os = "linux")]
fn main() -> anyhow::Result<()> {
    use anyhow::Context;
    use std::io::Write;

    use skitter_core::{KernelRing, WalkConfig, Walker};

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose { "debug" } else { "info" })
        .with_writer(std::io::stderr)
        .init();

    raise_open_file_limit();

    let mut ring =
        KernelRing::new(cli.ring_entries).context("creating the completion ring")?;

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    let report = Walker::new(&mut ring, WalkConfig::default(), &mut out)
        .walk(&cli.path)
        .context("walking the tree")?;
    out.flush()?;

    if report.unsupported {
        tracing::info!("directory reads unsupported by this kernel, nothing to walk");
        return Ok(());
    }

    tracing::debug!(
        entries = report.entries,
        directories = report.directories,
        elapsed_ms = report.duration.as_millis() as u64,
        "walk finished"
    );

    if let Some(min) = cli.min_entries {
        if report.entries < min {
            anyhow::bail!(
                "expected at least {min} entries, found {}",
                report.entries
            );
        }
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() -> anyhow::Result<()> {
    let _ = Cli::parse();
    anyhow::bail!("skitter requires Linux (io_uring)")
}

/// Raise the open-file soft limit to the hard limit. A deep, wide tree
/// keeps one descriptor per in-flight directory, so the default soft
/// limit of 1024 can be exhausted quickly.
#[cfg(target_os = "linux")]
fn raise_open_file_limit() {
    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit/setrlimit write and read only the struct we own.
    unsafe {
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) != 0 {
            tracing::warn!(
                error = %std::io::Error::last_os_error(),
                "could not query open-file limit"
            );
            return;
        }
        if libc::geteuid() == 0 && rlim.rlim_max < 1_048_576 {
            rlim.rlim_max = 1_048_576;
        }
        if rlim.rlim_cur < rlim.rlim_max {
            rlim.rlim_cur = rlim.rlim_max;
            if libc::setrlimit(libc::RLIMIT_NOFILE, &rlim) != 0 {
                tracing::warn!(
                    error = %std::io::Error::last_os_error(),
                    "could not raise open-file limit"
                );
            } else {
                tracing::debug!(limit = rlim.rlim_cur, "raised open-file limit");
            }
        }
    }
}
