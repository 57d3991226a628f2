//! Decoding of packed `linux_dirent64` records.
//!
//! A read-directory completion hands back `r` bytes of the node's scan
//! buffer holding a sequence of variable-length records:
//!
//! ```text
//! ┌─────────┬─────────┬──────────┬────────┬───────────────────────┐
//! │ d_ino   │ d_off   │ d_reclen │ d_type │ d_name (NUL-terminated)│
//! │ 8 bytes │ 8 bytes │ 2 bytes  │ 1 byte │ padded to d_reclen    │
//! └─────────┴─────────┴──────────┴────────┴───────────────────────┘
//! ```
//!
//! All fields are native little-endian. `d_reclen` gives the exact span to
//! the next record and must never be zero; the iterator consumes exactly
//! the slice it was given and rejects records that would overrun it.

use crate::error::DirentError;

/// Fixed record header length before the name bytes.
pub const DIRENT_HEADER_LEN: usize = 19;

/// Type tag: filesystem did not populate the entry type.
pub const DT_UNKNOWN: u8 = 0;

/// Type tag: directory.
pub const DT_DIR: u8 = 4;

/// Type tag: regular file.
pub const DT_REG: u8 = 8;

/// A single decoded directory entry, borrowing the scan buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dirent<'a> {
    /// Inode number.
    pub ino: u64,
    /// Entry type tag (`DT_*`), `DT_UNKNOWN` when the filesystem does not
    /// report types in directory reads.
    pub d_type: u8,
    /// Entry name, without the trailing NUL.
    pub name: &'a [u8],
}

impl Dirent<'_> {
    /// Whether the type tag marks a real subdirectory.
    ///
    /// `DT_UNKNOWN` answers `false`: recursing without a type tag would
    /// need a separate stat probe per entry, which this walker does not do.
    pub fn is_dir(&self) -> bool {
        self.d_type == DT_DIR
    }

    /// Whether this is the `.` or `..` pseudo-entry.
    pub fn is_dot(&self) -> bool {
        self.name == b"." || self.name == b".."
    }
}

/// Iterator over the records of one completed directory read.
///
/// Yields `Err` once and then stops if a record is malformed; everything
/// decoded before the bad record has already been yielded.
pub struct DirentIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> DirentIter<'a> {
    /// Iterate the records in `buf`, which must span exactly the bytes the
    /// read completion reported.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
}

impl<'a> Iterator for DirentIter<'a> {
    type Item = Result<Dirent<'a>, DirentError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }

        let rec = &self.buf[self.pos..];
        if rec.len() < DIRENT_HEADER_LEN {
            self.pos = self.buf.len();
            return Some(Err(DirentError::TruncatedHeader {
                expected: DIRENT_HEADER_LEN,
                actual: rec.len(),
            }));
        }

        let ino = u64::from_le_bytes([
            rec[0], rec[1], rec[2], rec[3], rec[4], rec[5], rec[6], rec[7],
        ]);
        // rec[8..16] is d_off, the offset cookie for seekdir; the walker
        // always reads forward and never uses it.
        let reclen = u16::from_le_bytes([rec[16], rec[17]]) as usize;
        let d_type = rec[18];

        if reclen == 0 {
            self.pos = self.buf.len();
            return Some(Err(DirentError::ZeroRecordLength));
        }
        if reclen > rec.len() {
            self.pos = self.buf.len();
            return Some(Err(DirentError::RecordOverrun {
                reclen,
                remaining: rec.len(),
            }));
        }

        let name_area = &rec[DIRENT_HEADER_LEN..reclen];
        let name_len = name_area
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_area.len());

        self.pos += reclen;
        Some(Ok(Dirent {
            ino,
            d_type,
            name: &name_area[..name_len],
        }))
    }
}

/// Append one packed record to `out`, padded to 8-byte alignment the way
/// the kernel emits them. Used by ring backends that synthesize directory
/// reads.
pub fn append_record(out: &mut Vec<u8>, ino: u64, d_type: u8, name: &[u8]) {
    let start = out.len();
    let reclen = (DIRENT_HEADER_LEN + name.len() + 1 + 7) & !7;

    out.extend_from_slice(&ino.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&(reclen as u16).to_le_bytes());
    out.push(d_type);
    out.extend_from_slice(name);
    out.push(0);
    out.resize(start + reclen, 0);
}

/// Length in bytes [`append_record`] would emit for `name`.
pub fn record_len(name: &[u8]) -> usize {
    (DIRENT_HEADER_LEN + name.len() + 1 + 7) & !7
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(buf: &[u8]) -> Vec<Vec<u8>> {
        DirentIter::new(buf)
            .map(|r| r.unwrap().name.to_vec())
            .collect()
    }

    #[test]
    fn test_parse_exact_fit_sequence() {
        let mut buf = Vec::new();
        append_record(&mut buf, 1, DT_DIR, b".");
        append_record(&mut buf, 2, DT_DIR, b"..");
        append_record(&mut buf, 10, DT_REG, b"alpha.txt");
        append_record(&mut buf, 11, DT_DIR, b"nested");

        // The buffer boundary falls exactly on the last record boundary.
        assert_eq!(
            names(&buf),
            vec![
                b".".to_vec(),
                b"..".to_vec(),
                b"alpha.txt".to_vec(),
                b"nested".to_vec()
            ]
        );
    }

    #[test]
    fn test_type_tags_and_dots() {
        let mut buf = Vec::new();
        append_record(&mut buf, 1, DT_DIR, b"sub");
        append_record(&mut buf, 2, DT_UNKNOWN, b"mystery");
        append_record(&mut buf, 3, DT_DIR, b".");

        let entries: Vec<_> = DirentIter::new(&buf).map(|r| r.unwrap()).collect();
        assert!(entries[0].is_dir() && !entries[0].is_dot());
        // Unknown type never recurses even if the entry is really a directory.
        assert!(!entries[1].is_dir());
        assert!(entries[2].is_dot());
    }

    #[test]
    fn test_zero_reclen_rejected() {
        let mut buf = Vec::new();
        append_record(&mut buf, 1, DT_DIR, b"ok");
        let bad_at = buf.len();
        append_record(&mut buf, 2, DT_DIR, b"broken");
        buf[bad_at + 16] = 0;
        buf[bad_at + 17] = 0;

        let mut it = DirentIter::new(&buf);
        assert!(it.next().unwrap().is_ok());
        assert_eq!(it.next().unwrap(), Err(DirentError::ZeroRecordLength));
        // The iterator is exhausted after a malformed record.
        assert!(it.next().is_none());
    }

    #[test]
    fn test_overrun_rejected() {
        let mut buf = Vec::new();
        append_record(&mut buf, 1, DT_REG, b"file");
        let reclen = buf.len() + 16;
        buf[16] = (reclen & 0xff) as u8;
        buf[17] = (reclen >> 8) as u8;

        let mut it = DirentIter::new(&buf);
        match it.next().unwrap() {
            Err(DirentError::RecordOverrun { reclen: r, remaining }) => {
                assert_eq!(r, reclen);
                assert_eq!(remaining, buf.len());
            }
            other => panic!("expected overrun error, got {other:?}"),
        }
        assert!(it.next().is_none());
    }

    #[test]
    fn test_truncated_header_rejected() {
        let mut buf = Vec::new();
        append_record(&mut buf, 1, DT_REG, b"file");
        buf.extend_from_slice(&[0u8; 5]);

        let mut it = DirentIter::new(&buf);
        assert!(it.next().unwrap().is_ok());
        assert_eq!(
            it.next().unwrap(),
            Err(DirentError::TruncatedHeader {
                expected: DIRENT_HEADER_LEN,
                actual: 5
            })
        );
    }

    #[test]
    fn test_empty_buffer_is_empty_iterator() {
        assert!(DirentIter::new(&[]).next().is_none());
    }

    #[test]
    fn test_record_len_matches_encoder() {
        for name in [&b"a"[..], b"abcdefg", b"exactly8", b"a-much-longer-name"] {
            let mut buf = Vec::new();
            append_record(&mut buf, 1, DT_REG, name);
            assert_eq!(buf.len(), record_len(name));
            assert_eq!(buf.len() % 8, 0);
        }
    }
}
