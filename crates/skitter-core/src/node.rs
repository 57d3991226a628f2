//! Directory-node storage and lifecycle state.
//!
//! Nodes live in a slot arena with stable integer handles; the handle
//! doubles as the completion token carried through the ring, so a drained
//! completion routes straight back to its node. A slot is recycled only
//! after the node's close completion has been dispatched, and a node's
//! parent cannot reach refcount zero while any child still holds it, so an
//! in-flight token never aliases a recycled slot.

use std::ffi::CString;

use crate::ring::RawFd;

/// Stable handle to a node in the arena. Doubles as the ring token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// Token value carried through the ring for this node.
    pub fn token(self) -> u64 {
        u64::from(self.0)
    }

    /// Rebuild the handle from a drained completion token.
    pub fn from_token(token: u64) -> Self {
        Self(token as u32)
    }
}

/// Lifecycle phase of a node's descriptor.
///
/// A node only ever moves forward: `Pending` → `Open` → `Closing` → freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorState {
    /// Open submitted, no descriptor yet.
    Pending,
    /// Descriptor open, enumeration in progress.
    Open(RawFd),
    /// Close submitted, awaiting its completion.
    Closing,
}

/// One directory being walked.
#[derive(Debug)]
pub struct DirNode {
    /// Path segment used to open this node, relative to its parent (or to
    /// the process working directory for the root).
    pub name: CString,
    /// Owning directory, `None` only for the walk root.
    pub parent: Option<NodeId>,
    /// Descriptor lifecycle phase.
    pub state: DescriptorState,
    /// Open reasons: 1 for the node itself plus 1 per direct child whose
    /// open has not completed yet. Zero triggers the close submission.
    pub refcount: u32,
    /// Result code of the most recent completion, consumed at dispatch.
    pub pending_result: i32,
    /// Reusable read buffer. Boxed so its address survives arena growth
    /// while a read submission holds a pointer into it.
    pub scan_buffer: Box<[u8]>,
}

impl DirNode {
    fn new(name: CString, parent: Option<NodeId>, buffer_len: usize) -> Self {
        Self {
            name,
            parent,
            state: DescriptorState::Pending,
            refcount: 1,
            pending_result: 0,
            scan_buffer: vec![0u8; buffer_len].into_boxed_slice(),
        }
    }
}

/// Slot arena with stable [`NodeId`] handles and slot recycling.
#[derive(Debug, Default)]
pub struct NodeArena {
    slots: Vec<Option<DirNode>>,
    free: Vec<u32>,
}

impl NodeArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a node in `Pending` state with refcount 1.
    pub fn insert(&mut self, name: CString, parent: Option<NodeId>, buffer_len: usize) -> NodeId {
        let node = DirNode::new(name, parent, buffer_len);
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(node);
                NodeId(slot)
            }
            None => {
                self.slots.push(Some(node));
                NodeId((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Look up a live node.
    pub fn get(&self, id: NodeId) -> Option<&DirNode> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Look up a live node for mutation.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut DirNode> {
        self.slots.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Free a node and recycle its slot.
    pub fn remove(&mut self, id: NodeId) -> Option<DirNode> {
        let node = self.slots.get_mut(id.0 as usize).and_then(Option::take);
        if node.is_some() {
            self.free.push(id.0);
        }
        node
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether no nodes are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
