use serde::Serialize;
use types::{Epoch, ExecutionBlockHash, Hash256, Slot};

/// Execution status of a dumped node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Validity {
    Optimistic,
    Valid,
}

/// Diagnostic snapshot of a single tree node.
///
/// Dumps are emitted pre-order, children in insertion order, so the sequence
/// reconstructs the tree exactly.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeDump {
    pub slot: Slot,
    pub root: Hash256,
    /// Zero for the node the tree is rooted at.
    pub parent_root: Hash256,
    pub justified_epoch: Epoch,
    pub finalized_epoch: Epoch,
    pub unrealized_justified_epoch: Epoch,
    pub unrealized_finalized_epoch: Epoch,
    pub balance: u64,
    pub weight: u64,
    pub execution_optimistic: bool,
    pub execution_block_hash: ExecutionBlockHash,
    pub timestamp: u64,
    pub validity: Validity,
}
