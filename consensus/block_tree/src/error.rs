use safe_arith::ArithError;
use types::{Epoch, Hash256};

#[derive(Clone, PartialEq, Debug)]
pub enum Error {
    NodeUnknown(Hash256),
    DuplicateRoot(Hash256),
    UnknownParent(Hash256),
    InvalidParentRoot(Hash256),
    JustifiedNodeUnknown(Hash256),
    FinalizedNodeUnknown(Hash256),
    /// Subtree removal may only target optimistic, non-root nodes.
    InvalidOptimisticStatus(Hash256),
    InvalidNodeIndex(usize),
    /// A balance deduction would underflow. This is a programming error, not
    /// a protocol condition.
    BalanceUnderflow {
        root: Hash256,
        balance: u64,
        deducted: u64,
    },
    /// Unrealized justification may never move backwards on a node.
    InvalidUnrealizedJustifiedEpoch {
        root: Hash256,
        current: Epoch,
        proposed: Epoch,
    },
    /// Unrealized finalization may never move backwards on a node.
    InvalidUnrealizedFinalizedEpoch {
        root: Hash256,
        current: Epoch,
        proposed: Epoch,
    },
    Arith(ArithError),
    /// A walk was interrupted by its cancellation token. Not a failure.
    Canceled,
}

impl From<ArithError> for Error {
    fn from(e: ArithError) -> Self {
        Error::Arith(e)
    }
}
