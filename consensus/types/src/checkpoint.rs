use crate::{Epoch, Hash256};
use serde::{Deserialize, Serialize};

/// Casper FFG checkpoint, used in attestations and as the justified/finalized
/// anchors of fork choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: Epoch,
    pub root: Hash256,
}
