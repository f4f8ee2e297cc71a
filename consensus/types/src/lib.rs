//! Consensus primitives shared by the fork-choice crates.

#[macro_use]
mod slot_epoch_macros;

pub mod chain_spec;
pub mod checkpoint;
pub mod execution_block_hash;
pub mod slot_epoch;

pub use chain_spec::ChainSpec;
pub use checkpoint::Checkpoint;
pub use execution_block_hash::ExecutionBlockHash;
pub use slot_epoch::{Epoch, Slot};

/// 32-byte block, state and transaction roots.
pub type Hash256 = ethereum_types::H256;
