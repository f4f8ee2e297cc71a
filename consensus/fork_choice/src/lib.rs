mod fork_choice;
mod fork_choice_store;
pub mod metrics;
mod weak_subjectivity;

pub use crate::fork_choice::{
    arrived_after_orphan_check, arrived_early, compute_slots_since_epoch_start,
    compute_start_slot_at_epoch, seconds_since_slot_start, AttestationFromBlock, BalancesProvider,
    BeaconStateReader, Error, ForkChoice, ForkChoiceView, InvalidAttestation, InvalidBlock,
    PROCESS_ATTESTATIONS_THRESHOLD,
};
pub use crate::fork_choice_store::ForkChoiceStore;
pub use crate::weak_subjectivity::{
    BlockDatabase, Error as WeakSubjectivityError, WeakSubjectivityVerifier,
};
pub use block_tree::CancellationToken;
