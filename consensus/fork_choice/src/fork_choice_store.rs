use block_tree::JustifiedBalances;
use std::collections::BTreeSet;
use types::{Checkpoint, Hash256, Slot};

/// Approximates the `Store` in "Ethereum 2.0 Phase 0 -- Beacon Chain Fork Choice":
///
/// https://github.com/ethereum/consensus-specs/blob/dev/specs/phase0/fork-choice.md#store
///
/// ## Detail
///
/// This is an approximation in that `time` is represented using `Slot`
/// instead of UNIX epoch `u64`, and the block DAG itself lives beside the
/// store inside `ForkChoice`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForkChoiceStore {
    current_slot: Slot,
    genesis_time: u64,
    justified_checkpoint: Checkpoint,
    previous_justified_checkpoint: Checkpoint,
    finalized_checkpoint: Checkpoint,
    unrealized_justified_checkpoint: Checkpoint,
    unrealized_finalized_checkpoint: Checkpoint,
    justified_balances: JustifiedBalances,
    /// Total active balance attributable to one slot's committees, derived
    /// from `justified_balances`.
    committee_weight: u64,
    proposer_boost_root: Hash256,
    equivocating_indices: BTreeSet<u64>,
}

impl ForkChoiceStore {
    pub fn new(
        genesis_time: u64,
        current_slot: Slot,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
    ) -> Self {
        Self {
            current_slot,
            genesis_time,
            justified_checkpoint,
            previous_justified_checkpoint: justified_checkpoint,
            finalized_checkpoint,
            unrealized_justified_checkpoint: justified_checkpoint,
            unrealized_finalized_checkpoint: finalized_checkpoint,
            justified_balances: JustifiedBalances::default(),
            committee_weight: 0,
            proposer_boost_root: Hash256::zero(),
            equivocating_indices: BTreeSet::new(),
        }
    }

    /// Returns the last value passed to `Self::set_current_slot`.
    pub fn get_current_slot(&self) -> Slot {
        self.current_slot
    }

    /// This should only ever be called from within `ForkChoice::on_tick`.
    pub fn set_current_slot(&mut self, slot: Slot) {
        self.current_slot = slot;
    }

    pub fn genesis_time(&self) -> u64 {
        self.genesis_time
    }

    pub fn justified_checkpoint(&self) -> Checkpoint {
        self.justified_checkpoint
    }

    pub fn previous_justified_checkpoint(&self) -> Checkpoint {
        self.previous_justified_checkpoint
    }

    pub fn finalized_checkpoint(&self) -> Checkpoint {
        self.finalized_checkpoint
    }

    pub fn unrealized_justified_checkpoint(&self) -> Checkpoint {
        self.unrealized_justified_checkpoint
    }

    pub fn unrealized_finalized_checkpoint(&self) -> Checkpoint {
        self.unrealized_finalized_checkpoint
    }

    /// Adopts a newer justified checkpoint, demoting the old one to
    /// `previous_justified_checkpoint`.
    pub fn set_justified_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.previous_justified_checkpoint = self.justified_checkpoint;
        self.justified_checkpoint = checkpoint;
    }

    pub fn set_finalized_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.finalized_checkpoint = checkpoint;
    }

    /// Monotone raise; checkpoints from older epochs are ignored.
    pub fn raise_unrealized_justified_checkpoint(&mut self, checkpoint: Checkpoint) {
        if checkpoint.epoch > self.unrealized_justified_checkpoint.epoch {
            self.unrealized_justified_checkpoint = checkpoint;
        }
    }

    /// Monotone raise; checkpoints from older epochs are ignored.
    pub fn raise_unrealized_finalized_checkpoint(&mut self, checkpoint: Checkpoint) {
        if checkpoint.epoch > self.unrealized_finalized_checkpoint.epoch {
            self.unrealized_finalized_checkpoint = checkpoint;
        }
    }

    /// Returns balances of the state identified by `justified_checkpoint.root`.
    pub fn justified_balances(&self) -> &JustifiedBalances {
        &self.justified_balances
    }

    pub fn set_justified_balances(
        &mut self,
        justified_balances: JustifiedBalances,
        slots_per_epoch: u64,
    ) {
        self.committee_weight = justified_balances.committee_weight(slots_per_epoch);
        self.justified_balances = justified_balances;
    }

    pub fn committee_weight(&self) -> u64 {
        self.committee_weight
    }

    pub fn proposer_boost_root(&self) -> Hash256 {
        self.proposer_boost_root
    }

    pub fn set_proposer_boost_root(&mut self, proposer_boost_root: Hash256) {
        self.proposer_boost_root = proposer_boost_root;
    }

    pub fn equivocating_indices(&self) -> &BTreeSet<u64> {
        &self.equivocating_indices
    }

    pub fn insert_equivocating_index(&mut self, validator_index: u64) {
        self.equivocating_indices.insert(validator_index);
    }
}
