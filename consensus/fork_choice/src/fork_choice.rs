use crate::fork_choice_store::ForkChoiceStore;
use crate::metrics;
use block_tree::{
    calculate_committee_fraction, update_balances, Block, BlockTree, CancellationToken,
    ElasticList, JustifiedBalances, NodeDump, VoteTracker,
};
use parking_lot::RwLock;
use slog::{crit, debug, warn, Logger};
use std::fmt::Debug;
use types::{ChainSpec, Checkpoint, Epoch, ExecutionBlockHash, Hash256, Slot};

/// Seconds into a slot after which attestations for that same slot are
/// considered during head computation.
pub const PROCESS_ATTESTATIONS_THRESHOLD: u64 = 10;

#[derive(Debug)]
pub enum Error<T> {
    BlockTree(block_tree::Error),
    InvalidBlock(InvalidBlock),
    InvalidAttestation(InvalidAttestation),
    /// The justified-balance provider failed; fork choice cannot continue
    /// without a balance snapshot.
    BalancesUnavailable(T),
    InconsistentOnTick {
        previous_slot: Slot,
        time: Slot,
    },
    InvalidAnchor {
        block_slot: Slot,
    },
}

impl<T> From<block_tree::Error> for Error<T> {
    fn from(e: block_tree::Error) -> Self {
        Error::BlockTree(e)
    }
}

impl<T> From<InvalidAttestation> for Error<T> {
    fn from(e: InvalidAttestation) -> Self {
        Error::InvalidAttestation(e)
    }
}

#[derive(Debug)]
pub enum InvalidBlock {
    UnknownParent(Hash256),
    FutureSlot {
        current_slot: Slot,
        block_slot: Slot,
    },
    FinalizedSlot {
        finalized_slot: Slot,
        block_slot: Slot,
    },
    NotFinalizedDescendant {
        finalized_root: Hash256,
        block_ancestor: Option<Hash256>,
    },
}

#[derive(Debug)]
pub enum InvalidAttestation {
    /// An attestation with no attesting indices is never useful.
    EmptyValidatorSet,
    /// The attested block is unknown to the tree.
    UnknownHeadBlock { beacon_block_root: Hash256 },
    /// The attestation is for an epoch in the future.
    FutureEpoch {
        attestation_epoch: Epoch,
        current_epoch: Epoch,
    },
    /// The attestation is for an epoch in the past.
    PastEpoch {
        attestation_epoch: Epoch,
        current_epoch: Epoch,
    },
}

/// Denotes whether an attestation we are processing was received from a block
/// or from gossip. Gossip attestations are held to the current-or-previous
/// epoch window; attestations read out of blocks are not.
#[derive(Clone, Copy)]
pub enum AttestationFromBlock {
    True,
    False,
}

/// Calculate how far `slot` lies from the start of its epoch.
pub fn compute_slots_since_epoch_start(slot: Slot, slots_per_epoch: u64) -> Slot {
    slot - slot.epoch(slots_per_epoch).start_slot(slots_per_epoch)
}

/// Calculate the first slot in `epoch`.
pub fn compute_start_slot_at_epoch(epoch: Epoch, slots_per_epoch: u64) -> Slot {
    epoch.start_slot(slots_per_epoch)
}

/// Seconds elapsed between the start of `slot` and `timestamp`. `None` when
/// the timestamp predates the slot start.
pub fn seconds_since_slot_start(
    slot: Slot,
    genesis_time: u64,
    timestamp: u64,
    seconds_per_slot: u64,
) -> Option<u64> {
    let slot_start = slot
        .as_u64()
        .checked_mul(seconds_per_slot)?
        .checked_add(genesis_time)?;
    timestamp.checked_sub(slot_start)
}

/// Whether a block that arrived at `timestamp` beat the proposer-boost cutoff
/// of its slot.
///
/// Genesis time has seconds granularity, hence the strict inequality: a block
/// arriving 3.999 seconds into the slot measures 3 whole seconds.
pub fn arrived_early(slot: Slot, genesis_time: u64, timestamp: u64, spec: &ChainSpec) -> bool {
    seconds_since_slot_start(slot, genesis_time, timestamp, spec.seconds_per_slot)
        .map_or(false, |secs| secs < spec.proposer_boost_window())
}

/// Whether the block arrived at or after the point in its slot where it
/// becomes a candidate for orphaning.
pub fn arrived_after_orphan_check(
    slot: Slot,
    genesis_time: u64,
    timestamp: u64,
    spec: &ChainSpec,
) -> bool {
    seconds_since_slot_start(slot, genesis_time, timestamp, spec.seconds_per_slot)
        .map_or(false, |secs| secs >= PROCESS_ATTESTATIONS_THRESHOLD)
}

/// Provides the effective balances of the state at a justified block root.
pub trait BalancesProvider {
    type Error: Debug;

    fn justified_balances(&self, block_root: Hash256) -> Result<Vec<u64>, Self::Error>;
}

/// Read-only view of the post-state of a block being inserted.
pub trait BeaconStateReader {
    type Error: Debug;

    fn slot(&self) -> Slot;

    fn current_justified_checkpoint(&self) -> Checkpoint;

    fn finalized_checkpoint(&self) -> Checkpoint;

    /// The justification and finalization the state would realize at its next
    /// epoch boundary.
    fn unrealized_checkpoints(&self) -> Result<(Checkpoint, Checkpoint), Self::Error>;
}

/// The canonical head and FFG checkpoints, as of the last `get_head`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ForkChoiceView {
    pub head_block_root: Hash256,
    pub justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
}

struct Inner {
    fc_store: ForkChoiceStore,
    block_tree: BlockTree,
    votes: ElasticList<VoteTracker>,
    /// The balances most recently applied to the tree, compared against the
    /// justified snapshot to form per-validator deltas.
    applied_balances: Vec<u64>,
    head_block_root: Hash256,
}

/// Provides an implementation of "Ethereum 2.0 Phase 0 -- Beacon Chain Fork Choice":
///
/// https://github.com/ethereum/consensus-specs/blob/dev/specs/phase0/fork-choice.md
///
/// ## Detail
///
/// One write-exclusive lock guards the store, the tree and the vote table;
/// every mutating operation acquires it, read-only accessors take the shared
/// side. Long walks accept a `CancellationToken` and bail out with
/// `Canceled` mid-walk.
pub struct ForkChoice<B> {
    inner: RwLock<Inner>,
    balances_by_root: B,
    spec: ChainSpec,
    log: Logger,
}

impl<B: BalancesProvider> ForkChoice<B> {
    /// Instantiates `Self` from an anchor (genesis or another finalized
    /// block), which must sit on an epoch boundary. The justified balances
    /// are loaded through `balances_by_root` and an initial head is computed.
    #[allow(clippy::too_many_arguments)]
    pub fn from_anchor(
        balances_by_root: B,
        anchor_block_root: Hash256,
        anchor_slot: Slot,
        anchor_state_root: Hash256,
        anchor_payload_hash: ExecutionBlockHash,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
        genesis_time: u64,
        current_slot: Slot,
        spec: ChainSpec,
        log: Logger,
    ) -> Result<Self, Error<B::Error>> {
        if anchor_slot % spec.slots_per_epoch != 0 {
            return Err(Error::InvalidAnchor {
                block_slot: anchor_slot,
            });
        }

        let anchor_timestamp = genesis_time.saturating_add(
            anchor_slot.as_u64().saturating_mul(spec.seconds_per_slot),
        );
        let block_tree = BlockTree::new(Block {
            slot: anchor_slot,
            root: anchor_block_root,
            parent_root: None,
            state_root: anchor_state_root,
            payload_hash: anchor_payload_hash,
            justified_epoch: justified_checkpoint.epoch,
            finalized_epoch: finalized_checkpoint.epoch,
            timestamp: anchor_timestamp,
            // The anchor is trusted by definition.
            optimistic: false,
        });

        let fork_choice = Self {
            inner: RwLock::new(Inner {
                fc_store: ForkChoiceStore::new(
                    genesis_time,
                    current_slot,
                    justified_checkpoint,
                    finalized_checkpoint,
                ),
                block_tree,
                votes: ElasticList::default(),
                applied_balances: vec![],
                head_block_root: Hash256::zero(),
            }),
            balances_by_root,
            spec,
            log,
        };

        {
            let mut inner = fork_choice.inner.write();
            fork_choice.update_justified_balances(&mut inner, justified_checkpoint.root)?;
        }
        fork_choice.get_head(current_slot, &CancellationToken::default())?;

        Ok(fork_choice)
    }

    fn update_justified_balances(
        &self,
        inner: &mut Inner,
        block_root: Hash256,
    ) -> Result<(), Error<B::Error>> {
        let effective_balances = self
            .balances_by_root
            .justified_balances(block_root)
            .map_err(Error::BalancesUnavailable)?;
        let justified_balances = JustifiedBalances::from_effective_balances(effective_balances)
            .map_err(|e| Error::BlockTree(e.into()))?;
        inner
            .fc_store
            .set_justified_balances(justified_balances, self.spec.slots_per_epoch);
        Ok(())
    }

    /// Call `on_tick` for all slots between the store's slot and
    /// `current_slot`. Returns the store's view of the current slot, which
    /// never decreases.
    pub fn update_time(&self, current_slot: Slot) -> Result<Slot, Error<B::Error>> {
        let mut inner = self.inner.write();
        self.update_time_locked(&mut inner, current_slot)?;
        Ok(inner.fc_store.get_current_slot())
    }

    fn update_time_locked(
        &self,
        inner: &mut Inner,
        current_slot: Slot,
    ) -> Result<(), Error<B::Error>> {
        while inner.fc_store.get_current_slot() < current_slot {
            let previous_slot = inner.fc_store.get_current_slot();
            // `on_tick` moves `fc_store.current_slot` forward, so the loop
            // cannot get stuck.
            self.on_tick_locked(inner, previous_slot + 1u64)?;
        }
        Ok(())
    }

    fn on_tick_locked(&self, inner: &mut Inner, time: Slot) -> Result<(), Error<B::Error>> {
        let previous_slot = inner.fc_store.get_current_slot();

        if time > previous_slot + 1u64 {
            return Err(Error::InconsistentOnTick {
                previous_slot,
                time,
            });
        }

        inner.fc_store.set_current_slot(time);
        let current_slot = inner.fc_store.get_current_slot();
        if current_slot <= previous_slot {
            return Ok(());
        }

        // A fresh slot retires the previous slot's proposer boost; the bonus
        // itself is withdrawn on the next head computation.
        inner.fc_store.set_proposer_boost_root(Hash256::zero());

        if compute_slots_since_epoch_start(current_slot, self.spec.slots_per_epoch) != 0 {
            return Ok(());
        }
        self.update_unrealized_checkpoints_locked(inner)
    }

    /// Copies every node's unrealized checkpoints into its realized ones and
    /// promotes the store checkpoints accordingly. Runs at the start of each
    /// epoch.
    pub fn update_unrealized_checkpoints(&self) -> Result<(), Error<B::Error>> {
        let mut inner = self.inner.write();
        self.update_unrealized_checkpoints_locked(&mut inner)
    }

    fn update_unrealized_checkpoints_locked(
        &self,
        inner: &mut Inner,
    ) -> Result<(), Error<B::Error>> {
        let (max_justified, max_finalized) = inner.block_tree.realize_unrealized_epochs();

        if max_justified > inner.fc_store.justified_checkpoint().epoch {
            let unrealized = inner.fc_store.unrealized_justified_checkpoint();
            debug_assert!(unrealized.epoch >= max_justified);
            inner.fc_store.set_justified_checkpoint(unrealized);
            self.update_justified_balances(inner, unrealized.root)?;
        }
        if max_finalized > inner.fc_store.finalized_checkpoint().epoch {
            let unrealized = inner.fc_store.unrealized_finalized_checkpoint();
            inner.fc_store.set_finalized_checkpoint(unrealized);
        }
        debug_assert!(
            inner.fc_store.justified_checkpoint().epoch
                >= inner.fc_store.finalized_checkpoint().epoch
        );
        Ok(())
    }

    /// Add a block to the fork choice tree.
    ///
    /// The block is assumed to have passed the state transition upstream;
    /// `state` is its post-state. Re-inserting a known root is a no-op.
    #[allow(clippy::too_many_arguments)]
    pub fn on_block<S: BeaconStateReader>(
        &self,
        system_time_current_slot: Slot,
        block_root: Hash256,
        parent_root: Hash256,
        block_slot: Slot,
        state_root: Hash256,
        payload_hash: ExecutionBlockHash,
        optimistic: bool,
        arrival_timestamp: u64,
        state: &S,
    ) -> Result<(), Error<B::Error>> {
        let _timer = metrics::start_timer(&metrics::FORK_CHOICE_ON_BLOCK_TIMES);
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        self.update_time_locked(inner, system_time_current_slot)?;
        let current_slot = inner.fc_store.get_current_slot();

        if inner.block_tree.contains_block(&block_root) {
            return Ok(());
        }

        if !inner.block_tree.contains_block(&parent_root) {
            return Err(Error::InvalidBlock(InvalidBlock::UnknownParent(
                parent_root,
            )));
        }

        // Blocks cannot be in the future. If they are, their consideration
        // must be delayed until they are in the past.
        if block_slot > current_slot {
            return Err(Error::InvalidBlock(InvalidBlock::FutureSlot {
                current_slot,
                block_slot,
            }));
        }

        // Check that the block is later than the finalized epoch slot.
        let finalized_slot = compute_start_slot_at_epoch(
            inner.fc_store.finalized_checkpoint().epoch,
            self.spec.slots_per_epoch,
        );
        if block_slot <= finalized_slot {
            return Err(Error::InvalidBlock(InvalidBlock::FinalizedSlot {
                finalized_slot,
                block_slot,
            }));
        }

        // Check that the block descends from the finalized block. Starting
        // the search at the parent is equivalent since
        // `block_slot > finalized_slot`, and the parent is already in the
        // tree.
        let block_ancestor = inner.block_tree.ancestor_root(&parent_root, finalized_slot)?;
        let finalized_root = inner.fc_store.finalized_checkpoint().root;
        if block_ancestor != Some(finalized_root) {
            return Err(Error::InvalidBlock(InvalidBlock::NotFinalizedDescendant {
                finalized_root,
                block_ancestor,
            }));
        }

        let justified_checkpoint = state.current_justified_checkpoint();
        let finalized_checkpoint = state.finalized_checkpoint();

        inner.block_tree.on_block(Block {
            slot: block_slot,
            root: block_root,
            parent_root: Some(parent_root),
            state_root,
            payload_hash,
            justified_epoch: justified_checkpoint.epoch,
            finalized_epoch: finalized_checkpoint.epoch,
            timestamp: arrival_timestamp,
            optimistic,
        })?;

        let (justified_checkpoint, finalized_checkpoint) = self.pull_tips(
            inner,
            state,
            block_root,
            justified_checkpoint,
            finalized_checkpoint,
            current_slot,
        )?;

        self.update_checkpoints(inner, justified_checkpoint, finalized_checkpoint)?;

        // Add proposer score boost if the block is timely.
        let genesis_time = inner.fc_store.genesis_time();
        if current_slot == block_slot
            && arrived_early(block_slot, genesis_time, arrival_timestamp, &self.spec)
        {
            inner.fc_store.set_proposer_boost_root(block_root);
        }

        Ok(())
    }

    /// Computes the unrealized checkpoints of the freshly inserted block from
    /// its post-state and pulls them up into the node and the store.
    ///
    /// Blocks from earlier epochs have already crossed an epoch boundary, so
    /// their unrealized checkpoints are realized on the spot and returned in
    /// place of the pre-state ones.
    fn pull_tips<S: BeaconStateReader>(
        &self,
        inner: &mut Inner,
        state: &S,
        block_root: Hash256,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
        current_slot: Slot,
    ) -> Result<(Checkpoint, Checkpoint), Error<B::Error>> {
        let slots_per_epoch = self.spec.slots_per_epoch;
        let parent_unrealized_justified = match inner.block_tree.parent_of(&block_root) {
            Some(parent) => parent.unrealized_justified_epoch,
            // Nothing to pull for the tree root.
            None => return Ok((justified_checkpoint, finalized_checkpoint)),
        };

        let current_epoch = current_slot.epoch(slots_per_epoch);
        let state_slot = state.slot();
        let state_epoch = state_slot.epoch(slots_per_epoch);
        let curr_justified = parent_unrealized_justified == current_epoch;
        let prev_justified = parent_unrealized_justified + 1u64 == current_epoch;
        let too_early_for_curr =
            compute_slots_since_epoch_start(state_slot, slots_per_epoch).as_u64() * 3
                < slots_per_epoch * 2;

        // Already justified, or still before the 2/3 mark of the epoch where
        // the current epoch could justify: the block can only carry its
        // parent's view.
        if curr_justified || (state_epoch == current_epoch && prev_justified && too_early_for_curr)
        {
            inner
                .block_tree
                .inherit_parent_unrealized_epochs(&block_root)?;
            return Ok((justified_checkpoint, finalized_checkpoint));
        }

        let (unrealized_justified, unrealized_finalized) = match state.unrealized_checkpoints() {
            Ok(checkpoints) => checkpoints,
            Err(e) => {
                warn!(
                    self.log,
                    "Could not compute unrealized checkpoints";
                    "block_root" => ?block_root,
                    "error" => ?e,
                );
                (justified_checkpoint, finalized_checkpoint)
            }
        };

        inner
            .fc_store
            .raise_unrealized_justified_checkpoint(unrealized_justified);
        inner
            .fc_store
            .raise_unrealized_finalized_checkpoint(unrealized_finalized);

        if let Err(e) = inner
            .block_tree
            .set_unrealized_justified_epoch(&block_root, unrealized_justified.epoch)
        {
            crit!(self.log, "Unrealized justification moved backwards"; "error" => ?e);
            return Err(e.into());
        }
        if let Err(e) = inner
            .block_tree
            .set_unrealized_finalized_epoch(&block_root, unrealized_finalized.epoch)
        {
            crit!(self.log, "Unrealized finalization moved backwards"; "error" => ?e);
            return Err(e.into());
        }

        if state_epoch < current_epoch {
            inner.block_tree.promote_realized_epochs(
                &block_root,
                unrealized_justified.epoch,
                unrealized_finalized.epoch,
            )?;
            return Ok((unrealized_justified, unrealized_finalized));
        }

        Ok((justified_checkpoint, finalized_checkpoint))
    }

    /// Promotes the store checkpoints when the supplied ones are newer.
    /// Justified promotion refreshes the balance snapshot; finalization
    /// prunes everything that does not descend from the new finalized block.
    fn update_checkpoints(
        &self,
        inner: &mut Inner,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
    ) -> Result<(), Error<B::Error>> {
        if justified_checkpoint.epoch > inner.fc_store.justified_checkpoint().epoch {
            inner.fc_store.set_justified_checkpoint(justified_checkpoint);
            self.update_justified_balances(inner, justified_checkpoint.root)?;
        }
        if finalized_checkpoint.epoch > inner.fc_store.finalized_checkpoint().epoch {
            inner.fc_store.set_finalized_checkpoint(finalized_checkpoint);
            self.prune_locked(inner)?;
        }
        debug_assert!(
            inner.fc_store.justified_checkpoint().epoch
                >= inner.fc_store.finalized_checkpoint().epoch
        );
        Ok(())
    }

    fn prune_locked(&self, inner: &mut Inner) -> Result<(), Error<B::Error>> {
        let finalized_root = inner.fc_store.finalized_checkpoint().root;
        if !inner.block_tree.contains_block(&finalized_root) {
            // When syncing from a checkpoint the finalized block can postdate
            // every imported block; there is nothing to prune yet.
            debug!(self.log, "Finalized block not yet in the tree"; "finalized_root" => ?finalized_root);
            return Ok(());
        }
        let removed_roots = inner.block_tree.prune_to_finalized(&finalized_root)?;
        if removed_roots.contains(&inner.fc_store.proposer_boost_root()) {
            inner.fc_store.set_proposer_boost_root(Hash256::zero());
        }
        debug!(
            self.log,
            "Pruned block tree";
            "removed" => removed_roots.len(),
            "finalized_root" => ?finalized_root,
        );
        Ok(())
    }

    /// Registers the latest attestation of each listed validator.
    ///
    /// Signature and committee checks are the caller's concern; only the
    /// fork-choice-relevant validation runs here. An attestation whose target
    /// epoch is older than the validator's tracked vote is dropped.
    pub fn on_attestation(
        &self,
        validator_indices: &[u64],
        block_root: Hash256,
        target_epoch: Epoch,
        attestation_slot: Slot,
        is_from_block: AttestationFromBlock,
    ) -> Result<(), Error<B::Error>> {
        let _timer = metrics::start_timer(&metrics::FORK_CHOICE_ON_ATTESTATION_TIMES);

        if validator_indices.is_empty() {
            return Err(InvalidAttestation::EmptyValidatorSet.into());
        }

        // Attesters that have never seen a block attest to the zero hash,
        // which aliases the genesis block. Such votes carry no information;
        // every validator implicitly attests to genesis by being in the
        // chain.
        if block_root.is_zero() {
            return Ok(());
        }

        let mut inner = self.inner.write();

        if matches!(is_from_block, AttestationFromBlock::False) {
            let current_epoch = inner
                .fc_store
                .get_current_slot()
                .epoch(self.spec.slots_per_epoch);
            if target_epoch > current_epoch {
                return Err(InvalidAttestation::FutureEpoch {
                    attestation_epoch: target_epoch,
                    current_epoch,
                }
                .into());
            }
            if target_epoch + 1u64 < current_epoch {
                return Err(InvalidAttestation::PastEpoch {
                    attestation_epoch: target_epoch,
                    current_epoch,
                }
                .into());
            }
        }

        // Attestations must be for a known block. Unknown blocks are dropped
        // rather than queued, to keep the denial-of-service surface small.
        if !inner.block_tree.contains_block(&block_root) {
            return Err(InvalidAttestation::UnknownHeadBlock {
                beacon_block_root: block_root,
            }
            .into());
        }

        for validator_index in validator_indices {
            let vote = inner.votes.get_mut(*validator_index as usize);
            if target_epoch > vote.next_epoch || *vote == VoteTracker::default() {
                vote.next_root = block_root;
                vote.next_epoch = target_epoch;
                vote.next_slot = attestation_slot;
            }
        }

        Ok(())
    }

    /// Removes the applied vote weight of validators proven to equivocate and
    /// bars them from future head computations.
    pub fn on_attester_slashing(
        &self,
        validator_indices: impl IntoIterator<Item = u64>,
    ) -> Result<(), Error<B::Error>> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        for validator_index in validator_indices {
            if inner
                .fc_store
                .equivocating_indices()
                .contains(&validator_index)
            {
                continue;
            }
            inner.fc_store.insert_equivocating_index(validator_index);

            let vote = match inner.votes.get(validator_index as usize) {
                Some(vote) => vote.clone(),
                None => continue,
            };
            let applied_balance = inner
                .applied_balances
                .get(validator_index as usize)
                .copied()
                .unwrap_or(0);
            if !vote.current_root.is_zero() && applied_balance > 0 {
                inner
                    .block_tree
                    .deduct_balance(&vote.current_root, applied_balance)?;
            }
        }
        Ok(())
    }

    /// Run the fork choice rule to determine the head.
    ///
    /// Applies pending vote deltas and the proposer boost, recomputes weights
    /// and best-descendant pointers, and returns the head reached from the
    /// justified checkpoint.
    pub fn get_head(
        &self,
        system_time_current_slot: Slot,
        token: &CancellationToken,
    ) -> Result<Hash256, Error<B::Error>> {
        let _timer = metrics::start_timer(&metrics::FORK_CHOICE_HEAD_TIMES);
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        self.update_time_locked(inner, system_time_current_slot)?;
        let current_slot = inner.fc_store.get_current_slot();

        let new_balances = inner
            .fc_store
            .justified_balances()
            .effective_balances
            .clone();
        if let Err(e) = update_balances(
            &mut inner.block_tree,
            &mut inner.votes,
            &inner.applied_balances,
            &new_balances,
            inner.fc_store.equivocating_indices(),
            current_slot,
        ) {
            crit!(self.log, "Vote accounting failed"; "error" => ?e);
            return Err(e.into());
        }
        inner.applied_balances = new_balances;

        if let Err(e) = inner.block_tree.apply_proposer_boost(
            inner.fc_store.proposer_boost_root(),
            inner.fc_store.committee_weight(),
            self.spec.proposer_score_boost,
        ) {
            crit!(self.log, "Proposer boost accounting failed"; "error" => ?e);
            return Err(e.into());
        }

        inner.block_tree.apply_weight_changes(token)?;
        inner.block_tree.update_best_descendants(
            inner.fc_store.justified_checkpoint().epoch,
            current_slot.epoch(self.spec.slots_per_epoch),
            token,
        )?;

        let justified_root = inner.fc_store.justified_checkpoint().root;
        let head_root = inner.block_tree.head(&justified_root)?;
        inner.head_block_root = head_root;
        Ok(head_root)
    }

    /// Handles an execution-layer INVALID verdict for `block_root`, whose
    /// newest valid ancestor payload is `last_valid_hash`.
    ///
    /// Returns the removed roots, deepest first; ancestors between the cut
    /// and the last valid payload are promoted to validated.
    pub fn on_invalid_payload(
        &self,
        block_root: Hash256,
        parent_root: Hash256,
        last_valid_hash: ExecutionBlockHash,
        token: &CancellationToken,
    ) -> Result<Vec<Hash256>, Error<B::Error>> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let removed_roots = inner.block_tree.set_optimistic_to_invalid(
            block_root,
            parent_root,
            last_valid_hash,
            token,
        )?;
        if removed_roots.contains(&inner.fc_store.proposer_boost_root()) {
            inner.fc_store.set_proposer_boost_root(Hash256::zero());
        }
        if !removed_roots.is_empty() {
            warn!(
                self.log,
                "Removed invalid execution chain";
                "removed" => removed_roots.len(),
                "block_root" => ?block_root,
            );
        }
        Ok(removed_roots)
    }

    /// Handles an execution-layer VALID verdict: the block and all its
    /// ancestors stop being optimistic.
    pub fn on_valid_payload(&self, block_root: Hash256) -> Result<(), Error<B::Error>> {
        let mut inner = self.inner.write();
        inner
            .block_tree
            .set_node_and_parent_validated(&block_root)
            .map_err(Into::into)
    }

    /// Adopts a newer justified checkpoint, refreshing the justified-balance
    /// snapshot. Older checkpoints are ignored.
    pub fn update_justified_checkpoint(
        &self,
        checkpoint: Checkpoint,
    ) -> Result<(), Error<B::Error>> {
        let mut inner = self.inner.write();
        if checkpoint.epoch <= inner.fc_store.justified_checkpoint().epoch {
            return Ok(());
        }
        inner.fc_store.set_justified_checkpoint(checkpoint);
        self.update_justified_balances(&mut inner, checkpoint.root)
    }

    /// Adopts a newer finalized checkpoint and prunes the tree to it. Older
    /// checkpoints are ignored.
    pub fn update_finalized_checkpoint(
        &self,
        checkpoint: Checkpoint,
    ) -> Result<(), Error<B::Error>> {
        let mut inner = self.inner.write();
        if checkpoint.epoch <= inner.fc_store.finalized_checkpoint().epoch {
            return Ok(());
        }
        inner.fc_store.set_finalized_checkpoint(checkpoint);
        self.prune_locked(&mut inner)
    }

    /// Whether a proposer preparing the next slot should build on the head's
    /// parent rather than a weak, late-arriving head.
    pub fn should_override_forkchoice_update(
        &self,
        current_slot: Slot,
    ) -> Result<bool, Error<B::Error>> {
        let inner = self.inner.read();
        let head_root = inner.head_block_root;
        if head_root.is_zero() {
            return Ok(false);
        }
        let head = match inner.block_tree.node_by_root(&head_root) {
            Some(node) => node,
            None => return Ok(false),
        };
        if !head.has_parent() || head.slot != current_slot {
            return Ok(false);
        }

        let genesis_time = inner.fc_store.genesis_time();
        if arrived_early(head.slot, genesis_time, head.timestamp, &self.spec) {
            return Ok(false);
        }

        // A head that beat the attestation cutoff must also be below the
        // re-org weight threshold before it may be orphaned.
        if !arrived_after_orphan_check(head.slot, genesis_time, head.timestamp, &self.spec) {
            let threshold = calculate_committee_fraction(
                inner.fc_store.justified_balances(),
                self.spec.reorg_weight_threshold,
                self.spec.slots_per_epoch,
            )
            .unwrap_or(0);
            if head.weight() >= threshold {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Snapshots the whole tree pre-order for diagnostics.
    pub fn node_tree_dump(&self, token: &CancellationToken) -> Result<Vec<NodeDump>, Error<B::Error>> {
        self.inner
            .read()
            .block_tree
            .node_tree_dump(token)
            .map_err(Into::into)
    }

    /// The head, justified and finalized checkpoints as of the last
    /// `get_head` call.
    pub fn cached_fork_choice_view(&self) -> ForkChoiceView {
        let inner = self.inner.read();
        ForkChoiceView {
            head_block_root: inner.head_block_root,
            justified_checkpoint: inner.fc_store.justified_checkpoint(),
            finalized_checkpoint: inner.fc_store.finalized_checkpoint(),
        }
    }

    pub fn justified_checkpoint(&self) -> Checkpoint {
        self.inner.read().fc_store.justified_checkpoint()
    }

    pub fn previous_justified_checkpoint(&self) -> Checkpoint {
        self.inner.read().fc_store.previous_justified_checkpoint()
    }

    pub fn finalized_checkpoint(&self) -> Checkpoint {
        self.inner.read().fc_store.finalized_checkpoint()
    }

    pub fn unrealized_justified_checkpoint(&self) -> Checkpoint {
        self.inner.read().fc_store.unrealized_justified_checkpoint()
    }

    pub fn unrealized_finalized_checkpoint(&self) -> Checkpoint {
        self.inner.read().fc_store.unrealized_finalized_checkpoint()
    }

    /// Returns the store's `proposer_boost_root`, zero when no boost is
    /// armed.
    pub fn proposer_boost_root(&self) -> Hash256 {
        self.inner.read().fc_store.proposer_boost_root()
    }

    pub fn committee_weight(&self) -> u64 {
        self.inner.read().fc_store.committee_weight()
    }

    pub fn contains_block(&self, block_root: &Hash256) -> bool {
        self.inner.read().block_tree.contains_block(block_root)
    }

    pub fn block_slot(&self, block_root: &Hash256) -> Option<Slot> {
        self.inner.read().block_tree.block_slot(block_root)
    }

    /// Returns the latest tracked attestation for a validator, if any.
    pub fn latest_message(&self, validator_index: usize) -> Option<(Hash256, Epoch)> {
        let inner = self.inner.read();
        let vote = inner.votes.get(validator_index)?;
        if *vote == VoteTracker::default() {
            None
        } else {
            Some((vote.next_root, vote.next_epoch))
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.inner.read().block_tree.len()
    }

    pub fn num_votes(&self) -> usize {
        self.inner.read().votes.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_since_epoch_start() {
        for epoch in 0..3u64 {
            for slot in 0..32u64 {
                let input = epoch * 32 + slot;
                assert_eq!(
                    compute_slots_since_epoch_start(Slot::new(input), 32),
                    Slot::new(slot)
                );
            }
        }
    }

    #[test]
    fn start_slot_at_epoch() {
        for epoch in 0..3u64 {
            assert_eq!(
                compute_start_slot_at_epoch(Epoch::new(epoch), 32),
                Slot::new(epoch * 32)
            );
        }
    }

    #[test]
    fn slot_start_seconds() {
        // Genesis at 100, 12-second slots: slot 2 starts at 124.
        assert_eq!(seconds_since_slot_start(Slot::new(2), 100, 130, 12), Some(6));
        assert_eq!(seconds_since_slot_start(Slot::new(2), 100, 124, 12), Some(0));
        assert_eq!(seconds_since_slot_start(Slot::new(2), 100, 123, 12), None);
    }

    #[test]
    fn early_arrival_is_strict() {
        let spec = ChainSpec::mainnet();
        // The boost window is 12 / 3 = 4 seconds.
        assert!(arrived_early(Slot::new(0), 100, 103, &spec));
        assert!(!arrived_early(Slot::new(0), 100, 104, &spec));
        assert!(!arrived_early(Slot::new(0), 100, 99, &spec));
    }

    #[test]
    fn orphan_check_cutoff_is_inclusive() {
        let spec = ChainSpec::mainnet();
        assert!(!arrived_after_orphan_check(Slot::new(0), 100, 109, &spec));
        assert!(arrived_after_orphan_check(Slot::new(0), 100, 110, &spec));
    }
}
