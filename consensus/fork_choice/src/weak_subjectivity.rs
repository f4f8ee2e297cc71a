use slog::{debug, info, Logger};
use types::{ChainSpec, Checkpoint, Epoch, Hash256, Slot};

/// The minimal probe into block storage needed by the weak-subjectivity
/// check. The store is consulted, never mutated.
pub trait BlockDatabase {
    type Error: std::fmt::Debug;

    fn has_block(&self, block_root: Hash256) -> bool;

    /// Roots of every block with a slot in `[start_slot, end_slot)`.
    fn block_roots(&self, start_slot: Slot, end_slot: Slot) -> Result<Vec<Hash256>, Self::Error>;
}

#[derive(Debug)]
pub enum Error<T> {
    /// The weak-subjectivity block is not in the database at all.
    BlockNotFound(Hash256),
    /// The block exists but the canonical chain does not pass through it in
    /// the configured epoch.
    BlockNotInEpoch { root: Hash256, epoch: Epoch },
    Database(T),
}

/// One-shot check that the canonical chain passes through a configured
/// checkpoint once finalization reaches it.
///
/// Reference design:
/// https://github.com/ethereum/consensus-specs/blob/master/specs/phase0/weak-subjectivity.md#weak-subjectivity-sync-procedure
pub struct WeakSubjectivityVerifier<D> {
    enabled: bool,
    verified: bool,
    root: Hash256,
    epoch: Epoch,
    slot: Slot,
    slots_per_epoch: u64,
    db: D,
    log: Logger,
}

impl<D: BlockDatabase> WeakSubjectivityVerifier<D> {
    /// A missing checkpoint, or one at genesis, disables the verifier.
    pub fn new(checkpoint: Option<Checkpoint>, db: D, spec: &ChainSpec, log: Logger) -> Self {
        let checkpoint = match checkpoint.filter(|c| c.epoch != 0 && !c.root.is_zero()) {
            Some(checkpoint) => checkpoint,
            None => {
                debug!(log, "Weak subjectivity checkpoint not provided");
                return Self {
                    enabled: false,
                    verified: false,
                    root: Hash256::zero(),
                    epoch: Epoch::new(0),
                    slot: Slot::new(0),
                    slots_per_epoch: spec.slots_per_epoch,
                    db,
                    log,
                };
            }
        };
        Self {
            enabled: true,
            verified: false,
            root: checkpoint.root,
            epoch: checkpoint.epoch,
            slot: checkpoint.epoch.start_slot(spec.slots_per_epoch),
            slots_per_epoch: spec.slots_per_epoch,
            db,
            log,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Verifies that the canonical chain at the checkpoint epoch contains the
    /// checkpoint root.
    ///
    /// Nothing can be asserted about epochs past finality, so the check waits
    /// until `finalized_epoch` reaches the checkpoint epoch. The first
    /// success latches; further calls are no-ops.
    pub fn verify(&mut self, finalized_epoch: Epoch) -> Result<(), Error<D::Error>> {
        if self.verified || !self.enabled {
            return Ok(());
        }
        if self.epoch > finalized_epoch {
            return Ok(());
        }

        info!(
            self.log,
            "Performing weak subjectivity check";
            "root" => ?self.root,
            "epoch" => %self.epoch,
        );

        if !self.db.has_block(self.root) {
            return Err(Error::BlockNotFound(self.root));
        }

        let end_slot = self.slot + self.slots_per_epoch;
        let roots = self
            .db
            .block_roots(self.slot, end_slot)
            .map_err(Error::Database)?;
        if roots.iter().any(|root| *root == self.root) {
            info!(self.log, "Weak subjectivity check has passed");
            self.verified = true;
            return Ok(());
        }

        Err(Error::BlockNotInEpoch {
            root: self.root,
            epoch: self.epoch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::o;
    use std::cell::RefCell;

    struct MockDatabase {
        blocks: Vec<(Hash256, Slot)>,
        queries: RefCell<usize>,
    }

    impl BlockDatabase for &MockDatabase {
        type Error = String;

        fn has_block(&self, block_root: Hash256) -> bool {
            self.blocks.iter().any(|(root, _)| *root == block_root)
        }

        fn block_roots(
            &self,
            start_slot: Slot,
            end_slot: Slot,
        ) -> Result<Vec<Hash256>, Self::Error> {
            *self.queries.borrow_mut() += 1;
            Ok(self
                .blocks
                .iter()
                .filter(|(_, slot)| *slot >= start_slot && *slot < end_slot)
                .map(|(root, _)| *root)
                .collect())
        }
    }

    fn logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn checkpoint(epoch: u64, root: u64) -> Checkpoint {
        Checkpoint {
            epoch: Epoch::new(epoch),
            root: Hash256::from_low_u64_be(root),
        }
    }

    #[test]
    fn disabled_without_checkpoint() {
        let db = MockDatabase {
            blocks: vec![],
            queries: RefCell::new(0),
        };
        let mut verifier =
            WeakSubjectivityVerifier::new(None, &db, &ChainSpec::minimal(), logger());
        verifier.verify(Epoch::new(100)).expect("should be a no-op");
        assert!(!verifier.is_verified());
        assert_eq!(*db.queries.borrow(), 0);
    }

    #[test]
    fn waits_for_finality_then_latches() {
        let spec = ChainSpec::minimal();
        let root = Hash256::from_low_u64_be(7);
        // Epoch 10 spans slots 80..88 with 8 slots per epoch.
        let db = MockDatabase {
            blocks: vec![(root, Slot::new(83))],
            queries: RefCell::new(0),
        };
        let mut verifier =
            WeakSubjectivityVerifier::new(Some(checkpoint(10, 7)), &db, &spec, logger());

        // Finality has not reached the checkpoint epoch yet.
        verifier.verify(Epoch::new(9)).expect("should wait");
        assert!(!verifier.is_verified());
        assert_eq!(*db.queries.borrow(), 0);

        verifier.verify(Epoch::new(12)).expect("should pass");
        assert!(verifier.is_verified());
        assert_eq!(*db.queries.borrow(), 1);

        // Latched; the database is not consulted again.
        verifier.verify(Epoch::new(13)).expect("should be a no-op");
        assert_eq!(*db.queries.borrow(), 1);
    }

    #[test]
    fn missing_block_fails() {
        let spec = ChainSpec::minimal();
        let db = MockDatabase {
            blocks: vec![],
            queries: RefCell::new(0),
        };
        let mut verifier =
            WeakSubjectivityVerifier::new(Some(checkpoint(10, 7)), &db, &spec, logger());
        assert!(matches!(
            verifier.verify(Epoch::new(12)),
            Err(Error::BlockNotFound(_))
        ));
        assert!(!verifier.is_verified());
    }

    #[test]
    fn block_outside_the_epoch_fails() {
        let spec = ChainSpec::minimal();
        let root = Hash256::from_low_u64_be(7);
        // The block exists but sits in epoch 11, not the configured epoch 10.
        let db = MockDatabase {
            blocks: vec![(root, Slot::new(89))],
            queries: RefCell::new(0),
        };
        let mut verifier =
            WeakSubjectivityVerifier::new(Some(checkpoint(10, 7)), &db, &spec, logger());
        assert!(matches!(
            verifier.verify(Epoch::new(12)),
            Err(Error::BlockNotInEpoch { .. })
        ));
        assert!(!verifier.is_verified());
    }
}
