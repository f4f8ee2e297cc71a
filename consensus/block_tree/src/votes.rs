use crate::block_tree::BlockTree;
use crate::error::Error;
use std::collections::BTreeSet;
use types::{Epoch, Hash256, Slot};

/// The latest attestation known for a single validator.
///
/// `next_*` is the freshest attestation seen; `current_root` is the vote
/// whose weight is presently applied to the tree. The two converge when the
/// attestation's slot has passed.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct VoteTracker {
    pub current_root: Hash256,
    pub next_root: Hash256,
    pub next_epoch: Epoch,
    pub next_slot: Slot,
}

/// A Vec-wrapper which will grow to match any request.
///
/// E.g., a `get_mut` to an out-of-bounds element will cause the Vec to grow
/// (using Default) to the smallest size required to fulfill the request.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct ElasticList<T>(pub Vec<T>);

impl<T> ElasticList<T>
where
    T: Default,
{
    fn ensure(&mut self, i: usize) {
        if self.0.len() <= i {
            self.0.resize_with(i + 1, Default::default);
        }
    }

    pub fn get_mut(&mut self, i: usize) -> &mut T {
        self.ensure(i);
        &mut self.0[i]
    }

    pub fn get(&self, i: usize) -> Option<&T> {
        self.0.get(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.0.iter_mut()
    }
}

/// Moves every validator's applied vote weight from its previous target to
/// its latest one, and reconciles balance changes between the old and new
/// justified states.
///
/// A vote participates once its attestation slot is no later than
/// `current_slot`; until then only the balance change is reconciled against
/// the currently applied target. Deltas against roots that are no longer in
/// the tree are discarded (the vote is stale). Slashed validators are skipped
/// entirely.
pub fn update_balances(
    tree: &mut BlockTree,
    votes: &mut ElasticList<VoteTracker>,
    old_balances: &[u64],
    new_balances: &[u64],
    slashed_indices: &BTreeSet<u64>,
    current_slot: Slot,
) -> Result<(), Error> {
    for (validator_index, vote) in votes.0.iter_mut().enumerate() {
        if slashed_indices.contains(&(validator_index as u64)) {
            continue;
        }

        // There is no need to move any weight if the validator has never
        // voted; both roots being zero is the untouched default.
        if vote.current_root.is_zero() && vote.next_root.is_zero() {
            continue;
        }

        // A validator missing from either balance snapshot contributes zero
        // on that side. Validator sets can differ between justified states
        // on different forks.
        let old_balance = old_balances.get(validator_index).copied().unwrap_or(0);
        let new_balance = new_balances.get(validator_index).copied().unwrap_or(0);

        let vote_ready = vote.next_slot <= current_slot;
        let target_root = if vote_ready {
            vote.next_root
        } else {
            vote.current_root
        };

        if vote.current_root != target_root || old_balance != new_balance {
            if !vote.current_root.is_zero() {
                tree.deduct_balance(&vote.current_root, old_balance)?;
            }
            if !target_root.is_zero() {
                tree.credit_balance(&target_root, new_balance)?;
            }
        }

        if vote_ready {
            vote.current_root = vote.next_root;
        }
    }
    Ok(())
}
