use crate::cancellation::CancellationToken;
use crate::dump::{NodeDump, Validity};
use crate::error::Error;
use safe_arith::SafeArith;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use types::{Epoch, ExecutionBlockHash, Hash256, Slot};

/// A block being registered with the tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub slot: Slot,
    pub root: Hash256,
    /// It is only sane to supply a `None` parent for the anchor block the
    /// tree is built from.
    pub parent_root: Option<Hash256>,
    pub state_root: Hash256,
    /// Zero for blocks without an execution payload.
    pub payload_hash: ExecutionBlockHash,
    pub justified_epoch: Epoch,
    pub finalized_epoch: Epoch,
    /// Wall-clock seconds at which the block arrived.
    pub timestamp: u64,
    pub optimistic: bool,
}

/// The proposer boost applied during the previous head computation, kept so
/// it can be withdrawn before the current one is applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ProposerBoost {
    pub root: Hash256,
    pub score: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TreeNode {
    pub root: Hash256,
    /// The `state_root` is not used by the tree itself, it exists for
    /// upstream components (namely attestation verification).
    pub state_root: Hash256,
    pub slot: Slot,
    /// Wall-clock seconds at which the block was inserted.
    pub timestamp: u64,
    pub payload_hash: ExecutionBlockHash,
    parent: Option<usize>,
    children: Vec<usize>,
    pub justified_epoch: Epoch,
    pub finalized_epoch: Epoch,
    pub unrealized_justified_epoch: Epoch,
    pub unrealized_finalized_epoch: Epoch,
    /// Vote weight attributed directly to this block.
    pub balance: u64,
    weight: u64,
    best_descendant: Option<usize>,
    /// True until the execution layer vouches for the payload.
    pub optimistic: bool,
}

impl TreeNode {
    /// `balance` plus the weight of every child, as of the last weight pass.
    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A node may be the head when its justification agrees with the store's, or
/// lags the current epoch by no more than two epochs. A store that has not
/// justified anything yet accepts every node.
pub fn node_is_viable_for_head(
    node_justified_epoch: Epoch,
    justified_epoch: Epoch,
    current_epoch: Epoch,
) -> bool {
    if justified_epoch == 0 {
        return true;
    }
    node_justified_epoch == justified_epoch || node_justified_epoch + 2u64 >= current_epoch
}

/// The tree of blocks descending from the latest finalized block.
///
/// Nodes live in a slab; the `indices` map is the authoritative set of live
/// blocks and freed slots are recycled. Subtree removal is therefore plain
/// bookkeeping, O(subtree), and indices held by live nodes never move.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockTree {
    pub(crate) nodes: Vec<Option<TreeNode>>,
    free: Vec<usize>,
    pub(crate) indices: HashMap<Hash256, usize>,
    payload_indices: HashMap<ExecutionBlockHash, usize>,
    tree_root: usize,
    previous_proposer_boost: ProposerBoost,
}

impl BlockTree {
    /// Instantiates a tree containing only the given anchor block, which
    /// becomes the tree root. The anchor's `parent_root` is ignored.
    pub fn new(anchor: Block) -> Self {
        let mut tree = Self {
            nodes: Vec::with_capacity(1),
            free: vec![],
            indices: HashMap::with_capacity(1),
            payload_indices: HashMap::new(),
            tree_root: 0,
            previous_proposer_boost: ProposerBoost::default(),
        };

        let index = tree.alloc(TreeNode {
            root: anchor.root,
            state_root: anchor.state_root,
            slot: anchor.slot,
            timestamp: anchor.timestamp,
            payload_hash: anchor.payload_hash,
            parent: None,
            children: vec![],
            justified_epoch: anchor.justified_epoch,
            finalized_epoch: anchor.finalized_epoch,
            unrealized_justified_epoch: anchor.justified_epoch,
            unrealized_finalized_epoch: anchor.finalized_epoch,
            balance: 0,
            weight: 0,
            best_descendant: None,
            optimistic: anchor.optimistic,
        });
        tree.tree_root = index;
        tree.indices.insert(anchor.root, index);
        if !anchor.payload_hash.is_zero() {
            tree.payload_indices.insert(anchor.payload_hash, index);
        }
        tree
    }

    fn alloc(&mut self, node: TreeNode) -> usize {
        if let Some(index) = self.free.pop() {
            self.nodes[index] = Some(node);
            index
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    pub(crate) fn node(&self, index: usize) -> Result<&TreeNode, Error> {
        self.nodes
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidNodeIndex(index))
    }

    pub(crate) fn node_mut(&mut self, index: usize) -> Result<&mut TreeNode, Error> {
        self.nodes
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidNodeIndex(index))
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// The root of the block the tree is currently rooted at.
    pub fn root_hash(&self) -> Result<Hash256, Error> {
        Ok(self.node(self.tree_root)?.root)
    }

    pub fn contains_block(&self, block_root: &Hash256) -> bool {
        self.indices.contains_key(block_root)
    }

    pub fn node_by_root(&self, block_root: &Hash256) -> Option<&TreeNode> {
        let index = self.indices.get(block_root)?;
        self.nodes.get(*index).and_then(Option::as_ref)
    }

    pub fn parent_of(&self, block_root: &Hash256) -> Option<&TreeNode> {
        let parent_index = self.node_by_root(block_root)?.parent?;
        self.nodes.get(parent_index).and_then(Option::as_ref)
    }

    pub fn block_slot(&self, block_root: &Hash256) -> Option<Slot> {
        Some(self.node_by_root(block_root)?.slot)
    }

    pub fn block_slot_and_state_root(&self, block_root: &Hash256) -> Option<(Slot, Hash256)> {
        let node = self.node_by_root(block_root)?;
        Some((node.slot, node.state_root))
    }

    /// Register a block with the tree.
    ///
    /// Duplicate roots are reported so that ingress can decide whether a
    /// replay is interesting; the structure is unchanged either way.
    pub fn on_block(&mut self, block: Block) -> Result<(), Error> {
        if self.indices.contains_key(&block.root) {
            return Err(Error::DuplicateRoot(block.root));
        }

        let parent_root = block
            .parent_root
            .ok_or(Error::UnknownParent(Hash256::zero()))?;
        let parent_index = self
            .indices
            .get(&parent_root)
            .copied()
            .ok_or(Error::UnknownParent(parent_root))?;
        debug_assert!(block.slot > self.node(parent_index)?.slot);

        let node_index = self.alloc(TreeNode {
            root: block.root,
            state_root: block.state_root,
            slot: block.slot,
            timestamp: block.timestamp,
            payload_hash: block.payload_hash,
            parent: Some(parent_index),
            children: vec![],
            justified_epoch: block.justified_epoch,
            finalized_epoch: block.finalized_epoch,
            unrealized_justified_epoch: block.justified_epoch,
            unrealized_finalized_epoch: block.finalized_epoch,
            balance: 0,
            weight: 0,
            best_descendant: None,
            optimistic: block.optimistic,
        });

        self.indices.insert(block.root, node_index);
        if !block.payload_hash.is_zero() {
            self.payload_indices.insert(block.payload_hash, node_index);
        }
        self.node_mut(parent_index)?.children.push(node_index);

        Ok(())
    }

    /// Recomputes every weight from the stored balances, post-order, so each
    /// node sees coherent child weights. The zero root aliases the genesis
    /// block and carries no weight of its own.
    pub fn apply_weight_changes(&mut self, token: &CancellationToken) -> Result<(), Error> {
        self.apply_weight_changes_at(self.tree_root, token)
    }

    fn apply_weight_changes_at(
        &mut self,
        index: usize,
        token: &CancellationToken,
    ) -> Result<(), Error> {
        if token.is_canceled() {
            return Err(Error::Canceled);
        }

        let children = self.node(index)?.children.clone();
        let mut children_weight = 0u64;
        for child_index in children {
            self.apply_weight_changes_at(child_index, token)?;
            children_weight = children_weight.saturating_add(self.node(child_index)?.weight);
        }

        let node = self.node_mut(index)?;
        if node.root.is_zero() {
            return Ok(());
        }
        node.weight = node.balance.saturating_add(children_weight);
        Ok(())
    }

    /// Refreshes the cached best-descendant pointers, post-order.
    ///
    /// For every internal node the child that leads to a viable head with the
    /// highest weight wins; equal weights fall back to the byte-wise greater
    /// root.
    pub fn update_best_descendants(
        &mut self,
        justified_epoch: Epoch,
        current_epoch: Epoch,
        token: &CancellationToken,
    ) -> Result<(), Error> {
        self.update_best_descendant_at(self.tree_root, justified_epoch, current_epoch, token)
    }

    fn update_best_descendant_at(
        &mut self,
        index: usize,
        justified_epoch: Epoch,
        current_epoch: Epoch,
        token: &CancellationToken,
    ) -> Result<(), Error> {
        if token.is_canceled() {
            return Err(Error::Canceled);
        }

        let children = self.node(index)?.children.clone();
        if children.is_empty() {
            self.node_mut(index)?.best_descendant = None;
            return Ok(());
        }

        let mut best_child: Option<usize> = None;
        let mut best_weight = 0u64;
        for child_index in children {
            self.update_best_descendant_at(child_index, justified_epoch, current_epoch, token)?;

            let child = self.node(child_index)?;
            if !self.node_leads_to_viable_head(child, justified_epoch, current_epoch)? {
                continue;
            }

            match best_child {
                None => {
                    best_child = Some(child_index);
                    best_weight = child.weight;
                }
                Some(best_index) => {
                    if child.weight == best_weight {
                        // Tie-breaker of equal weights by root.
                        if child.root > self.node(best_index)?.root {
                            best_child = Some(child_index);
                        }
                    } else if child.weight > best_weight {
                        best_child = Some(child_index);
                        best_weight = child.weight;
                    }
                }
            }
        }

        let best_descendant = match best_child {
            Some(best_index) => Some(self.node(best_index)?.best_descendant.unwrap_or(best_index)),
            None => None,
        };
        self.node_mut(index)?.best_descendant = best_descendant;
        Ok(())
    }

    /// Indicates if the node itself is viable for the head, or if its best
    /// descendant is viable for the head.
    fn node_leads_to_viable_head(
        &self,
        node: &TreeNode,
        justified_epoch: Epoch,
        current_epoch: Epoch,
    ) -> Result<bool, Error> {
        let head_epoch = match node.best_descendant {
            Some(best_descendant_index) => self.node(best_descendant_index)?.justified_epoch,
            None => node.justified_epoch,
        };
        Ok(node_is_viable_for_head(
            head_epoch,
            justified_epoch,
            current_epoch,
        ))
    }

    /// Follows the cached best-descendant pointer of the justified block.
    ///
    /// Only meaningful after `apply_weight_changes` and
    /// `update_best_descendants` have run for the current vote state.
    pub fn head(&self, justified_root: &Hash256) -> Result<Hash256, Error> {
        let justified_index = self
            .indices
            .get(justified_root)
            .copied()
            .ok_or(Error::JustifiedNodeUnknown(*justified_root))?;
        let justified_node = self.node(justified_index)?;
        let best_descendant_index = justified_node.best_descendant.unwrap_or(justified_index);
        Ok(self.node(best_descendant_index)?.root)
    }

    /// Removes an optimistic, non-root node and its whole subtree, returning
    /// the removed roots post-order.
    ///
    /// The subtree is collected before anything is mutated so cancellation
    /// cannot leave a half-removed tree behind.
    pub fn remove_node(
        &mut self,
        block_root: &Hash256,
        token: &CancellationToken,
    ) -> Result<Vec<Hash256>, Error> {
        let index = self
            .indices
            .get(block_root)
            .copied()
            .ok_or(Error::NodeUnknown(*block_root))?;
        let node = self.node(index)?;
        let parent_index = match (node.optimistic, node.parent) {
            (true, Some(parent_index)) => parent_index,
            _ => return Err(Error::InvalidOptimisticStatus(*block_root)),
        };

        let mut doomed = vec![];
        self.collect_subtree_post_order(index, &mut doomed, token)?;

        self.detach_from_parent(parent_index, index)?;
        let mut removed_roots = Vec::with_capacity(doomed.len());
        for doomed_index in doomed {
            removed_roots.push(self.free_node(doomed_index)?);
        }
        Ok(removed_roots)
    }

    fn collect_subtree_post_order(
        &self,
        index: usize,
        out: &mut Vec<usize>,
        token: &CancellationToken,
    ) -> Result<(), Error> {
        if token.is_canceled() {
            return Err(Error::Canceled);
        }
        for child_index in self.node(index)?.children.iter() {
            self.collect_subtree_post_order(*child_index, out, token)?;
        }
        out.push(index);
        Ok(())
    }

    fn detach_from_parent(&mut self, parent_index: usize, index: usize) -> Result<(), Error> {
        let children = &mut self.node_mut(parent_index)?.children;
        let position = children
            .iter()
            .position(|child_index| *child_index == index)
            .ok_or(Error::InvalidNodeIndex(index))?;
        children.swap_remove(position);
        debug_assert!(!children.contains(&index));
        Ok(())
    }

    fn free_node(&mut self, index: usize) -> Result<Hash256, Error> {
        let node = self
            .nodes
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(Error::InvalidNodeIndex(index))?;
        self.indices.remove(&node.root);
        if self.payload_indices.get(&node.payload_hash) == Some(&index) {
            self.payload_indices.remove(&node.payload_hash);
        }
        if self.previous_proposer_boost.root == node.root {
            self.previous_proposer_boost = ProposerBoost::default();
        }
        self.free.push(index);
        Ok(node.root)
    }

    /// Handles an execution-layer verdict that the payload of `block_root` is
    /// invalid, with `last_valid_hash` the newest payload the execution chain
    /// accepts. Removes the whole invalid branch and returns its roots,
    /// post-order; surviving ancestors of the cut are marked valid.
    pub fn set_optimistic_to_invalid(
        &mut self,
        block_root: Hash256,
        parent_root: Hash256,
        last_valid_hash: ExecutionBlockHash,
        token: &CancellationToken,
    ) -> Result<Vec<Hash256>, Error> {
        // Locate the invalid node, falling back to its parent when the block
        // itself was never imported.
        let node_index = match self.indices.get(&block_root).copied() {
            Some(index) => {
                let node = self.node(index)?;
                let registered_parent = match node.parent {
                    Some(parent_index) => Some(self.node(parent_index)?.root),
                    None => None,
                };
                if registered_parent != Some(parent_root) {
                    return Err(Error::InvalidParentRoot(parent_root));
                }
                index
            }
            None => {
                let parent_index = self
                    .indices
                    .get(&parent_root)
                    .copied()
                    .ok_or(Error::NodeUnknown(block_root))?;
                if self.node(parent_index)?.payload_hash == last_valid_hash {
                    return Ok(vec![]);
                }
                parent_index
            }
        };

        // Walk towards the root until the parent carries the last valid
        // payload.
        let mut first_invalid = node_index;
        let mut found_last_valid = false;
        loop {
            if token.is_canceled() {
                return Err(Error::Canceled);
            }
            match self.node(first_invalid)?.parent {
                None => break,
                Some(parent_index) => {
                    if self.node(parent_index)?.payload_hash == last_valid_hash {
                        found_last_valid = true;
                        break;
                    }
                    first_invalid = parent_index;
                }
            }
        }

        // The last valid payload may be on a different fork; such an
        // execution client is out of spec and only the reported node can be
        // trusted to be invalid.
        if !found_last_valid {
            if self.node(node_index)?.root == parent_root {
                return Ok(vec![]);
            }
            first_invalid = node_index;
        }

        let first_invalid_root = self.node(first_invalid)?.root;
        let surviving_parent = match (found_last_valid, self.node(first_invalid)?.parent) {
            (true, Some(parent_index)) => Some(self.node(parent_index)?.root),
            _ => None,
        };

        let removed_roots = self.remove_node(&first_invalid_root, token)?;

        // Everything from the last valid payload towards the root has now
        // been vouched for by the execution layer.
        if let Some(parent_root) = surviving_parent {
            self.set_node_and_parent_validated(&parent_root)?;
        }

        Ok(removed_roots)
    }

    /// Marks the node and all its ancestors as validated.
    pub fn set_node_and_parent_validated(&mut self, block_root: &Hash256) -> Result<(), Error> {
        let mut index = self
            .indices
            .get(block_root)
            .copied()
            .ok_or(Error::NodeUnknown(*block_root))?;
        loop {
            let node = self.node_mut(index)?;
            if !node.optimistic {
                return Ok(());
            }
            node.optimistic = false;
            match node.parent {
                Some(parent_index) => index = parent_index,
                None => return Ok(()),
            }
        }
    }

    /// Re-roots the tree at the newly finalized block. Every node outside its
    /// subtree (including the old root) is removed; votes that referenced the
    /// removed blocks become stale and their deltas are discarded.
    pub fn prune_to_finalized(&mut self, finalized_root: &Hash256) -> Result<Vec<Hash256>, Error> {
        let finalized_index = self
            .indices
            .get(finalized_root)
            .copied()
            .ok_or(Error::FinalizedNodeUnknown(*finalized_root))?;
        if finalized_index == self.tree_root {
            return Ok(vec![]);
        }

        let keep = self.subtree_indices(finalized_index)?;
        let doomed: Vec<usize> = self
            .indices
            .values()
            .copied()
            .filter(|index| !keep.contains(index))
            .collect();

        let mut removed_roots = Vec::with_capacity(doomed.len());
        for index in doomed {
            removed_roots.push(self.free_node(index)?);
        }

        self.node_mut(finalized_index)?.parent = None;
        self.tree_root = finalized_index;
        Ok(removed_roots)
    }

    fn subtree_indices(&self, index: usize) -> Result<HashSet<usize>, Error> {
        let mut indices = HashSet::new();
        let mut stack = vec![index];
        while let Some(index) = stack.pop() {
            indices.insert(index);
            stack.extend(self.node(index)?.children.iter().copied());
        }
        Ok(indices)
    }

    /// Raises a node's unrealized justified epoch. Lowering it indicates a
    /// bug in the caller.
    pub fn set_unrealized_justified_epoch(
        &mut self,
        block_root: &Hash256,
        epoch: Epoch,
    ) -> Result<(), Error> {
        let index = self
            .indices
            .get(block_root)
            .copied()
            .ok_or(Error::NodeUnknown(*block_root))?;
        let node = self.node_mut(index)?;
        if epoch < node.unrealized_justified_epoch {
            return Err(Error::InvalidUnrealizedJustifiedEpoch {
                root: *block_root,
                current: node.unrealized_justified_epoch,
                proposed: epoch,
            });
        }
        node.unrealized_justified_epoch = epoch;
        Ok(())
    }

    /// Raises a node's unrealized finalized epoch. Lowering it indicates a
    /// bug in the caller.
    pub fn set_unrealized_finalized_epoch(
        &mut self,
        block_root: &Hash256,
        epoch: Epoch,
    ) -> Result<(), Error> {
        let index = self
            .indices
            .get(block_root)
            .copied()
            .ok_or(Error::NodeUnknown(*block_root))?;
        let node = self.node_mut(index)?;
        if epoch < node.unrealized_finalized_epoch {
            return Err(Error::InvalidUnrealizedFinalizedEpoch {
                root: *block_root,
                current: node.unrealized_finalized_epoch,
                proposed: epoch,
            });
        }
        node.unrealized_finalized_epoch = epoch;
        Ok(())
    }

    /// Copies the parent's unrealized epochs onto the node. No-op for the
    /// tree root.
    pub fn inherit_parent_unrealized_epochs(&mut self, block_root: &Hash256) -> Result<(), Error> {
        let index = self
            .indices
            .get(block_root)
            .copied()
            .ok_or(Error::NodeUnknown(*block_root))?;
        let parent_index = match self.node(index)?.parent {
            Some(parent_index) => parent_index,
            None => return Ok(()),
        };
        let parent = self.node(parent_index)?;
        let (justified, finalized) = (
            parent.unrealized_justified_epoch,
            parent.unrealized_finalized_epoch,
        );
        let node = self.node_mut(index)?;
        node.unrealized_justified_epoch = justified;
        node.unrealized_finalized_epoch = finalized;
        Ok(())
    }

    /// Overwrites a node's realized epochs, used when a block from a past
    /// epoch realizes its own justification on arrival.
    pub fn promote_realized_epochs(
        &mut self,
        block_root: &Hash256,
        justified_epoch: Epoch,
        finalized_epoch: Epoch,
    ) -> Result<(), Error> {
        debug_assert!(justified_epoch >= finalized_epoch);
        let index = self
            .indices
            .get(block_root)
            .copied()
            .ok_or(Error::NodeUnknown(*block_root))?;
        let node = self.node_mut(index)?;
        node.justified_epoch = justified_epoch;
        node.finalized_epoch = finalized_epoch;
        Ok(())
    }

    /// Copies every node's unrealized epochs into its realized epochs and
    /// returns the highest (justified, finalized) epochs now realized.
    pub fn realize_unrealized_epochs(&mut self) -> (Epoch, Epoch) {
        let mut max_justified = Epoch::new(0);
        let mut max_finalized = Epoch::new(0);
        for node in self.nodes.iter_mut().flatten() {
            node.justified_epoch = node.unrealized_justified_epoch;
            node.finalized_epoch = node.unrealized_finalized_epoch;
            debug_assert!(node.justified_epoch >= node.finalized_epoch);
            max_justified = std::cmp::max(max_justified, node.justified_epoch);
            max_finalized = std::cmp::max(max_finalized, node.finalized_epoch);
        }
        (max_justified, max_finalized)
    }

    /// Subtracts `amount` from the block's balance. Unknown roots are stale
    /// votes and are ignored; an underflow on a live node is a bug.
    pub fn deduct_balance(&mut self, block_root: &Hash256, amount: u64) -> Result<(), Error> {
        if let Some(index) = self.indices.get(block_root).copied() {
            let node = self.node_mut(index)?;
            node.balance = node
                .balance
                .checked_sub(amount)
                .ok_or(Error::BalanceUnderflow {
                    root: *block_root,
                    balance: node.balance,
                    deducted: amount,
                })?;
        }
        Ok(())
    }

    pub(crate) fn credit_balance(&mut self, block_root: &Hash256, amount: u64) -> Result<(), Error> {
        if let Some(index) = self.indices.get(block_root).copied() {
            let node = self.node_mut(index)?;
            node.balance = node.balance.saturating_add(amount);
        }
        Ok(())
    }

    /// Withdraws the boost applied during the previous pass, then grants
    /// `proposer_score_boost`% of the committee weight to the current boost
    /// root. Applying twice with an unchanged boost root leaves every balance
    /// as it was.
    pub fn apply_proposer_boost(
        &mut self,
        proposer_boost_root: Hash256,
        committee_weight: u64,
        proposer_score_boost: u64,
    ) -> Result<u64, Error> {
        let previous = self.previous_proposer_boost;
        if !previous.root.is_zero() {
            if let Some(index) = self.indices.get(&previous.root).copied() {
                let node = self.node_mut(index)?;
                node.balance = node.balance.checked_sub(previous.score).ok_or(
                    Error::BalanceUnderflow {
                        root: previous.root,
                        balance: node.balance,
                        deducted: previous.score,
                    },
                )?;
            }
        }

        let mut score = 0u64;
        if !proposer_boost_root.is_zero() {
            if let Some(index) = self.indices.get(&proposer_boost_root).copied() {
                score = committee_weight
                    .safe_mul(proposer_score_boost)?
                    .safe_div(100)?;
                debug_assert!(score <= committee_weight);
                let node = self.node_mut(index)?;
                node.balance = node.balance.saturating_add(score);
            }
        }

        self.previous_proposer_boost = ProposerBoost {
            root: proposer_boost_root,
            score,
        };
        Ok(score)
    }

    pub fn previous_proposer_boost(&self) -> ProposerBoost {
        self.previous_proposer_boost
    }

    /// Return a reverse iterator over the nodes which comprise the chain
    /// ending at `block_root`.
    pub fn iter_nodes<'a>(&'a self, block_root: &Hash256) -> Iter<'a> {
        let next_node_index = self.indices.get(block_root).copied();
        Iter {
            next_node_index,
            tree: self,
        }
    }

    /// Return a reverse iterator over the block roots of the chain ending at
    /// `block_root`.
    ///
    /// Note that unlike many other iterators, this one WILL NOT yield
    /// anything at skipped slots.
    pub fn iter_block_roots<'a>(
        &'a self,
        block_root: &Hash256,
    ) -> impl Iterator<Item = (Hash256, Slot)> + 'a {
        self.iter_nodes(block_root).map(|node| (node.root, node.slot))
    }

    /// Returns the root of the ancestor of `block_root` at `ancestor_slot`.
    /// Skipped slots resolve to the most recent block at or before the
    /// queried slot.
    pub fn ancestor_root(
        &self,
        block_root: &Hash256,
        ancestor_slot: Slot,
    ) -> Result<Option<Hash256>, Error> {
        let node = self
            .node_by_root(block_root)
            .ok_or(Error::NodeUnknown(*block_root))?;
        match node.slot.cmp(&ancestor_slot) {
            Ordering::Greater => Ok(self
                .iter_nodes(block_root)
                .find(|node| node.slot <= ancestor_slot)
                .map(|node| node.root)),
            Ordering::Less | Ordering::Equal => Ok(Some(*block_root)),
        }
    }

    /// Returns the root of the deepest block that is an ancestor of both
    /// arguments.
    pub fn common_ancestor_root(&self, a: &Hash256, b: &Hash256) -> Result<Hash256, Error> {
        let mut a = self.node_by_root(a).ok_or(Error::NodeUnknown(*a))?;
        let mut b = self.node_by_root(b).ok_or(Error::NodeUnknown(*b))?;
        loop {
            if a.root == b.root {
                return Ok(a.root);
            }
            // Step the deeper chain towards the root; both chains meet at the
            // tree root at the latest.
            if a.slot >= b.slot {
                let parent_index = a.parent.ok_or(Error::NodeUnknown(a.root))?;
                a = self.node(parent_index)?;
            } else {
                let parent_index = b.parent.ok_or(Error::NodeUnknown(b.root))?;
                b = self.node(parent_index)?;
            }
        }
    }

    /// Roots and slots of every leaf.
    pub fn tips(&self) -> Vec<(Hash256, Slot)> {
        self.nodes
            .iter()
            .flatten()
            .filter(|node| node.children.is_empty())
            .map(|node| (node.root, node.slot))
            .collect()
    }

    /// Snapshots the whole tree pre-order, children in insertion order.
    pub fn node_tree_dump(&self, token: &CancellationToken) -> Result<Vec<NodeDump>, Error> {
        let mut nodes = Vec::with_capacity(self.len());
        self.dump_node(self.tree_root, &mut nodes, token)?;
        Ok(nodes)
    }

    fn dump_node(
        &self,
        index: usize,
        out: &mut Vec<NodeDump>,
        token: &CancellationToken,
    ) -> Result<(), Error> {
        if token.is_canceled() {
            return Err(Error::Canceled);
        }
        let node = self.node(index)?;
        let parent_root = match node.parent {
            Some(parent_index) => self.node(parent_index)?.root,
            None => Hash256::zero(),
        };
        out.push(NodeDump {
            slot: node.slot,
            root: node.root,
            parent_root,
            justified_epoch: node.justified_epoch,
            finalized_epoch: node.finalized_epoch,
            unrealized_justified_epoch: node.unrealized_justified_epoch,
            unrealized_finalized_epoch: node.unrealized_finalized_epoch,
            balance: node.balance,
            weight: node.weight,
            execution_optimistic: node.optimistic,
            execution_block_hash: node.payload_hash,
            timestamp: node.timestamp,
            validity: if node.optimistic {
                Validity::Optimistic
            } else {
                Validity::Valid
            },
        });
        for child_index in node.children.iter() {
            self.dump_node(*child_index, out, token)?;
        }
        Ok(())
    }
}

/// Reverse iterator over one path through a `BlockTree`.
pub struct Iter<'a> {
    next_node_index: Option<usize>,
    tree: &'a BlockTree,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a TreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let next_node_index = self.next_node_index?;
        let node = self.tree.nodes.get(next_node_index)?.as_ref()?;
        self.next_node_index = node.parent;
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(i: u64) -> Hash256 {
        Hash256::from_low_u64_be(i)
    }

    fn payload(i: u64) -> ExecutionBlockHash {
        ExecutionBlockHash::from_root(Hash256::from_low_u64_be(i + 1000))
    }

    fn block(i: u64, parent: Option<u64>, slot: u64) -> Block {
        Block {
            slot: Slot::new(slot),
            root: root(i),
            parent_root: parent.map(root),
            state_root: Hash256::zero(),
            payload_hash: ExecutionBlockHash::zero(),
            justified_epoch: Epoch::new(0),
            finalized_epoch: Epoch::new(0),
            timestamp: 0,
            optimistic: false,
        }
    }

    fn optimistic_block(i: u64, parent: Option<u64>, slot: u64) -> Block {
        Block {
            payload_hash: payload(i),
            optimistic: true,
            ..block(i, parent, slot)
        }
    }

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    /// Anchor 1 with children 2 and 3, where 3 has the greater root.
    fn forked_tree() -> BlockTree {
        let mut tree = BlockTree::new(block(1, None, 0));
        tree.on_block(block(2, Some(1), 1)).expect("should insert 2");
        tree.on_block(block(3, Some(1), 1)).expect("should insert 3");
        tree
    }

    fn refresh(tree: &mut BlockTree) {
        tree.apply_weight_changes(&token()).expect("should weigh");
        tree.update_best_descendants(Epoch::new(0), Epoch::new(0), &token())
            .expect("should update best descendants");
    }

    #[test]
    fn duplicate_insertion_is_reported() {
        let mut tree = forked_tree();
        assert_eq!(
            tree.on_block(block(2, Some(1), 1)),
            Err(Error::DuplicateRoot(root(2)))
        );
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn unknown_parent_is_reported() {
        let mut tree = forked_tree();
        assert_eq!(
            tree.on_block(block(4, Some(42), 2)),
            Err(Error::UnknownParent(root(42)))
        );
    }

    #[test]
    fn tie_break_prefers_greater_root() {
        let mut tree = forked_tree();
        refresh(&mut tree);
        // Equal zero weights; the byte-wise greater root wins.
        assert_eq!(tree.head(&root(1)), Ok(root(3)));
    }

    #[test]
    fn vote_weight_beats_tie_break() {
        let mut tree = forked_tree();
        tree.credit_balance(&root(2), 32).expect("should credit");
        refresh(&mut tree);
        assert_eq!(tree.head(&root(1)), Ok(root(2)));
    }

    #[test]
    fn weight_is_balance_plus_children() {
        let mut tree = forked_tree();
        tree.on_block(block(4, Some(2), 2)).expect("should insert 4");
        tree.credit_balance(&root(2), 10).expect("should credit");
        tree.credit_balance(&root(4), 5).expect("should credit");
        refresh(&mut tree);

        let node_4 = tree.node_by_root(&root(4)).expect("4 should exist");
        assert_eq!(node_4.weight(), 5);
        let node_2 = tree.node_by_root(&root(2)).expect("2 should exist");
        assert_eq!(node_2.weight(), 15);
        assert_eq!(tree.head(&root(1)), Ok(root(4)));
    }

    #[test]
    fn unviable_branch_is_filtered() {
        let mut tree = BlockTree::new(block(1, None, 0));
        tree.on_block(Block {
            justified_epoch: Epoch::new(1),
            ..block(2, Some(1), 1)
        })
        .expect("should insert 2");
        tree.on_block(Block {
            justified_epoch: Epoch::new(3),
            ..block(3, Some(1), 1)
        })
        .expect("should insert 3");
        tree.credit_balance(&root(2), 100).expect("should credit");

        tree.apply_weight_changes(&token()).expect("should weigh");
        // Store justified at epoch 3, current epoch 6: node 2 is stuck at
        // justified epoch 1, more than two epochs behind.
        tree.update_best_descendants(Epoch::new(3), Epoch::new(6), &token())
            .expect("should update best descendants");

        assert_eq!(tree.head(&root(1)), Ok(root(3)));
    }

    #[test]
    fn head_on_unknown_justified_root() {
        let tree = forked_tree();
        assert_eq!(
            tree.head(&root(42)),
            Err(Error::JustifiedNodeUnknown(root(42)))
        );
    }

    #[test]
    fn leaf_without_children_is_its_own_head() {
        let mut tree = forked_tree();
        refresh(&mut tree);
        assert_eq!(tree.head(&root(3)), Ok(root(3)));
    }

    #[test]
    fn remove_node_returns_post_order_and_detaches() {
        let mut tree = BlockTree::new(block(1, None, 0));
        tree.on_block(optimistic_block(2, Some(1), 1))
            .expect("should insert 2");
        tree.on_block(optimistic_block(3, Some(2), 2))
            .expect("should insert 3");
        tree.on_block(optimistic_block(4, Some(2), 2))
            .expect("should insert 4");

        let removed = tree
            .remove_node(&root(2), &token())
            .expect("should remove subtree");
        assert_eq!(*removed.last().expect("non-empty"), root(2));
        assert_eq!(removed.len(), 3);
        assert!(!tree.contains_block(&root(2)));
        assert!(!tree.contains_block(&root(3)));
        assert!(!tree.contains_block(&root(4)));
        assert!(tree.contains_block(&root(1)));
        assert!(tree
            .node_by_root(&root(1))
            .expect("1 should exist")
            .is_leaf());
    }

    #[test]
    fn remove_node_rejects_validated_or_root_nodes() {
        let mut tree = forked_tree();
        assert_eq!(
            tree.remove_node(&root(2), &token()),
            Err(Error::InvalidOptimisticStatus(root(2)))
        );
        assert_eq!(
            tree.remove_node(&root(1), &token()),
            Err(Error::InvalidOptimisticStatus(root(1)))
        );
    }

    #[test]
    fn removal_slots_are_recycled() {
        let mut tree = BlockTree::new(block(1, None, 0));
        tree.on_block(optimistic_block(2, Some(1), 1))
            .expect("should insert 2");
        tree.remove_node(&root(2), &token()).expect("should remove");
        tree.on_block(optimistic_block(3, Some(1), 1))
            .expect("should insert 3");
        assert_eq!(tree.nodes.len(), 2, "freed slot should be reused");
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn invalidation_cuts_back_to_last_valid_payload() {
        let mut tree = BlockTree::new(Block {
            payload_hash: payload(1),
            ..block(1, None, 0)
        });
        tree.on_block(optimistic_block(2, Some(1), 1))
            .expect("should insert 2");
        tree.on_block(optimistic_block(3, Some(2), 2))
            .expect("should insert 3");

        // The execution layer rejects 3 and certifies 1's payload as the
        // newest valid one, so 2 falls as well.
        let removed = tree
            .set_optimistic_to_invalid(root(3), root(2), payload(1), &token())
            .expect("should invalidate");
        assert_eq!(removed, vec![root(3), root(2)]);
        assert!(tree.contains_block(&root(1)));
        assert!(
            !tree.node_by_root(&root(1)).expect("1 should exist").optimistic,
            "the surviving ancestor should be validated"
        );
    }

    #[test]
    fn invalidation_of_unimported_block_with_valid_parent_is_a_no_op() {
        let mut tree = BlockTree::new(Block {
            payload_hash: payload(1),
            ..block(1, None, 0)
        });
        tree.on_block(optimistic_block(2, Some(1), 1))
            .expect("should insert 2");

        // Block 9 was never imported; its parent carries the last valid
        // payload, so there is nothing to remove.
        let removed = tree
            .set_optimistic_to_invalid(root(9), root(2), payload(2), &token())
            .expect("should be a no-op");
        assert!(removed.is_empty());
        assert!(tree.contains_block(&root(2)));
    }

    #[test]
    fn invalidation_with_unknown_node_and_parent_fails() {
        let mut tree = forked_tree();
        assert_eq!(
            tree.set_optimistic_to_invalid(root(9), root(8), payload(1), &token()),
            Err(Error::NodeUnknown(root(9)))
        );
    }

    #[test]
    fn invalidation_with_mismatched_parent_fails() {
        let mut tree = BlockTree::new(block(1, None, 0));
        tree.on_block(optimistic_block(2, Some(1), 1))
            .expect("should insert 2");
        tree.on_block(optimistic_block(3, Some(2), 2))
            .expect("should insert 3");
        assert_eq!(
            tree.set_optimistic_to_invalid(root(3), root(1), payload(1), &token()),
            Err(Error::InvalidParentRoot(root(1)))
        );
    }

    #[test]
    fn invalidation_with_foreign_last_valid_hash_removes_only_reported_node() {
        let mut tree = BlockTree::new(block(1, None, 0));
        tree.on_block(optimistic_block(2, Some(1), 1))
            .expect("should insert 2");
        tree.on_block(optimistic_block(3, Some(2), 2))
            .expect("should insert 3");

        // No payload on this chain matches, so only the reported branch is
        // dropped and nothing is promoted.
        let removed = tree
            .set_optimistic_to_invalid(root(3), root(2), payload(77), &token())
            .expect("should invalidate");
        assert_eq!(removed, vec![root(3)]);
        assert!(tree.contains_block(&root(2)));
        assert!(
            tree.node_by_root(&root(2)).expect("2 should exist").optimistic,
            "nothing should be promoted without a matching payload"
        );
    }

    #[test]
    fn prune_to_finalized_reroots_the_tree() {
        let mut tree = BlockTree::new(block(1, None, 0));
        tree.on_block(block(2, Some(1), 1)).expect("should insert 2");
        tree.on_block(block(3, Some(2), 2)).expect("should insert 3");
        tree.on_block(block(4, Some(1), 1)).expect("should insert 4");

        let removed = tree
            .prune_to_finalized(&root(2))
            .expect("should prune");
        assert_eq!(removed.len(), 2);
        assert!(removed.contains(&root(1)));
        assert!(removed.contains(&root(4)));
        assert_eq!(tree.root_hash(), Ok(root(2)));
        assert!(!tree
            .node_by_root(&root(2))
            .expect("2 should exist")
            .has_parent());
        assert!(tree.contains_block(&root(3)));

        refresh(&mut tree);
        assert_eq!(tree.head(&root(2)), Ok(root(3)));
    }

    #[test]
    fn prune_to_current_root_is_a_no_op() {
        let mut tree = forked_tree();
        let removed = tree.prune_to_finalized(&root(1)).expect("should prune");
        assert!(removed.is_empty());
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn canceled_weight_walk_returns_canceled() {
        let mut tree = forked_tree();
        let canceled = CancellationToken::new();
        canceled.cancel();
        assert_eq!(tree.apply_weight_changes(&canceled), Err(Error::Canceled));
        assert_eq!(
            tree.update_best_descendants(Epoch::new(0), Epoch::new(0), &canceled),
            Err(Error::Canceled)
        );
        assert_eq!(tree.node_tree_dump(&canceled), Err(Error::Canceled));
    }

    #[test]
    fn canceled_removal_leaves_the_tree_intact() {
        let mut tree = BlockTree::new(block(1, None, 0));
        tree.on_block(optimistic_block(2, Some(1), 1))
            .expect("should insert 2");
        tree.on_block(optimistic_block(3, Some(2), 2))
            .expect("should insert 3");
        let canceled = CancellationToken::new();
        canceled.cancel();

        assert_eq!(
            tree.remove_node(&root(2), &canceled),
            Err(Error::Canceled)
        );
        assert!(tree.contains_block(&root(2)));
        assert!(tree.contains_block(&root(3)));
        assert!(!tree
            .node_by_root(&root(1))
            .expect("1 should exist")
            .is_leaf());
    }

    #[test]
    fn proposer_boost_is_applied_and_withdrawn() {
        let mut tree = forked_tree();
        let score = tree
            .apply_proposer_boost(root(2), 1000, 40)
            .expect("should boost");
        assert_eq!(score, 400);
        assert_eq!(
            tree.node_by_root(&root(2)).expect("2 should exist").balance,
            400
        );

        // A second pass with the boost root cleared withdraws the bonus.
        tree.apply_proposer_boost(Hash256::zero(), 1000, 40)
            .expect("should withdraw");
        assert_eq!(
            tree.node_by_root(&root(2)).expect("2 should exist").balance,
            0
        );
    }

    #[test]
    fn proposer_boost_is_idempotent_for_an_unchanged_root() {
        let mut tree = forked_tree();
        tree.apply_proposer_boost(root(2), 1000, 40)
            .expect("should boost");
        tree.apply_proposer_boost(root(2), 1000, 40)
            .expect("should boost again");
        assert_eq!(
            tree.node_by_root(&root(2)).expect("2 should exist").balance,
            400,
            "re-applying with an unchanged root should not stack"
        );
    }

    #[test]
    fn removing_the_boosted_node_clears_the_previous_boost() {
        let mut tree = BlockTree::new(block(1, None, 0));
        tree.on_block(optimistic_block(2, Some(1), 1))
            .expect("should insert 2");
        tree.apply_proposer_boost(root(2), 1000, 40)
            .expect("should boost");
        tree.remove_node(&root(2), &token()).expect("should remove");
        assert_eq!(tree.previous_proposer_boost(), ProposerBoost::default());
    }

    #[test]
    fn unrealized_epochs_never_move_backwards() {
        let mut tree = forked_tree();
        tree.set_unrealized_justified_epoch(&root(2), Epoch::new(3))
            .expect("should raise");
        assert!(matches!(
            tree.set_unrealized_justified_epoch(&root(2), Epoch::new(2)),
            Err(Error::InvalidUnrealizedJustifiedEpoch { .. })
        ));
    }

    #[test]
    fn realize_unrealized_epochs_reports_the_maxima() {
        let mut tree = forked_tree();
        tree.set_unrealized_justified_epoch(&root(2), Epoch::new(4))
            .expect("should raise");
        tree.set_unrealized_finalized_epoch(&root(2), Epoch::new(3))
            .expect("should raise");
        let (justified, finalized) = tree.realize_unrealized_epochs();
        assert_eq!(justified, Epoch::new(4));
        assert_eq!(finalized, Epoch::new(3));
        let node = tree.node_by_root(&root(2)).expect("2 should exist");
        assert_eq!(node.justified_epoch, Epoch::new(4));
        assert_eq!(node.finalized_epoch, Epoch::new(3));
    }

    #[test]
    fn dump_is_pre_order_by_insertion() {
        let mut tree = forked_tree();
        tree.on_block(block(4, Some(2), 2)).expect("should insert 4");
        let dump = tree.node_tree_dump(&token()).expect("should dump");
        let roots: Vec<_> = dump.iter().map(|node| node.root).collect();
        assert_eq!(roots, vec![root(1), root(2), root(4), root(3)]);
        assert_eq!(dump[0].parent_root, Hash256::zero());
        assert_eq!(dump[1].parent_root, root(1));
        assert_eq!(dump[1].validity, Validity::Valid);
    }

    #[test]
    fn ancestor_root_accounts_for_skipped_slots() {
        let mut tree = BlockTree::new(block(1, None, 0));
        tree.on_block(block(2, Some(1), 3)).expect("should insert 2");
        tree.on_block(block(3, Some(2), 7)).expect("should insert 3");

        assert_eq!(tree.ancestor_root(&root(3), Slot::new(3)), Ok(Some(root(2))));
        // Slot 5 was skipped; the most recent block at or before it answers.
        assert_eq!(tree.ancestor_root(&root(3), Slot::new(5)), Ok(Some(root(2))));
        assert_eq!(tree.ancestor_root(&root(3), Slot::new(9)), Ok(Some(root(3))));
        assert_eq!(
            tree.ancestor_root(&root(9), Slot::new(1)),
            Err(Error::NodeUnknown(root(9)))
        );
    }

    #[test]
    fn common_ancestor_of_forked_branches() {
        let mut tree = forked_tree();
        tree.on_block(block(4, Some(2), 5)).expect("should insert 4");
        assert_eq!(tree.common_ancestor_root(&root(4), &root(3)), Ok(root(1)));
        assert_eq!(tree.common_ancestor_root(&root(4), &root(2)), Ok(root(2)));
    }

    #[test]
    fn tips_are_the_leaves() {
        let mut tree = forked_tree();
        tree.on_block(block(4, Some(2), 2)).expect("should insert 4");
        let mut tips = tree.tips();
        tips.sort();
        assert_eq!(tips, vec![(root(3), Slot::new(1)), (root(4), Slot::new(2))]);
    }
}
