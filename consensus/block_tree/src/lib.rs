mod block_tree;
mod cancellation;
mod dump;
mod error;
mod justified_balances;
mod votes;

pub use crate::block_tree::{
    node_is_viable_for_head, Block, BlockTree, Iter, ProposerBoost, TreeNode,
};
pub use crate::cancellation::CancellationToken;
pub use crate::dump::{NodeDump, Validity};
pub use crate::justified_balances::{calculate_committee_fraction, JustifiedBalances};
pub use crate::votes::{update_balances, ElasticList, VoteTracker};
pub use error::Error;
