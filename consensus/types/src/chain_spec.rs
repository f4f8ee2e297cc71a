use crate::Epoch;
use serde::{Deserialize, Serialize};

/// Protocol constants consumed by the fork-choice crates.
///
/// Values are runtime configuration so that mainnet and minimal presets (and
/// ad-hoc test networks) share one code path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSpec {
    pub seconds_per_slot: u64,
    pub intervals_per_slot: u64,
    pub slots_per_epoch: u64,
    /// Percentage of the per-slot committee weight granted to a timely
    /// proposal.
    pub proposer_score_boost: u64,
    /// Percentage of the per-slot committee weight below which a late head
    /// block is a re-org candidate.
    pub reorg_weight_threshold: u64,
    pub min_sync_committee_participants: u64,
    pub altair_fork_epoch: Option<Epoch>,
}

impl ChainSpec {
    /// Returns a `ChainSpec` compatible with the Ethereum Foundation
    /// specification.
    pub fn mainnet() -> Self {
        Self {
            seconds_per_slot: 12,
            intervals_per_slot: 3,
            slots_per_epoch: 32,
            proposer_score_boost: 40,
            reorg_weight_threshold: 20,
            min_sync_committee_participants: 1,
            altair_fork_epoch: Some(Epoch::new(74240)),
        }
    }

    /// Returns a `ChainSpec` compatible with the specification suitable for most tests.
    pub fn minimal() -> Self {
        Self {
            seconds_per_slot: 6,
            slots_per_epoch: 8,
            altair_fork_epoch: None,
            ..ChainSpec::mainnet()
        }
    }

    /// Seconds into its slot before which an arriving block earns the
    /// proposer boost.
    pub fn proposer_boost_window(&self) -> u64 {
        self.seconds_per_slot / self.intervals_per_slot
    }
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self::mainnet()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boost_window() {
        assert_eq!(ChainSpec::mainnet().proposer_boost_window(), 4);
        assert_eq!(ChainSpec::minimal().proposer_boost_window(), 2);
    }
}
