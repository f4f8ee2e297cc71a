use safe_arith::{ArithError, SafeArith};

/// Effective balances of the validator set in the justified state, together
/// with the aggregates fork choice derives from them.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct JustifiedBalances {
    /// The effective balances for every validator in the justified state.
    ///
    /// Any validator who is not active in the epoch of the justified state is
    /// assigned a balance of zero.
    pub effective_balances: Vec<u64>,
    /// The sum of `self.effective_balances`.
    pub total_effective_balance: u64,
    /// The number of active validators included in `self.effective_balances`.
    pub num_active_validators: u64,
}

impl JustifiedBalances {
    pub fn from_effective_balances(effective_balances: Vec<u64>) -> Result<Self, ArithError> {
        let mut total_effective_balance = 0u64;
        let mut num_active_validators = 0u64;

        for &balance in &effective_balances {
            if balance != 0 {
                total_effective_balance = total_effective_balance.safe_add(balance)?;
                num_active_validators = num_active_validators.safe_add(1)?;
            }
        }

        Ok(Self {
            effective_balances,
            total_effective_balance,
            num_active_validators,
        })
    }

    /// Total active balance attributable to a single slot's committees.
    pub fn committee_weight(&self, slots_per_epoch: u64) -> u64 {
        self.total_effective_balance
            .checked_div(slots_per_epoch)
            .unwrap_or(0)
    }
}

/// Returns the weight of `proportion`% of one slot's committees, used for the
/// proposer boost and the re-org weight threshold.
///
/// Returns `None` on overflow or division by zero.
pub fn calculate_committee_fraction(
    justified_balances: &JustifiedBalances,
    proportion: u64,
    slots_per_epoch: u64,
) -> Option<u64> {
    justified_balances
        .total_effective_balance
        .checked_div(slots_per_epoch)?
        .checked_mul(proportion)?
        .checked_div(100)
}
