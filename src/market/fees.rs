//! Fee schedules and the balance-tiered fee lookup.
//!
//! Fees are expressed in basis points (1 bps = 0.01%). The market stores a
//! [`FeeType`] at init and resolves it to a concrete [`FeeSchedule`] at
//! crank time through a pure function of the payer's fee-token balance.
//! Resolution is wired through settlement and the protocol share is
//! accrued, but no coin moves yet.
//
// TODO: route accrued protocol fees into a treasury account once the tier
// numbers are finalized.

use serde::{Deserialize, Serialize};

/// Maker/taker fee pair in basis points. Negative maker values are
/// rebates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Maker fee in basis points (negative = rebate).
    pub maker_fee_bps: i32,
    /// Taker fee in basis points; never negative.
    pub taker_fee_bps: i32,
}

impl FeeSchedule {
    pub fn new(maker_fee_bps: i32, taker_fee_bps: i32) -> Self {
        Self {
            maker_fee_bps,
            taker_fee_bps,
        }
    }

    /// A schedule that charges nothing.
    pub fn zero_fee() -> Self {
        Self::new(0, 0)
    }

    #[inline]
    pub fn is_zero_fee(&self) -> bool {
        self.maker_fee_bps == 0 && self.taker_fee_bps == 0
    }

    /// Fee for a notional amount. Positive values are charges, negative
    /// values rebates.
    #[must_use = "Fee calculation result must be used"]
    #[inline]
    pub fn calculate_fee(&self, notional: u128, is_maker: bool) -> i128 {
        let bps = if is_maker {
            self.maker_fee_bps
        } else {
            self.taker_fee_bps
        };
        (notional as i128)
            .checked_mul(bps as i128)
            .map(|product| product / 10_000)
            .unwrap_or(i128::MAX)
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::zero_fee()
    }
}

/// One rung of a balance-tiered schedule: holding at least
/// `min_token_balance` of the fee token grants `schedule`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTier {
    /// Minimum fee-token balance, in raw coin units.
    pub min_token_balance: u64,
    pub schedule: FeeSchedule,
}

/// Fee policy attached to a market at init.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeType {
    /// Same schedule for everyone.
    Flat(FeeSchedule),
    /// Schedule improves with fee-token balance. Tiers must be sorted by
    /// ascending `min_token_balance`, the first at zero.
    Tiered(Vec<FeeTier>),
}

impl FeeType {
    /// Charge-free flat policy.
    pub fn free() -> Self {
        FeeType::Flat(FeeSchedule::zero_fee())
    }

    /// A fee type is usable when its tiers cover every balance from zero
    /// up, in ascending order.
    pub fn is_valid(&self) -> bool {
        match self {
            FeeType::Flat(_) => true,
            FeeType::Tiered(tiers) => {
                !tiers.is_empty()
                    && tiers[0].min_token_balance == 0
                    && tiers
                        .windows(2)
                        .all(|w| w[0].min_token_balance < w[1].min_token_balance)
            }
        }
    }

    /// Resolve the schedule for a payer holding `token_balance` of the fee
    /// token. Pure: same inputs, same schedule.
    pub fn fees_for_balance(&self, token_balance: u64) -> FeeSchedule {
        match self {
            FeeType::Flat(schedule) => *schedule,
            FeeType::Tiered(tiers) => tiers
                .iter()
                .take_while(|tier| tier.min_token_balance <= token_balance)
                .last()
                .map(|tier| tier.schedule)
                .unwrap_or_default(),
        }
    }

    /// The protocol's share of a fill's notional, in the same units as the
    /// notional. Currently the taker fee, pending tier finalization.
    pub fn protocol_fee(&self, token_balance: u64, notional: u128) -> i128 {
        self.fees_for_balance(token_balance)
            .calculate_fee(notional, false)
    }
}
