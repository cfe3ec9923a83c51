// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Time-weighted average balances and tiered reward assignment.

use std::collections::BTreeMap;

use alloy::primitives::{Address, I256, U256};
use serde::{Deserialize, Serialize};

use crate::{tracker::BalanceSeries, RewardsError, TrackingWindow};

/// One reward tier: accounts whose weighted average balance is at least
/// `threshold` (and below the next tier's) receive the flat `reward`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    /// Minimum weighted average balance, in the token's smallest unit.
    pub threshold: U256,
    /// Flat reward paid, in the token's smallest unit.
    pub reward: U256,
}

/// Tier table ordered ascending by threshold.
///
/// Always passed explicitly into the calculator so tests and deployments can
/// parameterize freely; there is no built-in table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTable(Vec<Tier>);

impl TierTable {
    /// Validate and build a table. Thresholds must be strictly ascending and
    /// the table non-empty.
    pub fn new(tiers: Vec<Tier>) -> Result<Self, RewardsError> {
        if tiers.is_empty() {
            return Err(RewardsError::Config("tier table must not be empty".into()));
        }
        if tiers.windows(2).any(|w| w[0].threshold >= w[1].threshold) {
            return Err(RewardsError::Config(
                "tier thresholds must be strictly ascending".into(),
            ));
        }
        Ok(Self(tiers))
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.0
    }

    /// Reward for a weighted balance sum over a window of `window_len`
    /// blocks: the highest tier whose threshold does not exceed the weighted
    /// average. `None` below the lowest threshold.
    ///
    /// The comparison `average >= threshold` is evaluated as
    /// `weighted_sum >= threshold * window_len` so no division (and no
    /// rounding) ever happens.
    fn flat_reward(&self, weighted_sum: I256, window_len: u64) -> Option<U256> {
        if weighted_sum.is_negative() {
            return None;
        }
        let sum = weighted_sum.into_raw();
        let len = U256::from(window_len);
        self.0
            .iter()
            .rev()
            .find(|tier| tier.threshold.checked_mul(len).is_some_and(|scaled| scaled <= sum))
            .map(|tier| tier.reward)
    }
}

/// Time-integral of the series' balance over the window, in
/// balance-times-blocks units.
///
/// Each sample weighs its balance by the distance to the next sample, the
/// last one by the distance to `window.end`.
pub fn weighted_sum(series: &BalanceSeries, window: TrackingWindow) -> I256 {
    let samples = series.samples();
    let mut sum = I256::ZERO;
    for (i, sample) in samples.iter().enumerate() {
        let next_block = samples.get(i + 1).map(|s| s.block).unwrap_or(window.end);
        let width = I256::from_raw(U256::from(next_block - sample.block));
        sum += sample.balance * width;
    }
    sum
}

/// Map every tracked series to its tiered reward.
///
/// Accounts whose weighted average balance is below the lowest tier
/// threshold are omitted entirely. `unit_rate`, when given, divides the flat
/// reward to convert it into an external unit (the rate must be non-zero).
///
/// Pure and deterministic: identical inputs yield identical output,
/// independent of how the series map was populated.
pub fn calculate_rewards(
    series: &BTreeMap<Address, BalanceSeries>,
    window: TrackingWindow,
    tiers: &TierTable,
    unit_rate: Option<U256>,
) -> Result<BTreeMap<Address, U256>, RewardsError> {
    if unit_rate == Some(U256::ZERO) {
        return Err(RewardsError::Config("unit-value rate must be non-zero".into()));
    }

    let mut rewards = BTreeMap::new();
    for (account, balance_series) in series {
        if balance_series.is_empty() {
            continue;
        }
        let sum = weighted_sum(balance_series, window);
        let Some(flat) = tiers.flat_reward(sum, window.len()) else {
            continue;
        };
        let reward = match unit_rate {
            Some(rate) => flat / rate,
            None => flat,
        };
        rewards.insert(*account, reward);
    }
    tracing::info!(eligible = series.len(), rewarded = rewards.len(), "assigned reward tiers");
    Ok(rewards)
}
