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

//! Resumable per-account distribution results.

use std::{collections::BTreeMap, fmt, path::Path, str::FromStr};

use alloy::primitives::{Address, B256};
use anyhow::Context;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Marker stored when the chain already reports a claim as satisfied.
const ALREADY_CLAIMED: &str = "already_claimed";

/// Outcome of one account's claim attempt.
///
/// Serialized as a bare string for compatibility with downstream tooling:
/// the submitted transaction hash, the literal `"already_claimed"`, or the
/// error text of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The claim transaction was submitted and its receipt observed.
    Submitted(B256),
    /// The contract reported the claim as already satisfied; nothing was
    /// resubmitted.
    AlreadyClaimed,
    /// The attempt failed; the claim stays open for a future run.
    Failed(String),
}

impl ClaimOutcome {
    /// Whether this entry settles the account for good. Failed entries are
    /// retried on resume; settled ones are skipped.
    pub fn is_settled(&self) -> bool {
        !matches!(self, ClaimOutcome::Failed(_))
    }
}

impl fmt::Display for ClaimOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimOutcome::Submitted(tx) => write!(f, "{tx}"),
            ClaimOutcome::AlreadyClaimed => f.write_str(ALREADY_CLAIMED),
            ClaimOutcome::Failed(reason) => f.write_str(reason),
        }
    }
}

impl FromStr for ClaimOutcome {
    type Err = std::convert::Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw == ALREADY_CLAIMED {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        if let Ok(tx) = raw.parse::<B256>() {
            return Ok(ClaimOutcome::Submitted(tx));
        }
        Ok(ClaimOutcome::Failed(raw.to_string()))
    }
}

impl Serialize for ClaimOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ClaimOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Per-account distribution record, additive across resumed runs.
pub type DistributionLedger = BTreeMap<Address, ClaimOutcome>;

/// Fold a batch of fresh results into `prior`.
///
/// A settled result always overwrites; a failure never overwrites any
/// pre-existing entry, so a flaky retry can never erase the transaction hash
/// of an earlier success.
pub fn merge_ledgers(
    prior: &DistributionLedger,
    results: impl IntoIterator<Item = (Address, ClaimOutcome)>,
) -> DistributionLedger {
    let mut merged = prior.clone();
    for (account, outcome) in results {
        if !outcome.is_settled() && merged.contains_key(&account) {
            continue;
        }
        merged.insert(account, outcome);
    }
    merged
}

/// Load a ledger file; a missing file is an empty ledger, so first runs and
/// resumed runs share one code path.
pub fn load_ledger(path: &Path) -> anyhow::Result<DistributionLedger> {
    if !path.exists() {
        return Ok(DistributionLedger::new());
    }
    attestation_rewards::artifacts::load_json(path)
        .with_context(|| format!("invalid distribution ledger at {}", path.display()))
}

/// Persist the ledger as pretty JSON.
pub fn save_ledger(path: &Path, ledger: &DistributionLedger) -> anyhow::Result<()> {
    attestation_rewards::artifacts::save_json(path, ledger)
}
