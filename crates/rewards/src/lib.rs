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

//! Reward computation for attestation-verified token holders.
//!
//! The pipeline runs strictly left to right as an offline batch:
//! fetch event logs in bounded block ranges, merge the per-contract streams
//! into one chronologically ordered stream, replay it through the
//! [tracker::BalanceTracker] state machine, convert the tracked balance
//! series into tiered rewards, and commit the reward map into a Merkle tree
//! whose claims are later executed by the distributor crate.

pub mod artifacts;
pub mod events;
pub mod merkle;
pub mod tiers;
pub mod tracker;

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use events::{fetch_events, merge_all, merge_events, Event, EventKind, EventSource};
pub use merkle::{verify_proof, Claim, ClaimTree};
pub use tiers::{calculate_rewards, Tier, TierTable};
pub use tracker::{BalanceSample, BalanceSeries, BalanceTracker};

/// Errors surfaced by the rewards pipeline.
///
/// Everything except `Network` is fatal: the tracker, calculator and tree
/// builder never locally recover from malformed input, since garbage in must
/// not silently produce wrong rewards. `Network` failures are fatal during
/// fetching but are isolated per claim inside the distributor.
#[derive(Error, Debug)]
pub enum RewardsError {
    /// Invalid window bounds or other invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An event query, contract read, or transaction submission failed.
    #[error("network request failed: {0}")]
    Network(String),

    /// The locally built tree disagrees with the root recorded on chain.
    #[error("local merkle root {ours} does not match on-chain root {theirs}")]
    RootMismatch { ours: B256, theirs: B256 },

    /// A log reached the decoder that does not match any known event.
    #[error("unrecognized event log at block {block} (topic0: {signature})")]
    UnknownEvent { block: u64, signature: String },
}

/// The inclusive block range over which average balances are tracked.
///
/// Passed explicitly into the tracker and calculator so test suites can
/// parameterize freely; never read from globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingWindow {
    /// First block of the tracking window.
    pub start: u64,
    /// Last block of the tracking window.
    pub end: u64,
}

impl TrackingWindow {
    /// Create a window, rejecting one that ends before it starts.
    ///
    /// A zero-length window is also rejected: the weighted average divides
    /// by the window length.
    pub fn new(start: u64, end: u64) -> Result<Self, RewardsError> {
        if end <= start {
            return Err(RewardsError::Config(format!(
                "tracking window must end after it starts (start block {start}, end block {end})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of blocks spanned by the window.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }
}
