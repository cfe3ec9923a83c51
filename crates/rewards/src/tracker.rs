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

//! Eligibility and balance tracking over the merged event stream.

use std::collections::{BTreeMap, BTreeSet};

use alloy::primitives::{Address, I256, U256};
use serde::{Deserialize, Serialize};

use crate::{Event, RewardsError, TrackingWindow};

/// Distinct attestation issuers required before an account is eligible.
pub const REQUIRED_ATTESTATIONS: usize = 3;

/// One balance observation inside the tracking window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSample {
    pub block: u64,
    pub balance: I256,
}

/// Strictly block-increasing balance observations for one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSeries(Vec<BalanceSample>);

impl BalanceSeries {
    /// Record `balance` at `block`. A second observation in the same block
    /// replaces the previous one, so the series stays strictly increasing by
    /// block; the weighted sum is unchanged since the collapsed interval has
    /// zero width.
    fn record(&mut self, block: u64, balance: I256) {
        match self.0.last_mut() {
            Some(last) if last.block == block => last.balance = balance,
            _ => self.0.push(BalanceSample { block, balance }),
        }
    }

    pub fn samples(&self) -> &[BalanceSample] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Lifecycle of the tracking window. Transitions are forward-only; once
/// closed the tracker ignores all further events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Phase {
    Unopened,
    Tracking,
    Closed,
}

/// Sequential state machine consuming the merged chronological event stream.
///
/// Before the window opens it accumulates attestation counts, wallet
/// associations, and raw ledger balances without recording any time series.
/// The first event at or past `window.start` snapshots every
/// already-eligible account's balance as its sample at `window.start`; while
/// tracking, each transfer appends the post-transfer balance of any eligible
/// party. The first event past `window.end` closes the tracker for good.
///
/// Mid-window eligibility crossings are deliberately not backfilled with a
/// `window.start` sample: such an account's series begins at its first
/// post-eligibility transfer. This is pinned by a test below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceTracker {
    window: TrackingWindow,
    phase: Phase,
    /// Signed ledger balances. `Address::ZERO` is the mint/burn sentinel and
    /// is the only account expected to go negative; the signed sum over all
    /// entries is zero at every point.
    balances: BTreeMap<Address, I256>,
    /// Distinct attestation issuers seen per account.
    issuers: BTreeMap<Address, BTreeSet<Address>>,
    /// Accounts each wallet address holds funds for. A wallet is always
    /// associated with itself, since the wallet may be attested directly.
    wallet_associations: BTreeMap<Address, BTreeSet<Address>>,
    series: BTreeMap<Address, BalanceSeries>,
}

impl BalanceTracker {
    pub fn new(window: TrackingWindow) -> Self {
        Self {
            window,
            phase: Phase::Unopened,
            balances: BTreeMap::new(),
            issuers: BTreeMap::new(),
            wallet_associations: BTreeMap::new(),
            series: BTreeMap::new(),
        }
    }

    /// Replay an entire merged stream. The stream must be ordered by
    /// `(block, tx_index)`, as produced by [crate::merge_all].
    pub fn process_all(&mut self, events: &[Event]) -> Result<(), RewardsError> {
        for event in events {
            self.process(event)?;
        }
        Ok(())
    }

    /// Advance the state machine by one event.
    pub fn process(&mut self, event: &Event) -> Result<(), RewardsError> {
        if self.phase == Phase::Unopened && event.block() >= self.window.start {
            self.open_window();
        }
        // The first event past the end closes the window, even when it is
        // also the event that opened it: holders then kept their balances
        // through the whole window and the snapshot above says so.
        if self.phase == Phase::Tracking && event.block() > self.window.end {
            tracing::debug!(block = event.block(), "tracking window closed");
            self.phase = Phase::Closed;
        }
        if self.phase == Phase::Closed {
            // Late events are expected when the fetched range extends past
            // the window; they are ignored, not errors.
            return Ok(());
        }

        match event {
            Event::Transfer { from, to, value, block, .. } => {
                self.apply_transfer(*from, *to, *value, *block)
            }
            Event::AttestationCompleted { account, issuer, .. } => {
                self.record_attestation(*account, *issuer)
            }
            Event::WalletAddressSet { account, wallet, .. } => {
                let associated = self.wallet_associations.entry(*wallet).or_default();
                associated.insert(*wallet);
                associated.insert(*account);
            }
        }
        Ok(())
    }

    /// Snapshot every already-eligible account's current balance as its
    /// initial sample at `window.start`. Fires exactly once.
    fn open_window(&mut self) {
        self.phase = Phase::Tracking;
        let eligible: Vec<(Address, I256)> = self
            .balances
            .iter()
            .filter(|(account, _)| self.is_eligible(**account))
            .map(|(account, balance)| (*account, *balance))
            .collect();
        tracing::info!(
            start = self.window.start,
            accounts = eligible.len(),
            "opened tracking window"
        );
        for (account, balance) in eligible {
            self.series.entry(account).or_default().record(self.window.start, balance);
        }
    }

    fn apply_transfer(&mut self, from: Address, to: Address, value: U256, block: u64) {
        // Token amounts never exceed 2^255, so the raw cast is lossless.
        let value = I256::from_raw(value);
        *self.balances.entry(to).or_insert(I256::ZERO) += value;
        *self.balances.entry(from).or_insert(I256::ZERO) -= value;

        if self.phase == Phase::Tracking {
            for party in [from, to] {
                if self.is_eligible(party) {
                    let balance = self.balances[&party];
                    self.series.entry(party).or_default().record(block, balance);
                }
            }
        }
    }

    fn record_attestation(&mut self, account: Address, issuer: Address) {
        let issuers = self.issuers.entry(account).or_default();
        if issuers.insert(issuer) && issuers.len() == REQUIRED_ATTESTATIONS {
            tracing::debug!(%account, "account reached attestation threshold");
        }
    }

    /// Whether `address` is eligible, directly or through a wallet
    /// association to an attested account. Monotone: attestation counts only
    /// grow and associations are never removed.
    pub fn is_eligible(&self, address: Address) -> bool {
        match self.wallet_associations.get(&address) {
            Some(associated) => associated.iter().any(|a| self.is_attested(*a)),
            None => self.is_attested(address),
        }
    }

    fn is_attested(&self, account: Address) -> bool {
        self.issuers.get(&account).map(|i| i.len() >= REQUIRED_ATTESTATIONS).unwrap_or(false)
    }

    /// Distinct attestation completions recorded for `account`.
    pub fn attestation_count(&self, account: Address) -> usize {
        self.issuers.get(&account).map(BTreeSet::len).unwrap_or(0)
    }

    /// Current ledger balance of `account` (zero if never seen).
    pub fn balance(&self, account: Address) -> I256 {
        self.balances.get(&account).copied().unwrap_or(I256::ZERO)
    }

    /// Signed sum over the whole ledger, sentinel included. Always zero.
    pub fn ledger_total(&self) -> I256 {
        self.balances.values().fold(I256::ZERO, |acc, b| acc + *b)
    }

    pub fn window(&self) -> TrackingWindow {
        self.window
    }

    /// The collected per-account balance series; input to the tier
    /// calculator.
    pub fn series(&self) -> &BTreeMap<Address, BalanceSeries> {
        &self.series
    }

    /// Consume the tracker, keeping only the series.
    pub fn into_series(self) -> BTreeMap<Address, BalanceSeries> {
        self.series
    }
}
