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

//! Event model, chunked log fetching, and stream merging.

use alloy::{
    primitives::{Address, U256},
    providers::Provider,
    rpc::types::{BlockNumberOrTag, Filter, Log},
    sol,
    sol_types::SolEvent,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::RewardsError;

sol! {
    /// ERC-20 style reward token. Only the Transfer event is consumed.
    contract IRewardToken {
        event Transfer(address indexed from, address indexed to, uint256 value);
    }

    /// Identity attestation registry.
    contract IAttestations {
        event AttestationCompleted(bytes32 indexed identifier, address indexed account, address indexed issuer);
    }

    /// Account registry mapping accounts to their active wallet address.
    contract IAccounts {
        event AccountWalletAddressSet(address indexed account, address walletAddress);
    }
}

/// A decoded on-chain event, ordered by `(block, tx_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// A token transfer. `Address::ZERO` as sender or recipient marks a
    /// mint or burn.
    Transfer { from: Address, to: Address, value: U256, block: u64, tx_index: u64 },
    /// An attestation completed by `issuer` against `account`.
    AttestationCompleted { account: Address, issuer: Address, block: u64, tx_index: u64 },
    /// `account` registered `wallet` as the address holding its funds.
    WalletAddressSet { account: Address, wallet: Address, block: u64, tx_index: u64 },
}

impl Event {
    /// Block number the event was emitted in.
    pub fn block(&self) -> u64 {
        match self {
            Event::Transfer { block, .. }
            | Event::AttestationCompleted { block, .. }
            | Event::WalletAddressSet { block, .. } => *block,
        }
    }

    /// Index of the emitting transaction within its block.
    pub fn tx_index(&self) -> u64 {
        match self {
            Event::Transfer { tx_index, .. }
            | Event::AttestationCompleted { tx_index, .. }
            | Event::WalletAddressSet { tx_index, .. } => *tx_index,
        }
    }

    fn ordering_key(&self) -> (u64, u64) {
        (self.block(), self.tx_index())
    }
}

/// The event streams consumed by the pipeline, one per contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Transfer,
    AttestationCompleted,
    WalletAddressSet,
}

/// Source of historical events, typically a JSON-RPC node.
///
/// Implementations answer one bounded query; range segmentation, ordering of
/// segments, and checkpointing live in [fetch_events]. Retry and backoff are
/// deliberately left to the caller's infrastructure.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Query all events of `kind` in the inclusive block range
    /// `[from_block, to_block]`, ordered by `(block, tx_index)`.
    async fn query_events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Event>, RewardsError>;
}

/// Fetch all events of `kind` over `[from_block, to_block]`, splitting the
/// range into inclusive segments of at most `max_range` blocks so no single
/// query exceeds the provider's range limit.
///
/// Segments are queried lowest first and concatenated in order, so the result
/// equals a single unbounded query over the full range. `checkpoint` holds
/// events from a previous run covering the blocks below `from_block`; they
/// are prepended unchanged so incremental re-runs never refetch history.
///
/// Any failed query surfaces as [RewardsError::Network]; nothing is retried.
pub async fn fetch_events<S: EventSource + ?Sized>(
    source: &S,
    kind: EventKind,
    from_block: u64,
    to_block: u64,
    max_range: u64,
    checkpoint: Vec<Event>,
) -> Result<Vec<Event>, RewardsError> {
    if max_range == 0 {
        return Err(RewardsError::Config("max_range must be at least one block".into()));
    }

    let mut events = checkpoint;
    let mut current_from = from_block;
    while current_from <= to_block {
        let current_to = current_from.saturating_add(max_range - 1).min(to_block);
        tracing::debug!(?kind, current_from, current_to, "querying event segment");
        let segment = source.query_events(kind, current_from, current_to).await?;
        events.extend(segment);
        if current_to == u64::MAX {
            break;
        }
        current_from = current_to + 1;
    }
    Ok(events)
}

/// Stable merge of two streams ordered by `(block, tx_index)`.
///
/// On an exact tie, `a`'s element precedes `b`'s. Output length is always
/// `a.len() + b.len()`; no event is dropped or duplicated.
pub fn merge_events(a: Vec<Event>, b: Vec<Event>) -> Vec<Event> {
    let mut merged = Vec::with_capacity(a.len() + b.len());
    let mut a = a.into_iter().peekable();
    let mut b = b.into_iter().peekable();

    loop {
        match (a.peek(), b.peek()) {
            (Some(ea), Some(eb)) => {
                if eb.ordering_key() < ea.ordering_key() {
                    merged.push(b.next().unwrap());
                } else {
                    merged.push(a.next().unwrap());
                }
            }
            (Some(_), None) => merged.push(a.next().unwrap()),
            (None, Some(_)) => merged.push(b.next().unwrap()),
            (None, None) => break,
        }
    }
    merged
}

/// Merge any number of typed streams by repeated pairwise merge.
pub fn merge_all(streams: Vec<Vec<Event>>) -> Vec<Event> {
    streams.into_iter().fold(Vec::new(), merge_events)
}

/// [EventSource] backed by an alloy provider, querying the three contracts
/// the reward pipeline observes.
#[derive(Debug, Clone)]
pub struct ChainEventSource<P> {
    provider: P,
    token_address: Address,
    attestations_address: Address,
    accounts_address: Address,
}

impl<P: Provider> ChainEventSource<P> {
    pub fn new(
        provider: P,
        token_address: Address,
        attestations_address: Address,
        accounts_address: Address,
    ) -> Self {
        Self { provider, token_address, attestations_address, accounts_address }
    }

    fn filter_for(&self, kind: EventKind, from_block: u64, to_block: u64) -> Filter {
        let (address, signature) = match kind {
            EventKind::Transfer => (self.token_address, IRewardToken::Transfer::SIGNATURE_HASH),
            EventKind::AttestationCompleted => {
                (self.attestations_address, IAttestations::AttestationCompleted::SIGNATURE_HASH)
            }
            EventKind::WalletAddressSet => {
                (self.accounts_address, IAccounts::AccountWalletAddressSet::SIGNATURE_HASH)
            }
        };
        Filter::new()
            .address(address)
            .event_signature(signature)
            .from_block(BlockNumberOrTag::Number(from_block))
            .to_block(BlockNumberOrTag::Number(to_block))
    }
}

#[async_trait]
impl<P: Provider> EventSource for ChainEventSource<P> {
    async fn query_events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Event>, RewardsError> {
        let filter = self.filter_for(kind, from_block, to_block);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| RewardsError::Network(format!("eth_getLogs failed: {e}")))?;

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            events.push(decode_log(kind, log)?);
        }
        // Providers return logs ordered within a block but make no promise
        // across chunk boundaries; normalize here.
        events.sort_by_key(Event::ordering_key);
        Ok(events)
    }
}

fn decode_log(kind: EventKind, log: &Log) -> Result<Event, RewardsError> {
    let block = log
        .block_number
        .ok_or_else(|| RewardsError::Network("log is missing a block number".into()))?;
    let tx_index = log
        .transaction_index
        .ok_or_else(|| RewardsError::Network("log is missing a transaction index".into()))?;

    let unknown = |log: &Log| RewardsError::UnknownEvent {
        block,
        signature: log.topic0().map(|t| t.to_string()).unwrap_or_else(|| "<none>".into()),
    };

    match kind {
        EventKind::Transfer => {
            let decoded = log.log_decode::<IRewardToken::Transfer>().map_err(|_| unknown(log))?;
            let data = decoded.inner.data;
            Ok(Event::Transfer { from: data.from, to: data.to, value: data.value, block, tx_index })
        }
        EventKind::AttestationCompleted => {
            let decoded =
                log.log_decode::<IAttestations::AttestationCompleted>().map_err(|_| unknown(log))?;
            let data = decoded.inner.data;
            Ok(Event::AttestationCompleted {
                account: data.account,
                issuer: data.issuer,
                block,
                tx_index,
            })
        }
        EventKind::WalletAddressSet => {
            let decoded = log
                .log_decode::<IAccounts::AccountWalletAddressSet>()
                .map_err(|_| unknown(log))?;
            let data = decoded.inner.data;
            Ok(Event::WalletAddressSet {
                account: data.account,
                wallet: data.walletAddress,
                block,
                tx_index,
            })
        }
    }
}
