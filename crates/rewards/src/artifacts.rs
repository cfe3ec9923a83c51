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

//! Persisted JSON artifacts.
//!
//! Field names are a contract with downstream tooling (claim UIs, auditors);
//! do not rename them. All token amounts are decimal integer strings, since
//! smallest-unit amounts exceed the range JSON numbers round-trip reliably.

use std::{collections::BTreeMap, fs, path::Path};

use alloy::primitives::{Address, B256, U256};
use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::merkle::{Claim, ClaimTree};

/// Serialize `value` as pretty-printed JSON at `path`.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize artifact")?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote artifact");
    Ok(())
}

/// Load a JSON artifact written by [save_json].
pub fn load_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let json =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("failed to parse {}", path.display()))
}

/// On-disk shape of the published Merkle tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleTreeFile {
    #[serde(rename = "merkleRoot")]
    pub merkle_root: B256,
    #[serde(rename = "tokenTotal", with = "dec_string")]
    pub token_total: U256,
    pub claims: BTreeMap<Address, ClaimFileEntry>,
}

/// One claim inside [MerkleTreeFile].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimFileEntry {
    pub index: u32,
    #[serde(with = "dec_string")]
    pub amount: U256,
    pub proof: Vec<B256>,
}

impl From<&ClaimTree> for MerkleTreeFile {
    fn from(tree: &ClaimTree) -> Self {
        Self {
            merkle_root: tree.root,
            token_total: tree.token_total,
            claims: tree
                .claims
                .iter()
                .map(|(account, claim)| {
                    (
                        *account,
                        ClaimFileEntry {
                            index: claim.index,
                            amount: claim.amount,
                            proof: claim.proof.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}

impl From<MerkleTreeFile> for ClaimTree {
    fn from(file: MerkleTreeFile) -> Self {
        Self {
            root: file.merkle_root,
            token_total: file.token_total,
            claims: file
                .claims
                .into_iter()
                .map(|(account, entry)| {
                    (account, Claim { index: entry.index, amount: entry.amount, proof: entry.proof })
                })
                .collect(),
        }
    }
}

/// Write the rewards-by-address file, amounts as decimal strings.
pub fn save_rewards(path: &Path, rewards: &BTreeMap<Address, U256>) -> anyhow::Result<()> {
    let encoded: BTreeMap<Address, String> =
        rewards.iter().map(|(account, amount)| (*account, amount.to_string())).collect();
    save_json(path, &encoded)
}

/// Load a rewards-by-address file back into exact amounts.
pub fn load_rewards(path: &Path) -> anyhow::Result<BTreeMap<Address, U256>> {
    let encoded: BTreeMap<Address, String> = load_json(path)?;
    encoded
        .into_iter()
        .map(|(account, amount)| {
            let amount = amount
                .parse::<U256>()
                .with_context(|| format!("invalid reward amount for {account}: {amount}"))?;
            Ok((account, amount))
        })
        .collect()
}

/// Decimal-string encoding for U256 amounts.
mod dec_string {
    use alloy::primitives::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
