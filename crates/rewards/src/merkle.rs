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

//! Merkle commitment over the reward map.
//!
//! The scheme matches the merkle-distributor verifier contract family:
//! leaves are `keccak256(abi.encodePacked(uint256 index, address account,
//! uint256 amount))`, the leaf level is sorted ascending by hash, parents
//! hash the sorted pair of their children, and an odd trailing node is
//! carried up to the next level unhashed. Any deviation from these
//! conventions makes every proof fail verification on chain, silently.

use std::collections::BTreeMap;

use alloy::primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};

/// One account's claim against a published tree. Immutable once built; the
/// index is never reassigned, even if the reward map is later recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Zero-based leaf index, assigned by ascending account address.
    pub index: u32,
    /// Reward amount in the token's smallest unit.
    pub amount: U256,
    /// Sibling hashes from the leaf up to (excluding) the root.
    pub proof: Vec<B256>,
}

/// The published distribution commitment: root, total payout, and one claim
/// per rewarded account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimTree {
    pub root: B256,
    pub token_total: U256,
    pub claims: BTreeMap<Address, Claim>,
}

impl ClaimTree {
    /// Commit a reward map. Deterministic: indices follow ascending account
    /// address, so identical maps produce identical trees on any machine
    /// regardless of how the map was populated.
    pub fn build(rewards: &BTreeMap<Address, U256>) -> Self {
        let entries: Vec<(Address, U256)> =
            rewards.iter().map(|(account, amount)| (*account, *amount)).collect();

        let leaves: Vec<B256> = entries
            .iter()
            .enumerate()
            .map(|(index, (account, amount))| leaf_hash(index as u32, *account, *amount))
            .collect();

        let layers = build_layers(leaves.clone());
        let root = layers.last().and_then(|top| top.first()).copied().unwrap_or(B256::ZERO);

        let mut token_total = U256::ZERO;
        let mut claims = BTreeMap::new();
        for (index, (account, amount)) in entries.into_iter().enumerate() {
            token_total += amount;
            let proof = proof_for(&layers, leaves[index]);
            claims.insert(account, Claim { index: index as u32, amount, proof });
        }

        tracing::info!(%root, accounts = claims.len(), "built claim tree");
        Self { root, token_total, claims }
    }
}

/// Leaf hash over the packed `(uint256 index, address account, uint256
/// amount)` encoding, exactly as the verifier contract recomputes it.
pub fn leaf_hash(index: u32, account: Address, amount: U256) -> B256 {
    let mut packed = [0u8; 84];
    packed[..32].copy_from_slice(&U256::from(index).to_be_bytes::<32>());
    packed[32..52].copy_from_slice(account.as_slice());
    packed[52..].copy_from_slice(&amount.to_be_bytes::<32>());
    keccak256(packed)
}

/// Verify `leaf` against `root` by folding the proof with sorted-pair
/// hashing.
pub fn verify_proof(leaf: B256, proof: &[B256], root: B256) -> bool {
    let computed = proof.iter().fold(leaf, |node, sibling| hash_pair(node, *sibling));
    computed == root
}

fn hash_pair(a: B256, b: B256) -> B256 {
    let mut packed = [0u8; 64];
    if a <= b {
        packed[..32].copy_from_slice(a.as_slice());
        packed[32..].copy_from_slice(b.as_slice());
    } else {
        packed[..32].copy_from_slice(b.as_slice());
        packed[32..].copy_from_slice(a.as_slice());
    }
    keccak256(packed)
}

/// All tree levels, leaf level first (sorted ascending), root level last.
/// An odd trailing node is carried up unhashed.
fn build_layers(mut leaves: Vec<B256>) -> Vec<Vec<B256>> {
    if leaves.is_empty() {
        return Vec::new();
    }
    leaves.sort();

    let mut layers = vec![leaves];
    while layers.last().map(Vec::len).unwrap_or(0) > 1 {
        let current = layers.last().unwrap();
        let mut next = Vec::with_capacity(current.len().div_ceil(2));
        for pair in current.chunks(2) {
            match pair {
                [left, right] => next.push(hash_pair(*left, *right)),
                [odd] => next.push(*odd),
                _ => unreachable!(),
            }
        }
        layers.push(next);
    }
    layers
}

/// Sibling path for `leaf`, walking the precomputed layers bottom-up.
fn proof_for(layers: &[Vec<B256>], leaf: B256) -> Vec<B256> {
    let mut proof = Vec::new();
    let Some(mut position) = layers.first().and_then(|l| l.iter().position(|h| *h == leaf)) else {
        return proof;
    };
    for layer in &layers[..layers.len().saturating_sub(1)] {
        let sibling = position ^ 1;
        if let Some(hash) = layer.get(sibling) {
            proof.push(*hash);
        }
        position /= 2;
    }
    proof
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rewards(n: u8) -> BTreeMap<Address, U256> {
        (1..=n)
            .map(|i| (Address::repeat_byte(i), U256::from(i as u64) * U256::from(10u64).pow(U256::from(18u64))))
            .collect()
    }

    #[test]
    fn every_claim_verifies_against_the_root() {
        for size in [1u8, 2, 3, 4, 5, 8, 13] {
            let tree = ClaimTree::build(&sample_rewards(size));
            for (account, claim) in &tree.claims {
                let leaf = leaf_hash(claim.index, *account, claim.amount);
                assert!(
                    verify_proof(leaf, &claim.proof, tree.root),
                    "claim for {account} failed with {size} leaves"
                );
            }
        }
    }

    #[test]
    fn tampered_claim_fails_alone() {
        let tree = ClaimTree::build(&sample_rewards(5));
        let (victim, claim) = tree.claims.iter().next().map(|(a, c)| (*a, c.clone())).unwrap();

        // Each mutated field breaks verification of that claim.
        let wrong_amount = leaf_hash(claim.index, victim, claim.amount + U256::from(1u64));
        assert!(!verify_proof(wrong_amount, &claim.proof, tree.root));

        let wrong_index = leaf_hash(claim.index + 1, victim, claim.amount);
        assert!(!verify_proof(wrong_index, &claim.proof, tree.root));

        let wrong_account = leaf_hash(claim.index, Address::repeat_byte(0xff), claim.amount);
        assert!(!verify_proof(wrong_account, &claim.proof, tree.root));

        // Every other claim is unaffected.
        for (account, other) in tree.claims.iter().filter(|(a, _)| **a != victim) {
            let leaf = leaf_hash(other.index, *account, other.amount);
            assert!(verify_proof(leaf, &other.proof, tree.root));
        }
    }

    #[test]
    fn indices_follow_ascending_address_order() {
        let tree = ClaimTree::build(&sample_rewards(4));
        let mut seen = Vec::new();
        for (account, claim) in &tree.claims {
            seen.push((*account, claim.index));
        }
        // BTreeMap iterates ascending by address; indices must match.
        for (i, (_, index)) in seen.iter().enumerate() {
            assert_eq!(*index, i as u32);
        }
    }

    #[test]
    fn build_is_reproducible() {
        let rewards = sample_rewards(7);
        let first = ClaimTree::build(&rewards);

        // Populate an equal map in reverse insertion order.
        let mut reversed = BTreeMap::new();
        for (account, amount) in rewards.iter().rev() {
            reversed.insert(*account, *amount);
        }
        let second = ClaimTree::build(&reversed);

        assert_eq!(first, second);
    }

    #[test]
    fn token_total_sums_all_amounts() {
        let rewards = sample_rewards(5);
        let expected = rewards.values().fold(U256::ZERO, |acc, v| acc + v);
        assert_eq!(ClaimTree::build(&rewards).token_total, expected);
    }

    #[test]
    fn single_claim_tree_has_empty_proof() {
        let tree = ClaimTree::build(&sample_rewards(1));
        let (account, claim) = tree.claims.iter().next().unwrap();
        assert!(claim.proof.is_empty());
        assert_eq!(tree.root, leaf_hash(claim.index, *account, claim.amount));
    }

    #[test]
    fn empty_reward_map_builds_empty_tree() {
        let tree = ClaimTree::build(&BTreeMap::new());
        assert_eq!(tree.root, B256::ZERO);
        assert_eq!(tree.token_total, U256::ZERO);
        assert!(tree.claims.is_empty());
    }
}
