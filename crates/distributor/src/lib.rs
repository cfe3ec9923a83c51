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

//! Idempotent on-chain execution of a published claim tree.
//!
//! The distributor is the only concurrent stage of the pipeline: per-account
//! claims are independent, so they run under a bounded worker pool. Failures
//! are isolated per claim and recorded; safe resumption comes from re-running
//! against the same tree and the persisted ledger, never from retrying
//! in-process.

pub mod ledger;

use std::{sync::Arc, time::Duration};

use alloy::{
    primitives::{Address, B256, U256},
    providers::Provider,
    sol,
};
use async_trait::async_trait;
use tokio::{sync::Semaphore, task::JoinSet};

use attestation_rewards::{merkle::Claim, ClaimTree, RewardsError};

pub use ledger::{load_ledger, merge_ledgers, save_ledger, ClaimOutcome, DistributionLedger};

/// How long to wait for a claim transaction receipt.
const TX_TIMEOUT: Duration = Duration::from_secs(180);

/// Simultaneous in-flight claims unless configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 50;

sol! {
    #[sol(rpc)]
    contract IMerkleDistributor {
        function merkleRoot() external view returns (bytes32);
        function isClaimed(uint256 index) external view returns (bool);
        function claim(uint256 index, address account, uint256 amount, bytes32[] calldata merkleProof) external;
    }
}

/// The deployed distributor contract, behind a seam so tests (and callers
/// with their own transports) can substitute the chain.
#[async_trait]
pub trait DistributorClient: Send + Sync {
    /// The Merkle root the contract was deployed with.
    async fn merkle_root(&self) -> Result<B256, RewardsError>;

    /// Whether the claim at `index` has already been executed.
    async fn is_claimed(&self, index: u32) -> Result<bool, RewardsError>;

    /// Submit a claim and wait for its receipt; returns the transaction
    /// hash.
    async fn submit_claim(
        &self,
        index: u32,
        account: Address,
        amount: U256,
        proof: &[B256],
    ) -> Result<B256, RewardsError>;
}

/// [DistributorClient] over an alloy provider. The provider's wallet signs;
/// `sender` selects the from-address on claim transactions.
#[derive(Debug, Clone)]
pub struct MerkleDistributorClient<P: Provider> {
    instance: IMerkleDistributor::IMerkleDistributorInstance<P>,
    sender: Address,
}

impl<P: Provider> MerkleDistributorClient<P> {
    pub fn new(contract_address: Address, provider: P, sender: Address) -> Self {
        Self { instance: IMerkleDistributor::new(contract_address, provider), sender }
    }
}

#[async_trait]
impl<P: Provider> DistributorClient for MerkleDistributorClient<P> {
    async fn merkle_root(&self) -> Result<B256, RewardsError> {
        self.instance
            .merkleRoot()
            .call()
            .await
            .map_err(|e| RewardsError::Network(format!("merkleRoot() call failed: {e}")))
    }

    async fn is_claimed(&self, index: u32) -> Result<bool, RewardsError> {
        self.instance
            .isClaimed(U256::from(index))
            .call()
            .await
            .map_err(|e| RewardsError::Network(format!("isClaimed({index}) call failed: {e}")))
    }

    async fn submit_claim(
        &self,
        index: u32,
        account: Address,
        amount: U256,
        proof: &[B256],
    ) -> Result<B256, RewardsError> {
        let pending = self
            .instance
            .claim(U256::from(index), account, amount, proof.to_vec())
            .from(self.sender)
            .send()
            .await
            .map_err(|e| RewardsError::Network(format!("claim({index}) submission failed: {e}")))?;
        pending
            .with_timeout(Some(TX_TIMEOUT))
            .watch()
            .await
            .map_err(|e| RewardsError::Network(format!("claim({index}) receipt failed: {e}")))
    }
}

/// Bounded-concurrency executor for a published [ClaimTree].
pub struct Distributor<C> {
    client: Arc<C>,
    concurrency: usize,
}

impl<C: DistributorClient + 'static> Distributor<C> {
    pub fn new(client: C, concurrency: usize) -> Self {
        Self { client: Arc::new(client), concurrency: concurrency.max(1) }
    }

    /// Execute every open claim in `tree`, returning `prior` merged with
    /// this run's results.
    ///
    /// Fails fast with [RewardsError::RootMismatch] if the contract was
    /// deployed with a different root than the local tree: distributing
    /// against a stale tree would burn gas on proofs that cannot verify.
    /// Accounts already settled in `prior` are skipped; previously failed
    /// accounts are retried. Per-claim failures are recorded, never fatal.
    pub async fn distribute(
        &self,
        tree: &ClaimTree,
        prior: &DistributionLedger,
    ) -> Result<DistributionLedger, RewardsError> {
        let onchain_root = self.client.merkle_root().await?;
        if onchain_root != tree.root {
            return Err(RewardsError::RootMismatch { ours: tree.root, theirs: onchain_root });
        }

        let open_claims: Vec<(Address, Claim)> = tree
            .claims
            .iter()
            .filter(|(account, _)| !prior.get(*account).map(ClaimOutcome::is_settled).unwrap_or(false))
            .map(|(account, claim)| (*account, claim.clone()))
            .collect();
        tracing::info!(
            total = tree.claims.len(),
            open = open_claims.len(),
            concurrency = self.concurrency,
            "distributing claims"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for (account, claim) in open_claims {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    // Only possible if the semaphore is closed, which we
                    // never do; treat it like any other per-claim failure.
                    Err(e) => return (account, ClaimOutcome::Failed(e.to_string())),
                };
                (account, execute_claim(client.as_ref(), account, &claim).await)
            });
        }

        // Full barrier: the merge only runs once every task has finished.
        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!("claim task panicked: {e}"),
            }
        }

        Ok(merge_ledgers(prior, results))
    }
}

/// One account's claim: status check, then submit-and-await. Every error is
/// captured as a recorded outcome so other claims proceed untouched.
async fn execute_claim<C: DistributorClient + ?Sized>(
    client: &C,
    account: Address,
    claim: &Claim,
) -> ClaimOutcome {
    match client.is_claimed(claim.index).await {
        Ok(true) => {
            tracing::info!(%account, index = claim.index, "already claimed, skipping");
            ClaimOutcome::AlreadyClaimed
        }
        Ok(false) => {
            match client.submit_claim(claim.index, account, claim.amount, &claim.proof).await {
                Ok(tx) => {
                    tracing::info!(%account, index = claim.index, %tx, "claim submitted");
                    ClaimOutcome::Submitted(tx)
                }
                Err(e) => {
                    tracing::error!(%account, index = claim.index, "claim failed: {e}");
                    ClaimOutcome::Failed(e.to_string())
                }
            }
        }
        Err(e) => {
            tracing::error!(%account, index = claim.index, "claimed-status check failed: {e}");
            ClaimOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{BTreeMap, HashSet},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use alloy::primitives::keccak256;

    use super::*;

    /// In-memory contract double tracking claimed indices and submissions.
    struct MockClient {
        root: B256,
        claimed: Mutex<HashSet<u32>>,
        failing: HashSet<Address>,
        submissions: AtomicUsize,
        status_checks: AtomicUsize,
    }

    impl MockClient {
        fn new(root: B256) -> Self {
            Self {
                root,
                claimed: Mutex::new(HashSet::new()),
                failing: HashSet::new(),
                submissions: AtomicUsize::new(0),
                status_checks: AtomicUsize::new(0),
            }
        }

        fn failing_for(mut self, account: Address) -> Self {
            self.failing.insert(account);
            self
        }

        fn mark_claimed(self, indices: impl IntoIterator<Item = u32>) -> Self {
            self.claimed.lock().unwrap().extend(indices);
            self
        }
    }

    #[async_trait]
    impl DistributorClient for MockClient {
        async fn merkle_root(&self) -> Result<B256, RewardsError> {
            Ok(self.root)
        }

        async fn is_claimed(&self, index: u32) -> Result<bool, RewardsError> {
            self.status_checks.fetch_add(1, Ordering::SeqCst);
            Ok(self.claimed.lock().unwrap().contains(&index))
        }

        async fn submit_claim(
            &self,
            index: u32,
            account: Address,
            _amount: U256,
            _proof: &[B256],
        ) -> Result<B256, RewardsError> {
            if self.failing.contains(&account) {
                return Err(RewardsError::Network("transaction underpriced".into()));
            }
            self.submissions.fetch_add(1, Ordering::SeqCst);
            self.claimed.lock().unwrap().insert(index);
            Ok(keccak256(account))
        }
    }

    fn sample_tree(accounts: u8) -> ClaimTree {
        let rewards: BTreeMap<Address, U256> = (1..=accounts)
            .map(|i| (Address::repeat_byte(i), U256::from(i as u64 * 1_000)))
            .collect();
        ClaimTree::build(&rewards)
    }

    #[test_log::test(tokio::test)]
    async fn distributes_all_open_claims() {
        let tree = sample_tree(5);
        let distributor = Distributor::new(MockClient::new(tree.root), 3);

        let ledger = distributor.distribute(&tree, &DistributionLedger::new()).await.unwrap();

        assert_eq!(ledger.len(), 5);
        assert!(ledger.values().all(|o| matches!(o, ClaimOutcome::Submitted(_))));
        assert_eq!(distributor.client.submissions.load(Ordering::SeqCst), 5);
    }

    #[test_log::test(tokio::test)]
    async fn root_mismatch_aborts_before_any_submission() {
        let tree = sample_tree(3);
        let distributor = Distributor::new(MockClient::new(B256::repeat_byte(0xde)), 3);

        let err = distributor.distribute(&tree, &DistributionLedger::new()).await.unwrap_err();
        assert!(matches!(err, RewardsError::RootMismatch { .. }));
        assert_eq!(distributor.client.status_checks.load(Ordering::SeqCst), 0);
        assert_eq!(distributor.client.submissions.load(Ordering::SeqCst), 0);
    }

    #[test_log::test(tokio::test)]
    async fn already_claimed_is_recorded_without_resubmitting() {
        let tree = sample_tree(3);
        let claimed_index = tree.claims[&Address::repeat_byte(2)].index;
        let client = MockClient::new(tree.root).mark_claimed([claimed_index]);
        let distributor = Distributor::new(client, 2);

        let ledger = distributor.distribute(&tree, &DistributionLedger::new()).await.unwrap();

        assert_eq!(ledger[&Address::repeat_byte(2)], ClaimOutcome::AlreadyClaimed);
        assert_eq!(distributor.client.submissions.load(Ordering::SeqCst), 2);
    }

    #[test_log::test(tokio::test)]
    async fn per_claim_failures_do_not_abort_the_batch() {
        let tree = sample_tree(4);
        let unlucky = Address::repeat_byte(3);
        let client = MockClient::new(tree.root).failing_for(unlucky);
        let distributor = Distributor::new(client, 4);

        let ledger = distributor.distribute(&tree, &DistributionLedger::new()).await.unwrap();

        assert!(matches!(ledger[&unlucky], ClaimOutcome::Failed(_)));
        let submitted =
            ledger.values().filter(|o| matches!(o, ClaimOutcome::Submitted(_))).count();
        assert_eq!(submitted, 3);
    }

    #[test_log::test(tokio::test)]
    async fn second_run_over_satisfied_claims_is_a_no_op() {
        let tree = sample_tree(5);
        let all_indices: Vec<u32> = tree.claims.values().map(|c| c.index).collect();
        let client = MockClient::new(tree.root).mark_claimed(all_indices);
        let distributor = Distributor::new(client, 5);

        let first = distributor.distribute(&tree, &DistributionLedger::new()).await.unwrap();
        assert!(first.values().all(|o| *o == ClaimOutcome::AlreadyClaimed));
        assert_eq!(distributor.client.submissions.load(Ordering::SeqCst), 0);

        // Resuming with the recorded ledger skips every account entirely.
        let checks_after_first = distributor.client.status_checks.load(Ordering::SeqCst);
        let second = distributor.distribute(&tree, &first).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(distributor.client.submissions.load(Ordering::SeqCst), 0);
        assert_eq!(distributor.client.status_checks.load(Ordering::SeqCst), checks_after_first);
    }

    #[test_log::test(tokio::test)]
    async fn resume_retries_only_failed_accounts() {
        let tree = sample_tree(3);
        let unlucky = Address::repeat_byte(2);

        // First run: one account fails.
        let distributor =
            Distributor::new(MockClient::new(tree.root).failing_for(unlucky), 3);
        let first = distributor.distribute(&tree, &DistributionLedger::new()).await.unwrap();
        assert!(matches!(first[&unlucky], ClaimOutcome::Failed(_)));

        // Second run with a healthy client: only the failed account is
        // touched, and its new success lands in the merged ledger.
        let retry = Distributor::new(MockClient::new(tree.root), 3);
        let second = retry.distribute(&tree, &first).await.unwrap();

        assert_eq!(retry.client.submissions.load(Ordering::SeqCst), 1);
        assert!(matches!(second[&unlucky], ClaimOutcome::Submitted(_)));
        // Prior successes carried over untouched.
        for (account, outcome) in &first {
            if *account != unlucky {
                assert_eq!(&second[account], outcome);
            }
        }
    }
}
