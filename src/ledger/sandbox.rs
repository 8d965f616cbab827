//! In-process sandbox ledger.
//!
//! A deterministic stand-in for a real node, used by the binary's dry-run
//! mode and the integration tests. Addresses are derived by hashing
//! (seed, index) with SHA-256 into trytes, so they are stable across runs
//! and batch sizes. Bundles confirm after a configurable number of
//! inclusion polls; promotions count towards that, and a tail stops being
//! promotable after a configurable number of polls, forcing a reattach.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{Input, LedgerClient};
use crate::config::SandboxConfig;
use crate::engine::transfer::TransferIntent;
use crate::types::{Address, LedgerError, Seed, TailId, ADDRESS_LEN};

const TRYTE_ALPHABET: &[u8; 27] = b"9ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Hash arbitrary parts into an 81-tryte string.
fn trytes_from_hash(parts: &[&[u8]]) -> String {
    let mut out = String::with_capacity(ADDRESS_LEN);
    let mut round: u32 = 0;
    while out.len() < ADDRESS_LEN {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.update(round.to_be_bytes());
        for byte in hasher.finalize() {
            if out.len() == ADDRESS_LEN {
                break;
            }
            out.push(TRYTE_ALPHABET[(byte % 27) as usize] as char);
        }
        round += 1;
    }
    out
}

/// Derive the sandbox address for (seed, index).
pub fn derive_address(seed: &Seed, index: u64) -> Address {
    let hash = trytes_from_hash(&[seed.expose().as_bytes(), &index.to_be_bytes()[..]]);
    Address::new(index, hash)
}

#[derive(Debug)]
struct Bundle {
    from: String,
    to: String,
    value: u64,
    /// Inclusion polls plus promotions seen across all tails.
    progress: u32,
    confirmed: bool,
}

#[derive(Debug)]
struct Tail {
    bundle: usize,
    polls: u32,
    included: bool,
}

#[derive(Debug, Default)]
struct Inner {
    balances: HashMap<String, u64>,
    spent: HashSet<String>,
    bundles: Vec<Bundle>,
    tails: HashMap<String, Tail>,
    tx_counter: u64,
    promotions: u64,
    reattachments: u64,
    offline: bool,
}

impl Inner {
    fn next_tail_id(&mut self) -> TailId {
        self.tx_counter += 1;
        TailId(trytes_from_hash(&[b"tail".as_slice(), &self.tx_counter.to_be_bytes()[..]]))
    }

    fn check_online(&self, operation: &'static str) -> Result<(), LedgerError> {
        if self.offline {
            return Err(LedgerError::connectivity(operation, "sandbox node is offline"));
        }
        Ok(())
    }
}

/// Deterministic in-memory ledger.
///
/// Cheap to clone; clones share the same ledger state.
#[derive(Debug, Clone)]
pub struct SandboxLedger {
    inner: Arc<Mutex<Inner>>,
    inclusion_after_polls: u32,
    promotable_polls: u32,
}

impl SandboxLedger {
    /// Create an empty sandbox.
    pub fn new(inclusion_after_polls: u32, promotable_polls: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            inclusion_after_polls: inclusion_after_polls.max(1),
            promotable_polls,
        }
    }

    /// Create a sandbox with the configured balances and spent flags
    /// placed on `seed`'s addresses.
    pub fn for_seed(seed: &Seed, config: &SandboxConfig) -> Self {
        let ledger = Self::new(config.inclusion_after_polls, config.promotable_polls);
        for funded in &config.funded {
            ledger.fund(&derive_address(seed, funded.index).hash, funded.balance);
        }
        for &index in &config.spent {
            ledger.mark_spent(&derive_address(seed, index).hash);
        }
        debug!(
            funded = config.funded.len(),
            spent = config.spent.len(),
            "Sandbox ledger initialised"
        );
        ledger
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add `amount` to an address balance.
    pub fn fund(&self, address: &str, amount: u64) {
        *self.lock().balances.entry(address.to_string()).or_default() += amount;
    }

    pub fn mark_spent(&self, address: &str) {
        self.lock().spent.insert(address.to_string());
    }

    /// Current balance of an address hash.
    pub fn balance_of(&self, address: &str) -> u64 {
        self.lock().balances.get(address).copied().unwrap_or(0)
    }

    /// Simulate the node becoming unreachable (or reachable again).
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn promotions(&self) -> u64 {
        self.lock().promotions
    }

    pub fn reattachments(&self) -> u64 {
        self.lock().reattachments
    }
}

#[async_trait]
impl LedgerClient for SandboxLedger {
    async fn derive_addresses(
        &self,
        seed: &Seed,
        start: u64,
        count: usize,
    ) -> Result<Vec<Address>, LedgerError> {
        // Derivation is local; it keeps working while the node is offline.
        Ok((start..start + count as u64)
            .map(|index| derive_address(seed, index))
            .collect())
    }

    async fn get_balances(&self, addresses: &[Address]) -> Result<Vec<u64>, LedgerError> {
        let inner = self.lock();
        inner.check_online("get_balances")?;
        Ok(addresses
            .iter()
            .map(|a| inner.balances.get(&a.hash).copied().unwrap_or(0))
            .collect())
    }

    async fn get_spent_states(&self, addresses: &[Address]) -> Result<Vec<bool>, LedgerError> {
        let inner = self.lock();
        inner.check_online("get_spent_states")?;
        Ok(addresses
            .iter()
            .map(|a| inner.spent.contains(&a.hash))
            .collect())
    }

    async fn get_inclusion_state(&self, tail: &TailId) -> Result<bool, LedgerError> {
        let mut guard = self.lock();
        guard.check_online("get_inclusion_state")?;
        let inner = &mut *guard;

        let Some(record) = inner.tails.get_mut(tail.as_str()) else {
            return Ok(false);
        };
        record.polls += 1;
        if record.included {
            return Ok(true);
        }

        let bundle = &mut inner.bundles[record.bundle];
        if bundle.confirmed {
            // Another tail of this bundle won; this one never confirms.
            return Ok(false);
        }
        bundle.progress += 1;
        if bundle.progress < self.inclusion_after_polls {
            return Ok(false);
        }

        bundle.confirmed = true;
        record.included = true;
        let (from, to, value) = (bundle.from.clone(), bundle.to.clone(), bundle.value);
        let source = inner.balances.entry(from).or_default();
        *source = source.saturating_sub(value);
        *inner.balances.entry(to).or_default() += value;
        debug!(tail = %tail, value, "Sandbox bundle confirmed");
        Ok(true)
    }

    async fn is_promotable(&self, tail: &TailId) -> Result<bool, LedgerError> {
        let inner = self.lock();
        inner.check_online("is_promotable")?;
        Ok(inner
            .tails
            .get(tail.as_str())
            .map(|t| !t.included && t.polls <= self.promotable_polls)
            .unwrap_or(false))
    }

    async fn promote(&self, tail: &TailId) -> Result<(), LedgerError> {
        let mut guard = self.lock();
        guard.check_online("promote")?;
        let inner = &mut *guard;
        let record = inner
            .tails
            .get(tail.as_str())
            .ok_or_else(|| LedgerError::rejected("promote", format!("unknown tail {tail}")))?;
        inner.bundles[record.bundle].progress += 1;
        inner.promotions += 1;
        Ok(())
    }

    async fn reattach(&self, tail: &TailId) -> Result<TailId, LedgerError> {
        let mut inner = self.lock();
        inner.check_online("reattach")?;
        let bundle = inner
            .tails
            .get(tail.as_str())
            .map(|t| t.bundle)
            .ok_or_else(|| LedgerError::rejected("reattach", format!("unknown tail {tail}")))?;

        let new_tail = inner.next_tail_id();
        inner.tails.insert(
            new_tail.0.clone(),
            Tail {
                bundle,
                polls: 0,
                included: false,
            },
        );
        inner.reattachments += 1;
        Ok(new_tail)
    }

    async fn submit_transfer(
        &self,
        _seed: &Seed,
        intent: &TransferIntent,
        inputs: &[Input],
    ) -> Result<TailId, LedgerError> {
        let mut inner = self.lock();
        inner.check_online("submit_transfer")?;

        let mut input_total = 0u64;
        for input in inputs {
            let on_ledger = inner.balances.get(&input.address.hash).copied().unwrap_or(0);
            if on_ledger != input.balance {
                return Err(LedgerError::rejected(
                    "submit_transfer",
                    format!(
                        "input #{} balance {}i does not match ledger balance {on_ledger}i",
                        input.address.index, input.balance
                    ),
                ));
            }
            input_total += input.balance;
        }
        if input_total < intent.amount() {
            return Err(LedgerError::rejected(
                "submit_transfer",
                format!("inputs hold {input_total}i, transfer needs {}i", intent.amount()),
            ));
        }

        for input in inputs {
            inner.spent.insert(input.address.hash.clone());
        }
        let bundle = inner.bundles.len();
        inner.bundles.push(Bundle {
            from: intent.source().hash.clone(),
            to: intent.destination().hash().to_string(),
            value: intent.amount(),
            progress: 0,
            confirmed: false,
        });
        let tail = inner.next_tail_id();
        inner.tails.insert(
            tail.0.clone(),
            Tail {
                bundle,
                polls: 0,
                included: false,
            },
        );
        Ok(tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FundedAddress;
    use crate::types::{AccountState, Destination};

    fn seed(raw: &str) -> Seed {
        Seed::normalize(raw).unwrap().0
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let s = seed("SANDBOX");
        let a = derive_address(&s, 42);
        let b = derive_address(&s, 42);
        assert_eq!(a, b);
        assert_eq!(a.hash.len(), ADDRESS_LEN);
        assert!(a.hash.chars().all(crate::types::is_tryte));
    }

    #[test]
    fn test_derivation_differs_by_seed_and_index() {
        let s1 = seed("SANDBOXA");
        let s2 = seed("SANDBOXB");
        assert_ne!(derive_address(&s1, 0), derive_address(&s1, 1));
        assert_ne!(derive_address(&s1, 0).hash, derive_address(&s2, 0).hash);
    }

    #[tokio::test]
    async fn test_derive_batch_matches_single() {
        let s = seed("SANDBOX");
        let ledger = SandboxLedger::new(3, 1);
        let batch = ledger.derive_addresses(&s, 10, 5).await.unwrap();
        assert_eq!(batch.len(), 5);
        assert_eq!(batch[0].index, 10);
        assert_eq!(batch[3], derive_address(&s, 13));
    }

    #[tokio::test]
    async fn test_for_seed_funds_configured_indices() {
        let s = seed("SANDBOX");
        let cfg = SandboxConfig {
            funded: vec![FundedAddress { index: 1, balance: 77 }],
            spent: vec![1],
            ..SandboxConfig::default()
        };
        let ledger = SandboxLedger::for_seed(&s, &cfg);
        let addrs = ledger.derive_addresses(&s, 0, 3).await.unwrap();

        assert_eq!(ledger.get_balances(&addrs).await.unwrap(), vec![0, 77, 0]);
        assert_eq!(
            ledger.get_spent_states(&addrs).await.unwrap(),
            vec![false, true, false]
        );
    }

    #[tokio::test]
    async fn test_offline_node_fails_queries() {
        let s = seed("SANDBOX");
        let ledger = SandboxLedger::new(3, 1);
        ledger.set_offline(true);

        let addrs = ledger.derive_addresses(&s, 0, 2).await.unwrap();
        let err = ledger.get_balances(&addrs).await.unwrap_err();
        assert!(err.is_retryable());

        ledger.set_offline(false);
        assert!(ledger.get_balances(&addrs).await.is_ok());
    }

    async fn submit_one(ledger: &SandboxLedger, s: &Seed, balance: u64) -> (TransferIntent, TailId) {
        let mut state = AccountState::new();
        let addrs = ledger.derive_addresses(s, 0, 1).await.unwrap();
        ledger.fund(&addrs[0].hash, balance);
        state.append_batch(addrs, vec![balance]);
        state.set_spent(vec![false]);

        let dest = Destination::parse(&"D".repeat(ADDRESS_LEN)).unwrap();
        let intent = TransferIntent::select(&state, 0, dest).unwrap();
        let tail = ledger
            .submit_transfer(s, &intent, &intent.inputs())
            .await
            .unwrap();
        (intent, tail)
    }

    #[tokio::test]
    async fn test_bundle_confirms_after_configured_polls() {
        let s = seed("SANDBOX");
        let ledger = SandboxLedger::new(3, 5);
        let (intent, tail) = submit_one(&ledger, &s, 100).await;

        assert!(!ledger.get_inclusion_state(&tail).await.unwrap());
        assert!(!ledger.get_inclusion_state(&tail).await.unwrap());
        assert!(ledger.get_inclusion_state(&tail).await.unwrap());

        assert_eq!(ledger.balance_of(&intent.source().hash), 0);
        assert_eq!(ledger.balance_of(intent.destination().hash()), 100);
        let spent = ledger
            .get_spent_states(std::slice::from_ref(intent.source()))
            .await
            .unwrap();
        assert_eq!(spent, vec![true]);
    }

    #[tokio::test]
    async fn test_promotion_counts_towards_confirmation() {
        let s = seed("SANDBOX");
        let ledger = SandboxLedger::new(2, 5);
        let (_, tail) = submit_one(&ledger, &s, 10).await;

        assert!(ledger.is_promotable(&tail).await.unwrap());
        ledger.promote(&tail).await.unwrap();
        assert!(ledger.get_inclusion_state(&tail).await.unwrap());
        assert_eq!(ledger.promotions(), 1);
        assert!(!ledger.is_promotable(&tail).await.unwrap());
    }

    #[tokio::test]
    async fn test_tail_goes_stale_and_reattach_gives_new_tail() {
        let s = seed("SANDBOX");
        let ledger = SandboxLedger::new(10, 1);
        let (_, tail) = submit_one(&ledger, &s, 10).await;

        assert!(!ledger.get_inclusion_state(&tail).await.unwrap());
        assert!(ledger.is_promotable(&tail).await.unwrap());
        assert!(!ledger.get_inclusion_state(&tail).await.unwrap());
        assert!(!ledger.is_promotable(&tail).await.unwrap());

        let fresh = ledger.reattach(&tail).await.unwrap();
        assert_ne!(fresh, tail);
        assert!(ledger.is_promotable(&fresh).await.unwrap());
        assert_eq!(ledger.reattachments(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_stale_input_balance() {
        let s = seed("SANDBOX");
        let ledger = SandboxLedger::new(3, 1);
        let (intent, _) = submit_one(&ledger, &s, 50).await;

        // Ledger balance changed since selection.
        ledger.fund(&intent.source().hash, 1);
        let err = ledger
            .submit_transfer(&s, &intent, &intent.inputs())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_unknown_tail() {
        let ledger = SandboxLedger::new(3, 1);
        let tail = TailId::new("NOPE");
        assert!(!ledger.get_inclusion_state(&tail).await.unwrap());
        assert!(!ledger.is_promotable(&tail).await.unwrap());
        assert!(ledger.promote(&tail).await.is_err());
        assert!(ledger.reattach(&tail).await.is_err());
    }
}
