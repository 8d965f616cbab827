//! Ledger wrappers for integration testing.
//!
//! Both wrap a `SandboxLedger` and forward everything to it, changing only
//! timing or failure behaviour of selected calls.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use seedsweep::config::{FundedAddress, SandboxConfig};
use seedsweep::engine::transfer::TransferIntent;
use seedsweep::ledger::sandbox::SandboxLedger;
use seedsweep::ledger::{Input, LedgerClient};
use seedsweep::types::{Address, LedgerError, Seed, TailId, ADDRESS_LEN};

pub fn seed() -> Seed {
    Seed::normalize("INTEGRATIONTESTSEED").unwrap().0
}

pub fn destination_trytes() -> String {
    "DEST".repeat(ADDRESS_LEN / 4 + 1)[..ADDRESS_LEN].to_string()
}

pub fn sandbox_config(funded: &[(u64, u64)], spent: &[u64]) -> SandboxConfig {
    SandboxConfig {
        funded: funded
            .iter()
            .map(|&(index, balance)| FundedAddress { index, balance })
            .collect(),
        spent: spent.to_vec(),
        ..SandboxConfig::default()
    }
}

/// Answers balance requests for earlier batches later than for later ones.
pub struct SlowLedger {
    pub inner: SandboxLedger,
    batch_size: u64,
    batches: u64,
    completed: Arc<Mutex<Vec<u64>>>,
}

impl SlowLedger {
    pub fn new(inner: SandboxLedger, batch_size: usize, batches: usize) -> Self {
        Self {
            inner,
            batch_size: batch_size as u64,
            batches: batches as u64,
            completed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// First index of each balance request, in completion order.
    pub fn completion_order(&self) -> Vec<u64> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerClient for SlowLedger {
    async fn get_balances(&self, addresses: &[Address]) -> Result<Vec<u64>, LedgerError> {
        let start = addresses.first().map(|a| a.index).unwrap_or(0);
        let position = (start / self.batch_size) % self.batches;
        let delay = (self.batches - position) * 25;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        let result = self.inner.get_balances(addresses).await;
        self.completed.lock().unwrap().push(start);
        result
    }

    async fn get_inclusion_state(&self, tail: &TailId) -> Result<bool, LedgerError> {
        self.inner.get_inclusion_state(tail).await
    }

    async fn derive_addresses(
        &self,
        seed: &Seed,
        start: u64,
        count: usize,
    ) -> Result<Vec<Address>, LedgerError> {
        self.inner.derive_addresses(seed, start, count).await
    }

    async fn get_spent_states(&self, addresses: &[Address]) -> Result<Vec<bool>, LedgerError> {
        self.inner.get_spent_states(addresses).await
    }

    async fn is_promotable(&self, tail: &TailId) -> Result<bool, LedgerError> {
        self.inner.is_promotable(tail).await
    }

    async fn promote(&self, tail: &TailId) -> Result<(), LedgerError> {
        self.inner.promote(tail).await
    }

    async fn reattach(&self, tail: &TailId) -> Result<TailId, LedgerError> {
        self.inner.reattach(tail).await
    }

    async fn submit_transfer(
        &self,
        seed: &Seed,
        intent: &TransferIntent,
        inputs: &[Input],
    ) -> Result<TailId, LedgerError> {
        self.inner.submit_transfer(seed, intent, inputs).await
    }
}

/// Fails the first `failures` inclusion checks with a connectivity error.
pub struct FlakyLedger {
    pub inner: SandboxLedger,
    failures: AtomicU32,
}

impl FlakyLedger {
    pub fn new(inner: SandboxLedger, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl LedgerClient for FlakyLedger {
    async fn get_balances(&self, addresses: &[Address]) -> Result<Vec<u64>, LedgerError> {
        self.inner.get_balances(addresses).await
    }

    async fn get_inclusion_state(&self, tail: &TailId) -> Result<bool, LedgerError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(LedgerError::connectivity(
                "get_inclusion_state",
                "connection refused",
            ));
        }
        self.inner.get_inclusion_state(tail).await
    }

    async fn derive_addresses(
        &self,
        seed: &Seed,
        start: u64,
        count: usize,
    ) -> Result<Vec<Address>, LedgerError> {
        self.inner.derive_addresses(seed, start, count).await
    }

    async fn get_spent_states(&self, addresses: &[Address]) -> Result<Vec<bool>, LedgerError> {
        self.inner.get_spent_states(addresses).await
    }

    async fn is_promotable(&self, tail: &TailId) -> Result<bool, LedgerError> {
        self.inner.is_promotable(tail).await
    }

    async fn promote(&self, tail: &TailId) -> Result<(), LedgerError> {
        self.inner.promote(tail).await
    }

    async fn reattach(&self, tail: &TailId) -> Result<TailId, LedgerError> {
        self.inner.reattach(tail).await
    }

    async fn submit_transfer(
        &self,
        seed: &Seed,
        intent: &TransferIntent,
        inputs: &[Input],
    ) -> Result<TailId, LedgerError> {
        self.inner.submit_transfer(seed, intent, inputs).await
    }
}
