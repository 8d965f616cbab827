//! Ledger client capability.
//!
//! Defines the `LedgerClient` trait the scanner and finality engine are
//! written against, and provides:
//! - `SandboxLedger` — deterministic in-process ledger for dry runs and tests
//!
//! Address derivation, bundle encoding, proof-of-work and node transport
//! all live behind this trait.

pub mod sandbox;

use async_trait::async_trait;

use crate::engine::transfer::TransferIntent;
use crate::types::{Address, LedgerError, Seed, TailId};

/// One input consumed by a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub address: Address,
    pub balance: u64,
}

/// Abstraction over a ledger node plus the local signing/PoW machinery.
///
/// Implementors are shared across tasks and hold no per-call state the
/// caller depends on. Every list-returning call answers in input order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Derive `count` addresses starting at `start`. Pure in (seed, index).
    async fn derive_addresses(
        &self,
        seed: &Seed,
        start: u64,
        count: usize,
    ) -> Result<Vec<Address>, LedgerError>;

    /// Confirmed balances, one per address.
    async fn get_balances(&self, addresses: &[Address]) -> Result<Vec<u64>, LedgerError>;

    /// Whether each address was ever used as a transaction input.
    async fn get_spent_states(&self, addresses: &[Address]) -> Result<Vec<bool>, LedgerError>;

    /// Whether the transaction referenced by `tail` is included.
    async fn get_inclusion_state(&self, tail: &TailId) -> Result<bool, LedgerError>;

    /// Whether `tail` still sits somewhere a promotion can help.
    async fn is_promotable(&self, tail: &TailId) -> Result<bool, LedgerError>;

    /// Attach a zero-value transaction referencing `tail`.
    async fn promote(&self, tail: &TailId) -> Result<(), LedgerError>;

    /// Re-broadcast the bundle of `tail` with fresh PoW; returns the new tail.
    async fn reattach(&self, tail: &TailId) -> Result<TailId, LedgerError>;

    /// Prepare, sign, do PoW and broadcast a transfer.
    async fn submit_transfer(
        &self,
        seed: &Seed,
        intent: &TransferIntent,
        inputs: &[Input],
    ) -> Result<TailId, LedgerError>;
}

/// Check that a list answer matches the request length.
pub(crate) fn expect_len<T>(
    operation: &'static str,
    expected: usize,
    items: Vec<T>,
) -> Result<Vec<T>, LedgerError> {
    if items.len() != expected {
        return Err(LedgerError::MalformedResponse {
            operation,
            expected,
            actual: items.len(),
        });
    }
    Ok(items)
}
