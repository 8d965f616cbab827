//! Transfer selection and submission.
//!
//! Turns a scanned `AccountState` plus the user's choice into a validated
//! `TransferIntent`, and hands it to the ledger client. All validation
//! happens at construction, before any ledger call.

use serde::Serialize;
use tracing::info;

use crate::ledger::{Input, LedgerClient};
use crate::types::{AccountState, Address, Destination, Seed, SweepError, TailId};

/// A validated transfer from one scanned address to a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferIntent {
    source: Address,
    source_balance: u64,
    source_spent: bool,
    amount: u64,
    destination: Destination,
}

impl TransferIntent {
    /// Move `amount` from scanned address `index` to `destination`.
    pub fn new(
        state: &AccountState,
        index: usize,
        amount: u64,
        destination: Destination,
    ) -> Result<Self, SweepError> {
        let (source, balance) = match (state.address(index), state.balance(index)) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(SweepError::IndexOutOfRange {
                    index,
                    scanned: state.len(),
                })
            }
        };

        if balance == 0 {
            return Err(SweepError::NoBalance(index));
        }
        if amount == 0 {
            return Err(SweepError::ZeroAmount);
        }
        if amount > balance {
            return Err(SweepError::InsufficientBalance {
                index,
                needed: amount,
                available: balance,
            });
        }
        if destination.hash() == source.hash {
            return Err(SweepError::SelfTransfer);
        }

        Ok(Self {
            source: source.clone(),
            source_balance: balance,
            source_spent: state.is_spent(index).unwrap_or(false),
            amount,
            destination,
        })
    }

    /// Move the whole balance of scanned address `index`.
    pub fn select(
        state: &AccountState,
        index: usize,
        destination: Destination,
    ) -> Result<Self, SweepError> {
        let amount = state.balance(index).unwrap_or(0);
        Self::new(state, index, amount, destination)
    }

    pub fn source(&self) -> &Address {
        &self.source
    }

    pub fn source_index(&self) -> u64 {
        self.source.index
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// The source was already used as an input. Spending from it again
    /// exposes more of its private key.
    pub fn reuses_spent_address(&self) -> bool {
        self.source_spent
    }

    /// Inputs the transfer consumes: the whole source address.
    pub fn inputs(&self) -> Vec<Input> {
        vec![Input {
            address: self.source.clone(),
            balance: self.source_balance,
        }]
    }
}

/// Submit a transfer and return the tail of the broadcast bundle.
pub async fn submit(
    ledger: &dyn LedgerClient,
    seed: &Seed,
    intent: TransferIntent,
) -> Result<TailId, SweepError> {
    info!(
        source_index = intent.source_index(),
        amount = intent.amount(),
        destination = %intent.destination(),
        "Sending transaction"
    );
    let tail = ledger
        .submit_transfer(seed, &intent, &intent.inputs())
        .await?;
    info!(tail = %tail, "Successfully sent transaction");
    Ok(tail)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
