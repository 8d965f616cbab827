//! Account state scanner.
//!
//! Walks the seed's address space batch by batch, fetching balances for
//! each freshly derived batch and accumulating an `AccountState`. There is
//! no ledger oracle for "last used index", and an empty batch does not mean
//! the account ends, so the scanner never stops on its own: the caller sees
//! the running total after every step and decides when to stop. Spent
//! status is fetched once, in bulk, after the scan halts.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};

use crate::ledger::{expect_len, LedgerClient};
use crate::types::{AccountState, Address, Seed, SweepError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Scanner configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Addresses derived and balance-checked per batch.
    pub batch_size: usize,
    /// Consecutive batches fetched concurrently per step.
    pub parallel_batches: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            parallel_batches: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// What one scan step added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// First derivation index covered by this step.
    pub batch_start: u64,
    /// One past the last index covered by this step.
    pub batch_end: u64,
    /// Addresses scanned so far, this step included.
    pub scanned: usize,
    /// Sum of balances found in this step.
    pub batch_balance: u64,
    /// Running total over everything scanned so far.
    pub total_balance: u64,
}

/// Caller's answer after each step of [`AccountScanner::scan_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDecision {
    Continue,
    Stop,
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Scans one seed's address space against a ledger client.
pub struct AccountScanner {
    ledger: Arc<dyn LedgerClient>,
    seed: Seed,
    config: ScanConfig,
}

impl AccountScanner {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        seed: Seed,
        config: ScanConfig,
    ) -> Result<Self, SweepError> {
        if config.batch_size == 0 {
            return Err(SweepError::InvalidBatchSize);
        }
        if config.parallel_batches == 0 {
            return Err(SweepError::InvalidParallelism);
        }
        step_span(config.batch_size, config.parallel_batches)?;
        Ok(Self {
            ledger,
            seed,
            config,
        })
    }

    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    pub fn config(&self) -> ScanConfig {
        self.config
    }

    /// Start a fresh scan from index 0 with an empty state.
    pub fn scan(&self) -> ScanSession<'_> {
        ScanSession {
            scanner: self,
            state: AccountState::new(),
            next_index: 0,
        }
    }

    /// Scan until `stop` says so, then resolve spent states.
    ///
    /// `stop` is consulted after every step with that step's progress and
    /// the state accumulated so far.
    pub async fn scan_until<F>(&self, mut stop: F) -> Result<AccountState, SweepError>
    where
        F: FnMut(&BatchProgress, &AccountState) -> ScanDecision,
    {
        let mut session = self.scan();
        loop {
            let progress = session.next_step().await?;
            if stop(&progress, session.state()) == ScanDecision::Stop {
                break;
            }
        }
        session.finish().await
    }

    /// Derive one batch and fetch its balances. Touches no state.
    async fn fetch_batch(
        &self,
        start: u64,
        count: usize,
    ) -> Result<(Vec<Address>, Vec<u64>), SweepError> {
        let addresses = expect_len(
            "derive_addresses",
            count,
            self.ledger.derive_addresses(&self.seed, start, count).await?,
        )?;
        let balances = expect_len(
            "get_balances",
            count,
            self.ledger.get_balances(&addresses).await?,
        )?;
        debug!(
            start,
            count,
            funded = balances.iter().filter(|&&b| b > 0).count(),
            "Batch fetched"
        );
        Ok((addresses, balances))
    }
}

/// Number of indices covered by `batches` batches of `batch_size`.
fn step_span(batch_size: usize, batches: usize) -> Result<u64, SweepError> {
    batch_size
        .checked_mul(batches)
        .and_then(|n| u64::try_from(n).ok())
        .ok_or(SweepError::ScanRangeOverflow)
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One scan run. Owns the accumulating state exclusively.
pub struct ScanSession<'a> {
    scanner: &'a AccountScanner,
    state: AccountState,
    next_index: u64,
}

impl<'a> ScanSession<'a> {
    /// State accumulated so far. Spent status is unknown until
    /// [`resolve_spent_states`](Self::resolve_spent_states) has run.
    pub fn state(&self) -> &AccountState {
        &self.state
    }

    /// Next derivation index to be scanned.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn total_balance(&self) -> u64 {
        self.state.total_balance()
    }

    /// Scan a single batch.
    pub async fn next_batch(&mut self) -> Result<BatchProgress, SweepError> {
        self.advance(1).await
    }

    /// Scan `parallel_batches` consecutive batches concurrently.
    pub async fn next_step(&mut self) -> Result<BatchProgress, SweepError> {
        self.advance(self.scanner.config.parallel_batches).await
    }

    /// Fetch `batches` consecutive batches, then append them in index order.
    ///
    /// All-or-nothing: if any request fails nothing is appended and the
    /// session stays at the same index.
    async fn advance(&mut self, batches: usize) -> Result<BatchProgress, SweepError> {
        let batch_size = self.scanner.config.batch_size;
        let batch_start = self.next_index;
        let batch_end = batch_start
            .checked_add(step_span(batch_size, batches)?)
            .ok_or(SweepError::ScanRangeOverflow)?;

        info!(from = batch_start, to = batch_end, "Generating addresses");

        let scanner = self.scanner;
        let fetches = (0..batches)
            .map(|k| batch_start + (k * batch_size) as u64)
            .map(|start| scanner.fetch_batch(start, batch_size));
        // try_join_all yields results in request order regardless of completion order.
        let results = try_join_all(fetches).await?;

        let mut batch_balance = 0u64;
        for (addresses, balances) in results {
            batch_balance += balances.iter().sum::<u64>();
            self.state.append_batch(addresses, balances);
        }
        self.next_index = batch_end;

        let progress = BatchProgress {
            batch_start,
            batch_end,
            scanned: self.state.len(),
            batch_balance,
            total_balance: self.state.total_balance(),
        };
        info!(
            scanned = progress.scanned,
            found = batch_balance,
            total = progress.total_balance,
            "Scan step complete"
        );
        Ok(progress)
    }

    /// Fetch spent status for every scanned address in one request.
    ///
    /// Scanning further afterwards makes spent status unknown again; call
    /// this (or [`finish`](Self::finish)) once more before relying on it.
    pub async fn resolve_spent_states(&mut self) -> Result<(), SweepError> {
        let count = self.state.len();
        let spent = if count == 0 {
            Vec::new()
        } else {
            expect_len(
                "get_spent_states",
                count,
                self.scanner
                    .ledger
                    .get_spent_states(self.state.addresses())
                    .await?,
            )?
        };
        let spent_count = spent.iter().filter(|&&s| s).count();
        self.state.set_spent(spent);
        info!(addresses = count, spent = spent_count, "Spent states resolved");
        Ok(())
    }

    /// Resolve spent states and hand back the finished snapshot.
    pub async fn finish(mut self) -> Result<AccountState, SweepError> {
        self.resolve_spent_states().await?;
        Ok(self.state)
    }

    /// Hand back the state as is, spent status possibly unresolved.
    pub fn into_state(self) -> AccountState {
        self.state
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
