//! Shared types for SEEDSWEEP.
//!
//! The data model used by the scanner, the finality engine and the
//! terminal session. Kept free of ledger-client details so that every
//! module can depend on it without circular references.

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Length of a seed in trytes.
pub const SEED_LEN: usize = 81;

/// Length of an address hash without checksum.
pub const ADDRESS_LEN: usize = 81;

/// Length of an address with its 9-tryte checksum suffix.
pub const ADDRESS_WITH_CHECKSUM_LEN: usize = 90;

/// Tryte alphabet: upper case letters plus `9`.
pub fn is_tryte(c: char) -> bool {
    c.is_ascii_uppercase() || c == '9'
}

// ---------------------------------------------------------------------------
// Seed
// ---------------------------------------------------------------------------

/// The single secret all addresses are derived from. Never logged.
pub struct Seed(Secret<String>);

/// How a raw seed had to be adjusted to reach [`SEED_LEN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedAdjustment {
    None,
    /// Padded with `9`s; holds the original length.
    Padded(usize),
    /// Cut down to 81 trytes; holds the original length.
    Truncated(usize),
}

impl Seed {
    /// Normalise a raw seed string.
    ///
    /// Rejects anything outside the tryte alphabet. Short seeds are padded
    /// with `9` and long ones truncated; the adjustment is returned so the
    /// caller can ask the user before continuing.
    pub fn normalize(raw: &str) -> Result<(Self, SeedAdjustment), SweepError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SweepError::InvalidSeed("seed is empty".into()));
        }
        if !raw.chars().all(is_tryte) {
            return Err(SweepError::InvalidSeed(
                "valid seeds only contain upper case letters A-Z and the number 9".into(),
            ));
        }

        let len = raw.len();
        let (value, adjustment) = if len < SEED_LEN {
            (
                format!("{raw}{}", "9".repeat(SEED_LEN - len)),
                SeedAdjustment::Padded(len),
            )
        } else if len > SEED_LEN {
            (raw[..SEED_LEN].to_string(), SeedAdjustment::Truncated(len))
        } else {
            (raw.to_string(), SeedAdjustment::None)
        };

        Ok((Seed(Secret::new(value)), adjustment))
    }

    /// Access the raw trytes. Only ledger clients should need this.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed([REDACTED])")
    }
}

// ---------------------------------------------------------------------------
// Address / TailId
// ---------------------------------------------------------------------------

/// A derived address together with its derivation index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub index: u64,
    pub hash: String,
}

impl Address {
    pub fn new(index: u64, hash: impl Into<String>) -> Self {
        Self {
            index,
            hash: hash.into(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hash)
    }
}

/// A destination address entered by the user.
///
/// Only the format is checked here (tryte alphabet, 81 or 90 trytes).
/// The checksum suffix is stripped; verifying it is the ledger client's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination(String);

impl Destination {
    pub fn parse(raw: &str) -> Result<Self, SweepError> {
        let raw = raw.trim();
        if !raw.chars().all(is_tryte) {
            return Err(SweepError::InvalidAddress(format!(
                "address contains characters outside A-Z and 9: {raw}"
            )));
        }
        match raw.len() {
            ADDRESS_LEN => Ok(Self(raw.to_string())),
            ADDRESS_WITH_CHECKSUM_LEN => Ok(Self(raw[..ADDRESS_LEN].to_string())),
            n => Err(SweepError::InvalidAddress(format!(
                "expected {ADDRESS_LEN} or {ADDRESS_WITH_CHECKSUM_LEN} trytes, got {n}"
            ))),
        }
    }

    /// The 81-tryte address hash.
    pub fn hash(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the tail transaction of a bundle. Changes on reattachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TailId(pub String);

impl TailId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Account state
// ---------------------------------------------------------------------------

/// Accumulated view of one seed's address space.
///
/// The three columns are always the same length. Spent status is unknown
/// while scanning and filled in by a single bulk pass once the scan stops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    addresses: Vec<Address>,
    balances: Vec<u64>,
    spent: Vec<bool>,
    spent_known: bool,
}

impl AccountState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scanned addresses.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn balances(&self) -> &[u64] {
        &self.balances
    }

    pub fn address(&self, index: usize) -> Option<&Address> {
        self.addresses.get(index)
    }

    pub fn balance(&self, index: usize) -> Option<u64> {
        self.balances.get(index).copied()
    }

    /// `None` until the spent-state pass has run (or index out of range).
    pub fn is_spent(&self, index: usize) -> Option<bool> {
        if !self.spent_known {
            return None;
        }
        self.spent.get(index).copied()
    }

    pub fn spent_known(&self) -> bool {
        self.spent_known
    }

    /// Sum of all balances.
    pub fn total_balance(&self) -> u64 {
        self.balances.iter().sum()
    }

    /// Indices holding a positive balance, in derivation order.
    pub fn funded(&self) -> impl Iterator<Item = (usize, &Address, u64)> + '_ {
        self.addresses
            .iter()
            .zip(self.balances.iter())
            .enumerate()
            .filter(|(_, (_, b))| **b > 0)
            .map(|(i, (a, b))| (i, a, *b))
    }

    /// Whether any spent address still holds funds.
    pub fn funds_on_spent_addresses(&self) -> bool {
        self.spent_known
            && self
                .spent
                .iter()
                .zip(self.balances.iter())
                .any(|(&s, &b)| s && b > 0)
    }

    /// Append one batch. Caller guarantees `addresses.len() == balances.len()`
    /// and that `addresses` continue the current index sequence.
    ///
    /// New rows have no fetched spent status, so spent status goes back to
    /// unknown for the whole state until the next spent pass.
    pub(crate) fn append_batch(&mut self, addresses: Vec<Address>, balances: Vec<u64>) {
        debug_assert_eq!(addresses.len(), balances.len());
        debug_assert!(addresses
            .first()
            .map_or(true, |a| a.index == self.addresses.len() as u64));
        let n = addresses.len();
        self.addresses.extend(addresses);
        self.balances.extend(balances);
        self.spent.extend(std::iter::repeat(false).take(n));
        if n > 0 {
            self.spent_known = false;
        }
    }

    pub(crate) fn set_spent(&mut self, spent: Vec<bool>) {
        debug_assert_eq!(spent.len(), self.addresses.len());
        self.spent = spent;
        self.spent_known = true;
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure reported by a ledger client call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Connectivity error during {operation}: {message}")]
    Connectivity {
        operation: &'static str,
        message: String,
    },

    #[error("Request {operation} rejected by node: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    #[error("Malformed response to {operation}: expected {expected} items, got {actual}")]
    MalformedResponse {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl LedgerError {
    pub fn connectivity(operation: &'static str, message: impl Into<String>) -> Self {
        LedgerError::Connectivity {
            operation,
            message: message.into(),
        }
    }

    pub fn rejected(operation: &'static str, message: impl Into<String>) -> Self {
        LedgerError::Rejected {
            operation,
            message: message.into(),
        }
    }

    /// Whether repeating the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Connectivity { .. })
    }
}

/// Domain-specific error types for SEEDSWEEP.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Batch size must be at least 1")]
    InvalidBatchSize,

    #[error("Parallel batches must be at least 1")]
    InvalidParallelism,

    #[error("Scan range overflows the address index space")]
    ScanRangeOverflow,

    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Address #{index} was not scanned (scanned {scanned} addresses)")]
    IndexOutOfRange { index: usize, scanned: usize },

    #[error("Address #{0} does not have a balance")]
    NoBalance(usize),

    #[error("Insufficient balance on address #{index}: need {needed}i, have {available}i")]
    InsufficientBalance {
        index: usize,
        needed: u64,
        available: u64,
    },

    #[error("Transfer amount must be positive")]
    ZeroAmount,

    #[error("Destination is the source address itself")]
    SelfTransfer,
}

impl SweepError {
    /// Errors caught before anything is sent to the ledger.
    pub fn is_validation(&self) -> bool {
        !matches!(self, SweepError::Ledger(_))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SweepError::Ledger(e) => e.is_retryable(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn trytes(c: char, n: usize) -> String {
        std::iter::repeat(c).take(n).collect()
    }

    // -- Seed --

    #[test]
    fn test_seed_exact_length() {
        let raw = trytes('A', SEED_LEN);
        let (seed, adj) = Seed::normalize(&raw).unwrap();
        assert_eq!(adj, SeedAdjustment::None);
        assert_eq!(seed.expose(), raw);
    }

    #[test]
    fn test_seed_short_is_padded() {
        let (seed, adj) = Seed::normalize("ABC").unwrap();
        assert_eq!(adj, SeedAdjustment::Padded(3));
        assert_eq!(seed.expose().len(), SEED_LEN);
        assert!(seed.expose().starts_with("ABC999"));
    }

    #[test]
    fn test_seed_long_is_truncated() {
        let raw = format!("{}XYZ", trytes('B', SEED_LEN));
        let (seed, adj) = Seed::normalize(&raw).unwrap();
        assert_eq!(adj, SeedAdjustment::Truncated(SEED_LEN + 3));
        assert_eq!(seed.expose(), trytes('B', SEED_LEN));
    }

    #[test]
    fn test_seed_rejects_invalid_chars() {
        assert!(matches!(
            Seed::normalize("abc"),
            Err(SweepError::InvalidSeed(_))
        ));
        assert!(Seed::normalize("AB-C").is_err());
        assert!(Seed::normalize("   ").is_err());
    }

    #[test]
    fn test_seed_debug_is_redacted() {
        let (seed, _) = Seed::normalize("SECRETSEED").unwrap();
        let dbg = format!("{seed:?}");
        assert!(!dbg.contains("SECRETSEED"));
    }

    // -- Destination --

    #[test]
    fn test_destination_without_checksum() {
        let d = Destination::parse(&trytes('C', ADDRESS_LEN)).unwrap();
        assert_eq!(d.hash().len(), ADDRESS_LEN);
    }

    #[test]
    fn test_destination_checksum_is_stripped() {
        let raw = format!("{}{}", trytes('C', ADDRESS_LEN), trytes('D', 9));
        let d = Destination::parse(&raw).unwrap();
        assert_eq!(d.hash(), trytes('C', ADDRESS_LEN));
    }

    #[test]
    fn test_destination_rejects_bad_length_and_chars() {
        assert!(Destination::parse(&trytes('C', 80)).is_err());
        assert!(Destination::parse(&trytes('c', ADDRESS_LEN)).is_err());
    }

    // -- AccountState --

    fn batch(start: u64, balances: &[u64]) -> (Vec<Address>, Vec<u64>) {
        let addrs = (0..balances.len() as u64)
            .map(|i| Address::new(start + i, format!("ADDR{}", start + i)))
            .collect();
        (addrs, balances.to_vec())
    }

    #[test]
    fn test_account_state_alignment_and_total() {
        let mut state = AccountState::new();
        let (a, b) = batch(0, &[0, 5, 0]);
        state.append_batch(a, b);
        let (a, b) = batch(3, &[7, 0]);
        state.append_batch(a, b);

        assert_eq!(state.len(), 5);
        assert_eq!(state.balances().len(), 5);
        assert_eq!(state.total_balance(), 12);
        assert_eq!(state.is_spent(1), None);

        let funded: Vec<_> = state.funded().map(|(i, _, b)| (i, b)).collect();
        assert_eq!(funded, vec![(1, 5), (3, 7)]);
    }

    #[test]
    fn test_account_state_spent_pass() {
        let mut state = AccountState::new();
        let (a, b) = batch(0, &[0, 5, 3]);
        state.append_batch(a, b);
        assert!(!state.funds_on_spent_addresses());

        state.set_spent(vec![true, false, true]);
        assert!(state.spent_known());
        assert_eq!(state.is_spent(0), Some(true));
        assert_eq!(state.is_spent(1), Some(false));
        assert_eq!(state.is_spent(9), None);
        assert!(state.funds_on_spent_addresses());
    }

    #[test]
    fn test_append_after_spent_pass_makes_spent_unknown() {
        let mut state = AccountState::new();
        let (a, b) = batch(0, &[0, 5]);
        state.append_batch(a, b);
        state.set_spent(vec![false, true]);
        assert_eq!(state.is_spent(1), Some(true));

        let (a, b) = batch(2, &[9]);
        state.append_batch(a, b);
        assert!(!state.spent_known());
        assert_eq!(state.is_spent(2), None);
        assert_eq!(state.is_spent(1), None);
        assert!(!state.funds_on_spent_addresses());
    }

    // -- Errors --

    #[test]
    fn test_error_classification() {
        let conn: SweepError = LedgerError::connectivity("get_balances", "timeout").into();
        assert!(conn.is_retryable());
        assert!(!conn.is_validation());

        let malformed: SweepError = LedgerError::MalformedResponse {
            operation: "get_balances",
            expected: 3,
            actual: 2,
        }
        .into();
        assert!(!malformed.is_retryable());

        assert!(SweepError::ZeroAmount.is_validation());
        assert!(!SweepError::InvalidBatchSize.is_retryable());
        assert!(SweepError::InvalidParallelism.is_validation());
        assert!(SweepError::ScanRangeOverflow.is_validation());
    }

    #[test]
    fn test_error_display() {
        let e = SweepError::InsufficientBalance {
            index: 4,
            needed: 10,
            available: 3,
        };
        assert_eq!(
            e.to_string(),
            "Insufficient balance on address #4: need 10i, have 3i"
        );
    }
}
