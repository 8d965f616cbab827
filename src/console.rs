//! Terminal interaction.
//!
//! Line-based prompting over any async reader (stdin in the binary, byte
//! slices in tests) and rendering of the account report and confirmation
//! progress.

use anyhow::{bail, Context, Result};
use std::fmt::Write as _;
use std::io::Write as _;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::engine::clock::CancelSignal;
use crate::engine::finality::ConfirmationEvent;
use crate::types::AccountState;

/// A prompt was abandoned because the session was cancelled.
#[derive(Debug, thiserror::Error)]
#[error("Interrupted while waiting for input")]
pub struct Interrupted;

const COLOR_RED: &str = "\x1b[31m";
const COLOR_RESET: &str = "\x1b[0m";

/// Wrap `text` in ANSI red.
pub fn in_red(text: &str) -> String {
    format!("{COLOR_RED}{text}{COLOR_RESET}")
}

/// Prompts the user and reads one answer per line.
pub struct Console<R> {
    lines: Lines<R>,
    cancel: CancelSignal,
}

impl Console<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin> Console<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            cancel: CancelSignal::never(),
        }
    }

    /// Abandon pending and future prompts with [`Interrupted`] once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Print `prompt` and return the trimmed answer.
    pub async fn ask(&mut self, prompt: &str) -> Result<String> {
        if self.cancel.is_cancelled() {
            return Err(Interrupted.into());
        }
        print!("{prompt}");
        std::io::stdout().flush().context("Failed to flush stdout")?;
        let line = tokio::select! {
            line = self.lines.next_line() => line.context("Failed to read from stdin")?,
            _ = self.cancel.cancelled() => return Err(Interrupted.into()),
        };
        match line {
            Some(line) => Ok(line.trim().to_string()),
            None => bail!("Input closed"),
        }
    }

    /// Ask a yes/no question; only `y` counts as yes.
    pub async fn confirm(&mut self, prompt: &str) -> Result<bool> {
        Ok(self.ask(prompt).await? == "y")
    }
}

/// Funded addresses, total, and a notice if spent addresses hold funds.
pub fn render_account(state: &AccountState) -> String {
    let mut out = String::from("Listing all addresses with a positive balance:\n");
    for (index, address, balance) in state.funded() {
        let mut amount = format!("{balance}i");
        if state.is_spent(index) == Some(true) {
            amount = in_red(&format!("({amount})"));
        }
        let _ = writeln!(out, "address #{index}: {amount} {address}");
    }
    let _ = writeln!(out, "Total balance: {}i", state.total_balance());
    if state.funds_on_spent_addresses() {
        let _ = writeln!(out, "Funds on spent addresses are shown in {}.", in_red("( )"));
    }
    out
}

/// One line of confirmation progress.
pub fn render_event(event: &ConfirmationEvent) -> String {
    match event {
        ConfirmationEvent::Waiting { attempt, .. } => {
            format!("Waiting for confirmation (poll #{attempt})")
        }
        ConfirmationEvent::Promoted { .. } => "Promoted transaction".to_string(),
        ConfirmationEvent::Reattached { tail, .. } => {
            format!("Reattached transaction. New hash: {tail}")
        }
        ConfirmationEvent::StepFailed { step, error } => format!("{step} failed: {error}"),
        ConfirmationEvent::Included { .. } => "Transaction is confirmed.".to_string(),
    }
}
