//! Transaction finality engine.
//!
//! Drives a submitted transaction to inclusion on a ledger that never
//! rejects a transaction outright, it only leaves it "not yet included".
//! Each iteration polls the inclusion state of the *current* tail; if it is
//! not included the tail is promoted when the ledger says it is promotable,
//! and reattached otherwise. A reattachment yields a new tail which replaces
//! the tracked one for every later poll.
//!
//! Every ledger error inside the loop is reported and retried on the next
//! iteration. Only cancellation (or the optional attempt cap) ends the loop
//! before inclusion.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::clock::{CancelSignal, Clock, TokioClock};
use crate::ledger::LedgerClient;
use crate::types::TailId;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Confirmation loop configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalityConfig {
    /// Delay between iterations.
    pub poll_interval: Duration,
    /// Stop with [`FinalityError::AttemptsExhausted`] after this many
    /// unconfirmed polls. `None` keeps trying until the money moves.
    pub max_attempts: Option<u32>,
}

impl Default for FinalityConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Events / results
// ---------------------------------------------------------------------------

/// Loop step an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStep {
    InclusionCheck,
    PromotabilityCheck,
    Promote,
    Reattach,
}

impl fmt::Display for LoopStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopStep::InclusionCheck => write!(f, "inclusion check"),
            LoopStep::PromotabilityCheck => write!(f, "promotability check"),
            LoopStep::Promote => write!(f, "promotion"),
            LoopStep::Reattach => write!(f, "reattachment"),
        }
    }
}

/// Progress reported while a confirmation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConfirmationEvent {
    /// Poll `attempt` found `tail` not yet included.
    Waiting { attempt: u32, tail: TailId },
    Promoted { tail: TailId },
    Reattached { previous: TailId, tail: TailId },
    /// A step failed; it is retried on the next iteration.
    StepFailed { step: LoopStep, error: String },
    Included { tail: TailId, attempts: u32 },
}

/// Receiving end for [`ConfirmationEvent`]s.
pub type EventSink = mpsc::UnboundedSender<ConfirmationEvent>;

/// Successful end of a confirmation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    /// The tail that was observed included.
    pub tail: TailId,
    /// Inclusion polls made, the successful one included.
    pub attempts: u32,
    pub promotions: u32,
    pub reattachments: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Ways a confirmation run ends without inclusion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FinalityError {
    #[error("Confirmation of {tail} cancelled after {attempts} polls")]
    Cancelled { tail: TailId, attempts: u32 },

    #[error("{tail} still not included after {attempts} polls")]
    AttemptsExhausted { tail: TailId, attempts: u32 },
}

impl FinalityError {
    /// Tail that was being tracked when the run ended.
    pub fn last_tail(&self) -> &TailId {
        match self {
            FinalityError::Cancelled { tail, .. } => tail,
            FinalityError::AttemptsExhausted { tail, .. } => tail,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Mutable cursor for one confirmation run.
#[derive(Debug)]
struct ConfirmationSession {
    tail: TailId,
    attempts: u32,
    promotions: u32,
    reattachments: u32,
    started_at: DateTime<Utc>,
}

impl ConfirmationSession {
    fn new(tail: TailId) -> Self {
        Self {
            tail,
            attempts: 0,
            promotions: 0,
            reattachments: 0,
            started_at: Utc::now(),
        }
    }

    fn finish(self) -> Confirmation {
        Confirmation {
            tail: self.tail,
            attempts: self.attempts,
            promotions: self.promotions,
            reattachments: self.reattachments,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }

    fn cancelled(self) -> FinalityError {
        FinalityError::Cancelled {
            tail: self.tail,
            attempts: self.attempts,
        }
    }
}

fn emit(events: Option<&EventSink>, event: ConfirmationEvent) {
    if let Some(sink) = events {
        // Receiver gone just means nobody is watching.
        let _ = sink.send(event);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Promote-or-reattach confirmation loop.
pub struct FinalityEngine {
    ledger: Arc<dyn LedgerClient>,
    clock: Arc<dyn Clock>,
    config: FinalityConfig,
}

impl FinalityEngine {
    pub fn new(ledger: Arc<dyn LedgerClient>, config: FinalityConfig) -> Self {
        Self {
            ledger,
            clock: Arc::new(TokioClock),
            config,
        }
    }

    /// Replace the clock used for the inter-attempt delay.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> FinalityConfig {
        self.config
    }

    /// Drive `tail` to inclusion.
    ///
    /// Returns once the current tail is observed included. Cancellation is
    /// checked before every poll and raced against the delay, so it takes
    /// effect within one poll interval.
    pub async fn confirm(
        &self,
        tail: TailId,
        mut cancel: CancelSignal,
        events: Option<&EventSink>,
    ) -> Result<Confirmation, FinalityError> {
        let mut session = ConfirmationSession::new(tail);
        info!(tail = %session.tail, "Start confirming transaction");

        loop {
            if cancel.is_cancelled() {
                info!(tail = %session.tail, attempts = session.attempts, "Confirmation cancelled");
                return Err(session.cancelled());
            }

            session.attempts += 1;
            match self.ledger.get_inclusion_state(&session.tail).await {
                Ok(true) => {
                    info!(
                        tail = %session.tail,
                        attempts = session.attempts,
                        promotions = session.promotions,
                        reattachments = session.reattachments,
                        "Transaction is confirmed"
                    );
                    emit(
                        events,
                        ConfirmationEvent::Included {
                            tail: session.tail.clone(),
                            attempts: session.attempts,
                        },
                    );
                    return Ok(session.finish());
                }
                Ok(false) => {
                    debug!(tail = %session.tail, attempt = session.attempts, "Not yet included");
                    emit(
                        events,
                        ConfirmationEvent::Waiting {
                            attempt: session.attempts,
                            tail: session.tail.clone(),
                        },
                    );
                    self.nudge(&mut session, events).await;
                }
                Err(e) => {
                    // Unknown inclusion state: do not promote or reattach a
                    // tail that may already be included.
                    self.report_failure(LoopStep::InclusionCheck, &e.to_string(), events);
                }
            }

            if let Some(max) = self.config.max_attempts {
                if session.attempts >= max {
                    warn!(tail = %session.tail, attempts = session.attempts, "Giving up on confirmation");
                    return Err(FinalityError::AttemptsExhausted {
                        tail: session.tail,
                        attempts: session.attempts,
                    });
                }
            }

            tokio::select! {
                _ = self.clock.sleep(self.config.poll_interval) => {}
                _ = cancel.cancelled() => {
                    info!(tail = %session.tail, attempts = session.attempts, "Confirmation cancelled");
                    return Err(session.cancelled());
                }
            }
        }
    }

    /// Promote the current tail if the ledger allows it, reattach otherwise.
    async fn nudge(&self, session: &mut ConfirmationSession, events: Option<&EventSink>) {
        let promotable = match self.ledger.is_promotable(&session.tail).await {
            Ok(p) => p,
            Err(e) => {
                self.report_failure(LoopStep::PromotabilityCheck, &e.to_string(), events);
                return;
            }
        };

        if promotable {
            match self.ledger.promote(&session.tail).await {
                Ok(()) => {
                    session.promotions += 1;
                    info!(tail = %session.tail, "Promoted transaction");
                    emit(
                        events,
                        ConfirmationEvent::Promoted {
                            tail: session.tail.clone(),
                        },
                    );
                }
                Err(e) => self.report_failure(LoopStep::Promote, &e.to_string(), events),
            }
        } else {
            match self.ledger.reattach(&session.tail).await {
                Ok(new_tail) => {
                    let previous = std::mem::replace(&mut session.tail, new_tail);
                    session.reattachments += 1;
                    info!(previous = %previous, tail = %session.tail, "Reattached transaction");
                    emit(
                        events,
                        ConfirmationEvent::Reattached {
                            previous,
                            tail: session.tail.clone(),
                        },
                    );
                }
                Err(e) => self.report_failure(LoopStep::Reattach, &e.to_string(), events),
            }
        }
    }

    fn report_failure(&self, step: LoopStep, error: &str, events: Option<&EventSink>) {
        warn!(step = %step, error, "Confirmation step failed, retrying next cycle");
        emit(
            events,
            ConfirmationEvent::StepFailed {
                step,
                error: error.to_string(),
            },
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
