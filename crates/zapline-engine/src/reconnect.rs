#![forbid(unsafe_code)]

//! Retry/backoff policy state machine supervising one active session.
//!
//! The controller is deliberately synchronous: it turns a classified error
//! into a [`RecoveryAction`] and tracks the attempt budget. The
//! coordinator's supervisor task executes actions (timers, reloads,
//! teardown+recreate), so policy stays testable without a runtime.
//!
//! Every path either restores `Playing` or reaches `Failed`: `on_error`
//! never returns a retrying action without incrementing `attempts`, and the
//! budget check runs before each decision.

use std::time::Duration;

use crate::{classify::ErrorClass, options::RetryPolicy};

/// What the supervisor must do next for the session under recovery.
#[derive(Clone, Debug, PartialEq)]
pub enum RecoveryAction {
    /// Retry immediately; the failure is expected to be gone already.
    RetryNow,
    /// Retry after a backoff delay.
    RetryAfter(Duration),
    /// Tear the session down and recreate it against the next backup URL;
    /// the supervisor propagates `Failed` when none remains.
    AdvanceUrl,
    /// Ask the decoder for its one-shot media recovery.
    RecoverMedia,
    /// Tear down and recreate against the current URL.
    Recreate,
    /// Stop retrying and surface the failure.
    GiveUp { reason: String },
}

/// Per-active-session reconnection state.
///
/// Created when the session enters `Stalled`/`Failed` under a recoverable
/// class; dropped when the session returns to `Playing` or the budget is
/// exhausted. The one-shot media recovery allowance lives on the session
/// itself, so it survives controller turnover but not session recreation.
#[derive(Debug)]
pub struct ReconnectionController {
    policy: RetryPolicy,
    attempts: u32,
    last_error_class: Option<ErrorClass>,
}

impl ReconnectionController {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            last_error_class: None,
        }
    }

    /// Attempts spent so far. Strictly non-decreasing until
    /// [`on_progress`](Self::on_progress) resets it.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    #[must_use]
    pub fn last_error_class(&self) -> Option<ErrorClass> {
        self.last_error_class
    }

    /// Decide the next action for a classified error.
    ///
    /// `media_recovery_available` reports whether the supervised session
    /// still holds its one-shot decoder-level recovery allowance.
    pub fn on_error(
        &mut self,
        class: ErrorClass,
        media_recovery_available: bool,
    ) -> RecoveryAction {
        if class == ErrorClass::Unsupported {
            // Retrying cannot help; doesn't consume the budget.
            self.last_error_class = Some(class);
            return RecoveryAction::GiveUp {
                reason: class.label().to_owned(),
            };
        }

        if self.attempts >= self.policy.max_attempts {
            return RecoveryAction::GiveUp {
                reason: format!(
                    "{} after {} recovery attempts",
                    self.last_error_class.unwrap_or(class).label(),
                    self.attempts
                ),
            };
        }

        self.attempts += 1;
        self.last_error_class = Some(class);

        match class {
            ErrorClass::TransientNetwork => RecoveryAction::RetryNow,
            ErrorClass::PersistentNetwork | ErrorClass::FragmentUnavailable => {
                RecoveryAction::RetryAfter(self.policy.delay_for_attempt(self.attempts))
            }
            ErrorClass::ManifestUnreachable => RecoveryAction::AdvanceUrl,
            ErrorClass::MediaCorruption => {
                if media_recovery_available {
                    RecoveryAction::RecoverMedia
                } else {
                    // Recurring corruption: teardown+recreate rather than
                    // another in-place recovery.
                    RecoveryAction::Recreate
                }
            }
            ErrorClass::Unsupported => unreachable!("handled above"),
        }
    }

    /// The supervised session made progress: reset the attempt budget.
    pub fn on_progress(&mut self) {
        self.attempts = 0;
        self.last_error_class = None;
    }
}
