//! Error reporting for assembly line stages.

use crate::error::PowerlineError;
use std::sync::Mutex;

/// Trait for reporting stage errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a stage.
    fn report(&self, stage: &str, error: &PowerlineError);
}

/// Reporter that emits stage errors as `tracing` events.
///
/// Failures that only echo another stage's failure are logged at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, stage: &str, error: &PowerlineError) {
        if error.is_secondary() {
            tracing::debug!(stage, error = %error, "stage stopped");
        } else {
            tracing::error!(stage, error = %error, "stage failed");
        }
    }
}

/// The first primary failure of a run, shared by all stage threads.
///
/// Secondary errors are kept only until a primary one arrives.
#[derive(Debug, Default)]
pub(crate) struct FirstFailure {
    slot: Mutex<Option<(String, PowerlineError)>>,
}

impl FirstFailure {
    /// Records `error` unless a failure that explains it is already stored.
    pub(crate) fn record(&self, stage: &str, error: PowerlineError) {
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let replace = match slot.as_ref() {
            None => true,
            Some((_, stored)) => stored.is_secondary() && !error.is_secondary(),
        };
        if replace {
            *slot = Some((stage.to_string(), error));
        }
    }

    pub(crate) fn take(&self) -> Option<(String, PowerlineError)> {
        match self.slot.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}
