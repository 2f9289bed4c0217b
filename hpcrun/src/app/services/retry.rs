// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::future::Future;

use crate::app::errors::{AppError, FatalError};
use crate::app::services::PhaseContext;
use crate::app::types::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Upload,
    Submit,
    StatusQuery,
    Fetch,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Upload => "upload",
            Phase::Submit => "submit",
            Phase::StatusQuery => "status",
            Phase::Fetch => "fetch",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single attempt.
#[derive(Debug)]
pub enum AttemptError {
    /// Expected transient failure; the next attempt may succeed.
    Retryable(String),
    /// Defect that retrying cannot fix; aborts the phase immediately.
    Fatal(FatalError),
}

impl From<AppError> for AttemptError {
    fn from(err: AppError) -> Self {
        if err.is_retryable() {
            AttemptError::Retryable(err.to_string())
        } else {
            AttemptError::Fatal(FatalError::Session(err))
        }
    }
}

#[derive(Debug)]
pub enum RetryError {
    Exhausted { attempts: u32, last_error: String },
    Fatal(FatalError),
}

/// Run `operation` until it succeeds, fails fatally, or `policy.max_attempts`
/// attempts have been made. The operation receives the 1-based attempt index.
pub async fn run_with_retry<T, F, Fut>(
    phase: Phase,
    policy: RetryPolicy,
    ctx: &PhaseContext<'_>,
    mut operation: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=max_attempts {
        if ctx.cancel.is_cancelled() {
            return Err(RetryError::Fatal(FatalError::Cancelled));
        }
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(%phase, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(AttemptError::Fatal(err)) => {
                tracing::debug!(%phase, attempt, "aborting: {err}");
                return Err(RetryError::Fatal(err));
            }
            Err(AttemptError::Retryable(message)) => {
                tracing::warn!(%phase, attempt, max_attempts, "attempt failed: {message}");
                ctx.report.line(&format!("{phase} round {attempt}: {message}"));
                last_error = message;
                if attempt < max_attempts && !policy.per_attempt_delay.is_zero() {
                    ctx.pause(policy.per_attempt_delay)
                        .await
                        .map_err(RetryError::Fatal)?;
                }
            }
        }
    }
    Err(RetryError::Exhausted {
        attempts: max_attempts,
        last_error,
    })
}
