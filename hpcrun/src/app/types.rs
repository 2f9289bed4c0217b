// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tokio::sync::watch;

/// Identifier the scheduler assigns to a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(NonZeroU64);

impl JobId {
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseJobIdError;

impl FromStr for JobId {
    type Err = ParseJobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().parse::<u64>().map_err(|_| ParseJobIdError)?;
        JobId::new(raw).ok_or(ParseJobIdError)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub per_attempt_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, per_attempt_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            per_attempt_delay,
        }
    }
}

#[cfg(test)]
impl RetryPolicy {
    pub fn attempts(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub max_queries: u32,
    pub query_interval: Duration,
    pub pending_backoff: Duration,
}

/// Interpretation of a single status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Running(String),
    Pending,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub exit_succeeded: bool,
    pub stdout_text: String,
    pub stderr_text: String,
    /// Set when output retrieval ran out of attempts and the verdict
    /// comes from partial local copies.
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_path: Option<String>,
    pub password: Option<String>,
    pub known_hosts_path: Option<PathBuf>,
    pub keepalive_secs: u64,
}

/// Everything the orchestrator needs for a single run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub artifact_path: PathBuf,
    pub remote_dir: String,
    pub output_dir: PathBuf,
    pub sbatch_script: String,
    pub submit_command: String,
    pub status_command: String,
    pub upload_policy: RetryPolicy,
    pub submit_policy: RetryPolicy,
    pub fetch_policy: RetryPolicy,
    pub poll: PollSettings,
    pub settle_delay: Duration,
}

/// Cooperative cancellation observed by the retry and poll loops.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// sender is gone without having cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
impl CancelSignal {
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_rejects_zero_and_garbage() {
        assert_eq!("482913".parse::<JobId>().unwrap().get(), 482913);
        assert_eq!("0".parse::<JobId>(), Err(ParseJobIdError));
        assert_eq!("job".parse::<JobId>(), Err(ParseJobIdError));
        assert_eq!("-4".parse::<JobId>(), Err(ParseJobIdError));
    }

    #[test]
    fn retry_policy_runs_at_least_once() {
        assert_eq!(RetryPolicy::attempts(0).max_attempts, 1);
        assert_eq!(RetryPolicy::attempts(4).max_attempts, 4);
    }

    #[tokio::test]
    async fn cancel_signal_fires_after_send() {
        let (tx, rx) = watch::channel(false);
        let signal = CancelSignal::new(rx);
        assert!(!signal.is_cancelled());
        tx.send(true).unwrap();
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn never_signal_does_not_fire() {
        let signal = CancelSignal::never();
        let fired = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(fired.is_err());
        assert!(!signal.is_cancelled());
    }
}
