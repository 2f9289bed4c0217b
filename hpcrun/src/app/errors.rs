// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::path::PathBuf;

use crate::app::types::JobId;

pub mod codes {
    pub const AUTHENTICATION_FAILURE: &str = "authentication_failure";
    pub const CONNECTION_FAILURE: &str = "connection_failure";
    pub const NOT_FOUND: &str = "not_found";
    pub const REMOTE_ERROR: &str = "remote_error";
    pub const LOCAL_ERROR: &str = "local_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    /// Remote path does not exist (yet).
    NotFound,
    Authentication,
    Connection,
    Remote,
    Local,
}

/// Error returned by the remote session ports.
#[derive(Debug, Clone)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AppError {
    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Retrying cannot fix a rejected credential.
    pub fn is_retryable(&self) -> bool {
        self.kind != AppErrorKind::Authentication
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

/// Errors that end a run. Each one maps to exit code 1.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("upload failed after {attempts} attempt(s): {last_error}")]
    UploadFailed { attempts: u32, last_error: String },

    #[error("sbatch failed after {attempts} attempt(s): {last_error}")]
    SubmitFailed { attempts: u32, last_error: String },

    #[error("malformed submission output: {0:?}")]
    MalformedSubmitOutput(String),

    #[error("malformed status line: {0:?}")]
    MalformedStatusLine(String),

    #[error("job {job_id} still listed after {queries} status queries")]
    JobDidNotComplete { job_id: JobId, queries: u32 },

    #[error("output files of job {job_id} could not be retrieved")]
    OutputUnavailable { job_id: JobId },

    #[error("remote session failed: {0}")]
    Session(AppError),

    #[error("failed to read {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled")]
    Cancelled,
}

impl FatalError {
    /// Short phase-identifying line shown to the user.
    pub fn summary(&self) -> &'static str {
        match self {
            FatalError::UploadFailed { .. } => "failed to transfer the artifact",
            FatalError::SubmitFailed { .. } | FatalError::MalformedSubmitOutput(_) => {
                "failed to submit the batch script"
            }
            FatalError::MalformedStatusLine(_) | FatalError::JobDidNotComplete { .. } => {
                "failed to complete the job"
            }
            FatalError::OutputUnavailable { .. } | FatalError::LocalIo { .. } => {
                "failed to get job's output files"
            }
            FatalError::Session(_) => "failed to establish the remote session",
            FatalError::Cancelled => "cancelled by user",
        }
    }
}
