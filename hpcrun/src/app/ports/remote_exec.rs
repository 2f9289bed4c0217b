// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;

#[derive(Debug, Clone, Default)]
pub struct ExecCapture {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl ExecCapture {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[async_trait]
/// Remote command execution and session lifecycle boundary.
/// The session connects lazily on first use and is released by `close`.
pub trait RemoteExecPort: Send + Sync {
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture>;

    async fn close(&self);
}
