// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh::ChannelMsg;

use super::SessionManager;

/// Exit code reported when the channel closes without an exit status,
/// e.g. when the remote command was killed by a signal.
pub(crate) const MISSING_EXIT_STATUS: i32 = -1;

#[derive(Debug, Default)]
pub(crate) struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: Option<u32>,
}

impl CapturedOutput {
    pub fn exit_code(&self) -> i32 {
        self.exit_status
            .map(|status| status as i32)
            .unwrap_or(MISSING_EXIT_STATUS)
    }
}

/// Returns true once the channel is done.
fn handle_capture_message(msg: &ChannelMsg, captured: &mut CapturedOutput) -> bool {
    match msg {
        ChannelMsg::Data { data } => {
            captured.stdout.extend_from_slice(data);
            false
        }
        ChannelMsg::ExtendedData { data, ext: 1 } => {
            captured.stderr.extend_from_slice(data);
            false
        }
        ChannelMsg::ExitStatus { exit_status } => {
            captured.exit_status = Some(*exit_status);
            false
        }
        ChannelMsg::ExitSignal { signal_name, .. } => {
            tracing::debug!(signal = ?signal_name, "remote command terminated by signal");
            false
        }
        ChannelMsg::Close => true,
        _ => false,
    }
}

impl SessionManager {
    /// Run `cmd` to completion, capturing stdout, stderr and the exit status.
    pub(crate) async fn exec_capture(&self, cmd: &str) -> Result<CapturedOutput> {
        let guard = self.handle.lock().await;
        let handle = guard.as_ref().ok_or_else(|| anyhow!("SSH handle lost"))?;
        let mut chan = handle
            .channel_open_session()
            .await
            .context("open session")?;
        tracing::debug!(command = cmd, "executing");
        chan.exec(true, cmd).await.context("exec request")?;

        let mut captured = CapturedOutput::default();
        while let Some(msg) = chan.wait().await {
            if handle_capture_message(&msg, &mut captured) {
                break;
            }
        }

        let _ = chan.close().await;
        tracing::debug!(
            exit_code = captured.exit_code(),
            stdout_len = captured.stdout.len(),
            stderr_len = captured.stderr.len(),
            "command finished"
        );
        Ok(captured)
    }
}
