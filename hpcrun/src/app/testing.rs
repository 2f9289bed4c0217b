// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! In-memory port implementations shared by the service and use case tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ClockPort, ExecCapture, FileTransferPort, RemoteExecPort, ReportPort};
use crate::app::services::PhaseContext;
use crate::app::types::CancelSignal;

pub fn ok(stdout: &str) -> AppResult<ExecCapture> {
    Ok(ExecCapture {
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
        exit_code: 0,
    })
}

pub fn exit(code: i32, stderr: &str) -> AppResult<ExecCapture> {
    Ok(ExecCapture {
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
        exit_code: code,
    })
}

pub fn transport(message: &str) -> AppError {
    AppError::with_message(AppErrorKind::Connection, codes::CONNECTION_FAILURE, message)
}

pub fn rejected() -> AppError {
    AppError::with_message(
        AppErrorKind::Authentication,
        codes::AUTHENTICATION_FAILURE,
        "server rejected the provided credentials",
    )
}

pub fn missing(path: &str) -> AppError {
    AppError::with_message(
        AppErrorKind::NotFound,
        codes::NOT_FOUND,
        format!("remote path missing: {path}"),
    )
}

/// `squeue -h` style line for `job_id` in state `state`.
pub fn squeue_line(job_id: u64, state: &str) -> String {
    format!("  {job_id}       gpu cuda.slu   stu658 {state}       0:12      1 gpu03\n")
}

/// Clock, report and cancel signal for driving a single phase.
pub struct Harness {
    pub clock: RecordingClock,
    pub report: CollectingReport,
    pub cancel: CancelSignal,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            clock: RecordingClock::default(),
            report: CollectingReport::default(),
            cancel: CancelSignal::never(),
        }
    }

    pub fn ctx(&self) -> PhaseContext<'_> {
        PhaseContext {
            clock: &self.clock,
            report: &self.report,
            cancel: &self.cancel,
        }
    }
}

#[derive(Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("sleeps lock").clone()
    }
}

#[async_trait]
impl ClockPort for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().expect("sleeps lock").push(duration);
    }
}

/// Clock whose non-zero sleeps never finish; only cancellation ends them.
#[derive(Default)]
pub struct StalledClock {
    sleeps: Mutex<Vec<Duration>>,
    stalled: Notify,
}

impl StalledClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("sleeps lock").clone()
    }

    /// Resolves once some caller is blocked in `sleep`.
    pub async fn wait_until_stalled(&self) {
        self.stalled.notified().await;
    }
}

#[async_trait]
impl ClockPort for StalledClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().expect("sleeps lock").push(duration);
        if duration.is_zero() {
            return;
        }
        self.stalled.notify_one();
        std::future::pending::<()>().await;
    }
}

#[derive(Default)]
pub struct CollectingReport {
    lines: Mutex<Vec<String>>,
}

impl CollectingReport {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("lines lock").clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl ReportPort for CollectingReport {
    fn line(&self, text: &str) {
        self.lines.lock().expect("lines lock").push(text.to_string());
    }
}

/// Remote session double driven by scripted responses.
///
/// Commands are answered in order from `exec_script`; an unexpected command
/// panics. Uploads and downloads consume their failure scripts first, then
/// succeed (downloads copy from `remote_files` or report the path missing).
#[derive(Default)]
pub struct ScriptedRemote {
    exec_script: Mutex<VecDeque<AppResult<ExecCapture>>>,
    commands: Mutex<Vec<String>>,
    upload_failures: Mutex<VecDeque<AppError>>,
    uploads: Mutex<Vec<(PathBuf, String)>>,
    download_failures: Mutex<VecDeque<AppError>>,
    downloads: Mutex<Vec<String>>,
    remote_files: Mutex<HashMap<String, Vec<u8>>>,
    close_calls: Mutex<usize>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exec(self, responses: Vec<AppResult<ExecCapture>>) -> Self {
        self.exec_script.lock().expect("exec lock").extend(responses);
        self
    }

    pub fn with_upload_failures(self, failures: Vec<AppError>) -> Self {
        self.upload_failures
            .lock()
            .expect("upload lock")
            .extend(failures);
        self
    }

    pub fn with_download_failures(self, failures: Vec<AppError>) -> Self {
        self.download_failures
            .lock()
            .expect("download lock")
            .extend(failures);
        self
    }

    pub fn with_remote_file(self, path: &str, contents: &str) -> Self {
        self.remote_files
            .lock()
            .expect("files lock")
            .insert(path.to_string(), contents.as_bytes().to_vec());
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("commands lock").clone()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.uploads.lock().expect("uploads lock").clone()
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().expect("downloads lock").clone()
    }

    pub fn close_calls(&self) -> usize {
        *self.close_calls.lock().expect("close lock")
    }
}

#[async_trait]
impl RemoteExecPort for ScriptedRemote {
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture> {
        self.commands
            .lock()
            .expect("commands lock")
            .push(command.to_string());
        let Some(response) = self.exec_script.lock().expect("exec lock").pop_front() else {
            panic!("unexpected command: {command}");
        };
        response
    }

    async fn close(&self) {
        *self.close_calls.lock().expect("close lock") += 1;
    }
}

#[async_trait]
impl FileTransferPort for ScriptedRemote {
    async fn upload_file(&self, local_path: &Path, remote_dir: &str) -> AppResult<()> {
        self.uploads
            .lock()
            .expect("uploads lock")
            .push((local_path.to_path_buf(), remote_dir.to_string()));
        match self.upload_failures.lock().expect("upload lock").pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> AppResult<()> {
        self.downloads
            .lock()
            .expect("downloads lock")
            .push(remote_path.to_string());
        if let Some(err) = self.download_failures.lock().expect("download lock").pop_front() {
            return Err(err);
        }
        let contents = self
            .remote_files
            .lock()
            .expect("files lock")
            .get(remote_path)
            .cloned();
        let Some(contents) = contents else {
            return Err(missing(remote_path));
        };
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent).expect("create local dir");
        }
        std::fs::write(local_path, contents).expect("write local copy");
        Ok(())
    }
}
