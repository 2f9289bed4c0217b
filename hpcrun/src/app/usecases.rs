// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use crate::app::errors::FatalError;
use crate::app::ports::{ClockPort, FileTransferPort, RemoteExecPort, ReportPort};
use crate::app::services::PhaseContext;
use crate::app::services::collect::ResultCollector;
use crate::app::services::poll::JobPoller;
use crate::app::services::shell::render_template;
use crate::app::services::slurm;
use crate::app::services::submit::JobSubmitter;
use crate::app::types::{CancelSignal, JobId, JobResult, RunSettings};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

/// A run that got through every phase. The job itself may still have failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub job_id: JobId,
    pub result: JobResult,
}

#[derive(Clone)]
pub struct UseCases {
    pub(crate) remote_exec: Arc<dyn RemoteExecPort>,
    pub(crate) file_transfer: Arc<dyn FileTransferPort>,
    pub(crate) clock: Arc<dyn ClockPort>,
    pub(crate) report: Arc<dyn ReportPort>,
}

impl UseCases {
    pub fn new(
        remote_exec: Arc<dyn RemoteExecPort>,
        file_transfer: Arc<dyn FileTransferPort>,
        clock: Arc<dyn ClockPort>,
        report: Arc<dyn ReportPort>,
    ) -> Self {
        Self {
            remote_exec,
            file_transfer,
            clock,
            report,
        }
    }

    /// Upload, submit, wait for and collect one job. The remote session is
    /// closed before returning, whatever the outcome.
    pub async fn run_job(
        &self,
        settings: &RunSettings,
        cancel: &CancelSignal,
    ) -> Result<RunOutcome, FatalError> {
        let outcome = self.run_phases(settings, cancel).await;
        self.remote_exec.close().await;
        match &outcome {
            Ok(run) => tracing::info!(
                job_id = run.job_id.get(),
                succeeded = run.result.exit_succeeded,
                degraded = run.result.degraded,
                "run complete"
            ),
            Err(FatalError::Session(err)) => tracing::error!(
                code = err.code(),
                kind = ?err.kind(),
                "run aborted: {err}"
            ),
            Err(err) => tracing::error!("run aborted: {err}"),
        }
        outcome
    }

    async fn run_phases(
        &self,
        settings: &RunSettings,
        cancel: &CancelSignal,
    ) -> Result<RunOutcome, FatalError> {
        let ctx = PhaseContext {
            clock: self.clock.as_ref(),
            report: self.report.as_ref(),
            cancel,
        };
        let submit_command = render_submit_command(settings);
        tracing::debug!(command = %submit_command, "rendered submit command");

        let job_id = JobSubmitter::new(
            self.remote_exec.as_ref(),
            self.file_transfer.as_ref(),
            ctx,
            settings.upload_policy,
            settings.submit_policy,
        )
        .submit(&settings.artifact_path, &settings.remote_dir, &submit_command)
        .await?;

        // squeue may not list a job right after sbatch returns
        ctx.pause(settings.settle_delay).await?;

        JobPoller::new(self.remote_exec.as_ref(), ctx, &settings.status_command)
            .poll_until_done(job_id, settings.poll)
            .await?;

        let result = ResultCollector::new(self.file_transfer.as_ref(), ctx, &settings.output_dir)
            .collect(job_id, &settings.remote_dir, settings.fetch_policy)
            .await?;
        Ok(RunOutcome { job_id, result })
    }

    /// Print the final verdict and return the process exit code.
    pub fn render_verdict(&self, outcome: &Result<RunOutcome, FatalError>) -> i32 {
        match outcome {
            Ok(run) if run.result.exit_succeeded => {
                self.report.line("job succeed! output is as follows");
                self.report.line(trim_trailing_newlines(&run.result.stdout_text));
            }
            Ok(run) => {
                self.report.line("job failed! error message is as follows");
                self.report.line(trim_trailing_newlines(&run.result.stderr_text));
            }
            Err(err) => {
                self.report.line(err.summary());
                self.report.line(&err.to_string());
            }
        }
        exit_code(outcome)
    }
}

pub fn exit_code(outcome: &Result<RunOutcome, FatalError>) -> i32 {
    match outcome {
        Ok(run) if run.result.exit_succeeded => EXIT_SUCCESS,
        _ => EXIT_FAILURE,
    }
}

fn render_submit_command(settings: &RunSettings) -> String {
    let artifact = settings
        .artifact_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| settings.artifact_path.display().to_string());
    let script = slurm::resolve_remote_script(&settings.remote_dir, &settings.sbatch_script);
    render_template(
        &settings.submit_command,
        &[
            ("remote_dir", settings.remote_dir.as_str()),
            ("artifact", artifact.as_str()),
            ("sbatch_script", script.as_str()),
        ],
    )
}

fn trim_trailing_newlines(text: &str) -> &str {
    text.trim_end_matches(['\r', '\n'])
}
