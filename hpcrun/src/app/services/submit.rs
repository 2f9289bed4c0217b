// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use crate::app::errors::FatalError;
use crate::app::ports::{ExecCapture, FileTransferPort, RemoteExecPort};
use crate::app::services::PhaseContext;
use crate::app::services::retry::{AttemptError, Phase, RetryError, run_with_retry};
use crate::app::services::slurm;
use crate::app::types::{JobId, RetryPolicy};

/// Uploads the job artifact and submits the batch script.
pub struct JobSubmitter<'a> {
    exec: &'a dyn RemoteExecPort,
    files: &'a dyn FileTransferPort,
    ctx: PhaseContext<'a>,
    upload_policy: RetryPolicy,
    submit_policy: RetryPolicy,
}

impl<'a> JobSubmitter<'a> {
    pub fn new(
        exec: &'a dyn RemoteExecPort,
        files: &'a dyn FileTransferPort,
        ctx: PhaseContext<'a>,
        upload_policy: RetryPolicy,
        submit_policy: RetryPolicy,
    ) -> Self {
        Self {
            exec,
            files,
            ctx,
            upload_policy,
            submit_policy,
        }
    }

    /// Returns the id of exactly one submitted job. A failed submission
    /// attempt is replaced by the next one; output that cannot be parsed is
    /// never retried so a job that was accepted is not submitted twice.
    pub async fn submit(
        &self,
        artifact_path: &Path,
        remote_dir: &str,
        submit_command: &str,
    ) -> Result<JobId, FatalError> {
        self.upload(artifact_path, remote_dir).await?;
        tracing::info!(
            artifact = %artifact_path.display(),
            remote_dir,
            "artifact transferred"
        );

        let exec = self.exec;
        let job_id = run_with_retry(Phase::Submit, self.submit_policy, &self.ctx, |_| async move {
            let capture = match exec.exec_capture(submit_command).await {
                Ok(capture) => capture,
                Err(err) => return Err(AttemptError::from(err)),
            };
            if capture.exit_code != 0 {
                return Err(AttemptError::Retryable(submit_failure_detail(&capture)));
            }
            let stdout = capture.stdout_text();
            slurm::parse_job_id(&stdout).ok_or_else(|| {
                AttemptError::Fatal(FatalError::MalformedSubmitOutput(stdout.trim().to_string()))
            })
        })
        .await
        .map_err(|err| match err {
            RetryError::Exhausted {
                attempts,
                last_error,
            } => FatalError::SubmitFailed {
                attempts,
                last_error,
            },
            RetryError::Fatal(err) => err,
        })?;

        tracing::info!(%job_id, "job submitted");
        self.ctx.report.line(&format!("job {job_id} submitted"));
        Ok(job_id)
    }

    async fn upload(&self, artifact_path: &Path, remote_dir: &str) -> Result<(), FatalError> {
        let files = self.files;
        run_with_retry(Phase::Upload, self.upload_policy, &self.ctx, |_| async move {
            files
                .upload_file(artifact_path, remote_dir)
                .await
                .map_err(AttemptError::from)
        })
        .await
        .map_err(|err| match err {
            RetryError::Exhausted {
                attempts,
                last_error,
            } => FatalError::UploadFailed {
                attempts,
                last_error,
            },
            RetryError::Fatal(err) => err,
        })
    }
}

fn submit_failure_detail(capture: &ExecCapture) -> String {
    let err_message = capture.stderr_text();
    let out_message = capture.stdout_text();
    let detail = if !err_message.trim().is_empty() {
        err_message.trim().to_string()
    } else if !out_message.trim().is_empty() {
        out_message.trim().to_string()
    } else {
        "no error output from sbatch".to_string()
    };
    format!("sbatch exited with {}: {detail}", capture.exit_code)
}
