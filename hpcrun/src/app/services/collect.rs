// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::app::errors::FatalError;
use crate::app::ports::FileTransferPort;
use crate::app::services::PhaseContext;
use crate::app::services::retry::{AttemptError, Phase, RetryError, run_with_retry};
use crate::app::services::slurm;
use crate::app::types::{JobId, JobResult, RetryPolicy};

/// Fetches a finished job's `.err` / `.out` files and decides the verdict.
pub struct ResultCollector<'a> {
    files: &'a dyn FileTransferPort,
    ctx: PhaseContext<'a>,
    output_dir: &'a Path,
}

impl<'a> ResultCollector<'a> {
    pub fn new(files: &'a dyn FileTransferPort, ctx: PhaseContext<'a>, output_dir: &'a Path) -> Self {
        Self {
            files,
            ctx,
            output_dir,
        }
    }

    /// A non-empty `.err` file means the job failed.
    ///
    /// Running out of fetch attempts does not abort the run: the verdict is
    /// taken from the files that did arrive and the result is marked
    /// degraded. Only copies downloaded completely by this call count; a
    /// leftover local file is never read. Without a fresh `.err` copy there
    /// is no verdict. Files that arrived are not fetched again on retry.
    pub async fn collect(
        &self,
        job_id: JobId,
        remote_dir: &str,
        policy: RetryPolicy,
    ) -> Result<JobResult, FatalError> {
        let err_local = self.local_output_path(job_id, "err");
        let out_local = self.local_output_path(job_id, "out");
        let err_remote = slurm::remote_output_path(remote_dir, job_id, "err");
        let out_remote = slurm::remote_output_path(remote_dir, job_id, "out");

        let files = self.files;
        let err_fetched = AtomicBool::new(false);
        let out_fetched = AtomicBool::new(false);
        let transfers = [
            (err_remote.as_str(), err_local.as_path(), &err_fetched),
            (out_remote.as_str(), out_local.as_path(), &out_fetched),
        ];
        let transfers = &transfers;
        let fetched = run_with_retry(Phase::Fetch, policy, &self.ctx, |_| async move {
            for (remote, local, done) in transfers {
                if done.load(Ordering::Relaxed) {
                    continue;
                }
                files
                    .download_file(remote, local)
                    .await
                    .map_err(AttemptError::from)?;
                done.store(true, Ordering::Relaxed);
            }
            Ok::<(), AttemptError>(())
        })
        .await;

        let degraded = match fetched {
            Ok(()) => false,
            Err(RetryError::Fatal(err)) => return Err(err),
            Err(RetryError::Exhausted {
                attempts,
                last_error,
            }) => {
                tracing::warn!(
                    %job_id,
                    attempts,
                    "output retrieval exhausted, continuing with local copies: {last_error}"
                );
                self.ctx.report.line("failed to get job's output files");
                true
            }
        };

        if !err_fetched.load(Ordering::Relaxed) {
            return Err(FatalError::OutputUnavailable { job_id });
        }
        let Some(stderr_text) = read_local(&err_local).await? else {
            return Err(FatalError::OutputUnavailable { job_id });
        };
        if !stderr_text.is_empty() {
            return Ok(JobResult {
                exit_succeeded: false,
                stdout_text: String::new(),
                stderr_text,
                degraded,
            });
        }
        let stdout_text = if out_fetched.load(Ordering::Relaxed) {
            read_local(&out_local).await?.unwrap_or_default()
        } else {
            String::new()
        };
        Ok(JobResult {
            exit_succeeded: true,
            stdout_text,
            stderr_text: String::new(),
            degraded,
        })
    }

    fn local_output_path(&self, job_id: JobId, ext: &str) -> PathBuf {
        self.output_dir.join(format!("{job_id}.{ext}"))
    }
}

async fn read_local(path: &Path) -> Result<Option<String>, FatalError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(FatalError::LocalIo {
            path: path.to_path_buf(),
            source,
        }),
    }
}
