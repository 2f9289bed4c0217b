// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::errors::FatalError;
use crate::app::ports::RemoteExecPort;
use crate::app::services::PhaseContext;
use crate::app::services::retry::Phase;
use crate::app::services::shell::render_template;
use crate::app::services::slurm::{self, StatusQuery};
use crate::app::types::{JobId, PollOutcome, PollSettings};

/// Queries the scheduler until a submitted job is no longer listed.
pub struct JobPoller<'a> {
    exec: &'a dyn RemoteExecPort,
    ctx: PhaseContext<'a>,
    status_command: &'a str,
}

impl<'a> JobPoller<'a> {
    pub fn new(exec: &'a dyn RemoteExecPort, ctx: PhaseContext<'a>, status_command: &'a str) -> Self {
        Self {
            exec,
            ctx,
            status_command,
        }
    }

    /// Pending jobs back off for `pending_backoff`; running jobs and failed
    /// queries wait `query_interval`. No wait follows the final query.
    pub async fn poll_until_done(
        &self,
        job_id: JobId,
        settings: PollSettings,
    ) -> Result<(), FatalError> {
        let command = render_template(self.status_command, &[("job_id", &job_id.to_string())]);
        let max_queries = settings.max_queries.max(1);
        for query in 1..=max_queries {
            if self.ctx.cancel.is_cancelled() {
                return Err(FatalError::Cancelled);
            }
            let status = match self.exec.exec_capture(&command).await {
                Ok(capture) => slurm::classify_status(job_id, &capture)?,
                Err(err) if !err.is_retryable() => return Err(FatalError::Session(err)),
                Err(err) => StatusQuery::Unavailable(err.to_string()),
            };
            let wait = match status {
                StatusQuery::Outcome(PollOutcome::Finished) => {
                    tracing::info!(%job_id, query, "job no longer listed");
                    self.ctx.report.line(&format!("job {job_id} finished"));
                    return Ok(());
                }
                StatusQuery::Outcome(PollOutcome::Pending) => {
                    tracing::debug!(%job_id, query, "job pending");
                    self.ctx
                        .report
                        .line("job is pending; may need to wait for a long time");
                    settings.pending_backoff
                }
                StatusQuery::Outcome(PollOutcome::Running(code)) => {
                    tracing::debug!(%job_id, query, state = %code, "job active");
                    self.ctx.report.line(&format!("job is {code}"));
                    settings.query_interval
                }
                StatusQuery::Unavailable(detail) => {
                    tracing::warn!(
                        phase = %Phase::StatusQuery,
                        %job_id,
                        query,
                        max_queries,
                        "status query failed: {detail}"
                    );
                    self.ctx
                        .report
                        .line(&format!("{} round {query}: {detail}", Phase::StatusQuery));
                    settings.query_interval
                }
            };
            if query < max_queries {
                self.ctx.pause(wait).await?;
            }
        }
        tracing::warn!(%job_id, max_queries, "job still listed after all status queries");
        Err(FatalError::JobDidNotComplete {
            job_id,
            queries: max_queries,
        })
    }
}
