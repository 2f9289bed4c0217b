// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::errors::FatalError;
use crate::app::ports::ExecCapture;
use crate::app::types::{JobId, PollOutcome};

pub const DEFAULT_SUBMIT_COMMAND: &str = "sbatch --chdir {remote_dir} {sbatch_script}";
pub const DEFAULT_STATUS_COMMAND: &str = "squeue -h -j {job_id}";

/// State code squeue prints for queued jobs.
pub const PENDING_STATE: &str = "PD";

/// Zero-based index of the `ST` column in default squeue output
/// (JOBID PARTITION NAME USER ST TIME NODES NODELIST).
const STATE_FIELD: usize = 4;

/// Result of one status query after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusQuery {
    Outcome(PollOutcome),
    /// The query itself failed; says nothing about the job.
    Unavailable(String),
}

/// Extract the job id from sbatch output.
///
/// Accepts both `Submitted batch job 11` and `--parsable` output
/// (`11` or `11;cluster`).
pub fn parse_job_id(output: &str) -> Option<JobId> {
    let token = output.split_whitespace().last()?;
    let token = token.split(';').next().unwrap_or(token);
    token.parse().ok()
}

/// Interpret the output of a status query for `job_id`.
///
/// A job that squeue no longer lists has finished. This covers an empty
/// listing, a grep-style pipeline exiting with a positive code and no
/// output, and Slurm's `Invalid job id specified` once the job has been
/// purged. A negative code means the command never reported an exit
/// status (dropped channel, signal) and says nothing about the job.
pub fn classify_status(job_id: JobId, capture: &ExecCapture) -> Result<StatusQuery, FatalError> {
    let stdout = capture.stdout_text();
    if capture.exit_code == 0 {
        let Some(line) = find_job_line(job_id, &stdout) else {
            return Ok(StatusQuery::Outcome(PollOutcome::Finished));
        };
        let state = parse_state_code(line)?;
        if state == PENDING_STATE {
            return Ok(StatusQuery::Outcome(PollOutcome::Pending));
        }
        return Ok(StatusQuery::Outcome(PollOutcome::Running(state.to_string())));
    }

    let stderr = capture.stderr_text();
    let stderr = stderr.trim();
    if capture.exit_code > 0 && stdout.trim().is_empty() && stderr.is_empty() {
        return Ok(StatusQuery::Outcome(PollOutcome::Finished));
    }
    if is_invalid_job_id(stderr) {
        return Ok(StatusQuery::Outcome(PollOutcome::Finished));
    }
    let detail = match (stderr.is_empty(), stdout.trim()) {
        (false, _) => stderr.to_string(),
        (true, "") => "no output".to_string(),
        (true, out) => out.to_string(),
    };
    Ok(StatusQuery::Unavailable(format!(
        "status query exited with {}: {detail}",
        capture.exit_code
    )))
}

fn find_job_line(job_id: JobId, output: &str) -> Option<&str> {
    let id = job_id.to_string();
    let array_prefix = format!("{id}_");
    output.lines().map(str::trim).find(|line| {
        line.split_whitespace()
            .next()
            .is_some_and(|first| first == id || first.starts_with(&array_prefix))
    })
}

fn parse_state_code(line: &str) -> Result<&str, FatalError> {
    line.split_whitespace()
        .nth(STATE_FIELD)
        .ok_or_else(|| FatalError::MalformedStatusLine(line.to_string()))
}

fn is_invalid_job_id(text: &str) -> bool {
    text.to_ascii_lowercase().contains("invalid job id")
}

/// Resolve the batch script relative to the remote working directory.
pub fn resolve_remote_script(remote_dir: &str, script: &str) -> String {
    if script.starts_with('/') || script.starts_with('~') {
        return script.to_string();
    }
    join_remote(remote_dir, script)
}

/// Remote path of one of the job's `{job_id}.{ext}` output files.
pub fn remote_output_path(remote_dir: &str, job_id: JobId, ext: &str) -> String {
    join_remote(remote_dir, &format!("{job_id}.{ext}"))
}

fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() {
        format!("/{name}")
    } else {
        format!("{trimmed}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::squeue_line;

    fn capture(exit_code: i32, stdout: &str, stderr: &str) -> ExecCapture {
        ExecCapture {
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
            exit_code,
        }
    }

    fn job(raw: u64) -> JobId {
        JobId::new(raw).unwrap()
    }

    #[test]
    fn parse_job_id_takes_trailing_token() {
        assert_eq!(parse_job_id("Submitted batch job 482913\n"), Some(job(482913)));
        assert_eq!(parse_job_id("482913;cluster-a\n"), Some(job(482913)));
        assert_eq!(parse_job_id("  77  "), Some(job(77)));
    }

    #[test]
    fn parse_job_id_rejects_malformed_output() {
        assert_eq!(parse_job_id(""), None);
        assert_eq!(parse_job_id("   \n"), None);
        assert_eq!(parse_job_id("Submitted batch job"), None);
        assert_eq!(parse_job_id("Submitted batch job 0"), None);
        assert_eq!(parse_job_id("Submitted batch job 12a"), None);
    }

    #[test]
    fn pending_state_maps_to_pending() {
        let out = squeue_line(100, "PD");
        let status = classify_status(job(100), &capture(0, &out, "")).unwrap();
        assert_eq!(status, StatusQuery::Outcome(PollOutcome::Pending));
    }

    #[test]
    fn other_states_map_to_running_with_code() {
        for code in ["R", "CG", "CF", "S"] {
            let out = squeue_line(100, code);
            let status = classify_status(job(100), &capture(0, &out, "")).unwrap();
            assert_eq!(
                status,
                StatusQuery::Outcome(PollOutcome::Running(code.to_string()))
            );
        }
    }

    #[test]
    fn absence_signals_map_to_finished() {
        let finished = StatusQuery::Outcome(PollOutcome::Finished);
        // empty listing
        assert_eq!(classify_status(job(5), &capture(0, "", "")).unwrap(), finished);
        // grep found nothing
        assert_eq!(classify_status(job(5), &capture(1, "", "")).unwrap(), finished);
        // purged job
        let stderr = "slurm_load_jobs error: Invalid job id specified\n";
        assert_eq!(
            classify_status(job(5), &capture(1, "", stderr)).unwrap(),
            finished
        );
        // only other jobs listed
        let out = squeue_line(51, "R");
        assert_eq!(classify_status(job(5), &capture(0, &out, "")).unwrap(), finished);
    }

    #[test]
    fn array_job_lines_are_matched() {
        let out = squeue_line(100, "R").replacen("100", "100_3", 1);
        let status = classify_status(job(100), &capture(0, &out, "")).unwrap();
        assert_eq!(
            status,
            StatusQuery::Outcome(PollOutcome::Running("R".to_string()))
        );
    }

    #[test]
    fn query_failures_are_not_treated_as_finished() {
        let stderr = "slurm_load_jobs error: Socket timed out on send/recv operation";
        let status = classify_status(job(5), &capture(1, "", stderr)).unwrap();
        let StatusQuery::Unavailable(detail) = status else {
            panic!("expected unavailable status");
        };
        assert!(detail.contains("Socket timed out"));
    }

    #[test]
    fn missing_exit_status_is_not_treated_as_finished() {
        let status = classify_status(job(5), &capture(-1, "", "")).unwrap();
        assert_eq!(
            status,
            StatusQuery::Unavailable("status query exited with -1: no output".to_string())
        );
    }

    #[test]
    fn short_status_line_is_a_defect() {
        let err = classify_status(job(5), &capture(0, "5 gpu name\n", "")).unwrap_err();
        assert!(matches!(err, FatalError::MalformedStatusLine(line) if line == "5 gpu name"));
    }

    #[test]
    fn remote_paths_are_joined() {
        assert_eq!(
            resolve_remote_script("/lustre/home/u/cuda-test/", "cuda.slurm"),
            "/lustre/home/u/cuda-test/cuda.slurm"
        );
        assert_eq!(resolve_remote_script("/x", "/abs/job.slurm"), "/abs/job.slurm");
        assert_eq!(resolve_remote_script("/x", "~/job.slurm"), "~/job.slurm");
        assert_eq!(
            remote_output_path("cuda-test", job(42), "err"),
            "cuda-test/42.err"
        );
        assert_eq!(remote_output_path("/", job(42), "out"), "/42.out");
        assert_eq!(remote_output_path("", job(42), "out"), "42.out");
    }
}
