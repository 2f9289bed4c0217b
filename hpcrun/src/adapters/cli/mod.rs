// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{CommandFactory, FromArgMatches, Parser};

use crate::config::Overrides;

#[derive(Parser, Debug)]
#[command(
    name = "hpcrun",
    version,
    about = "Upload an artifact to a Slurm cluster, run its batch script and print the job output",
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < HPCRUN_CONFIG_PATH < command-line flags.\n\
If --config is omitted, hpcrun tries HPCRUN_CONFIG_PATH, then the default config file location; missing default config is OK.\n\
Paths in the config file are resolved relative to the config file directory; paths passed as flags are resolved relative to the current working directory.\n\
The SSH password may be supplied through HPCRUN_PASSWORD.\n\
\n\
Command templates accept {remote_dir}, {artifact}, {sbatch_script} (submit) and {job_id} (status).\n\
Exit status is 0 when the job ran and its error output is empty, 1 otherwise."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, hpcrun uses HPCRUN_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(long, value_name = "HOST", help = "Cluster login host. Overrides `host`.")]
    pub host: Option<String>,
    #[arg(long, value_name = "PORT", help = "SSH port. Overrides `port`.")]
    pub port: Option<u16>,
    #[arg(short, long, value_name = "USER", help = "SSH user name. Overrides `username`.")]
    pub username: Option<String>,
    #[arg(
        short,
        long = "identity",
        value_name = "PATH",
        help = "Private key used for public key auth. Overrides `identity_path`."
    )]
    pub identity_path: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        help = "known_hosts file used to verify the server key. Overrides `known_hosts_path`."
    )]
    pub known_hosts_path: Option<PathBuf>,
    #[arg(long, value_name = "SECS", help = "SSH keepalive interval, 0 disables. Overrides `keepalive_secs`.")]
    pub keepalive_secs: Option<u64>,
    #[arg(
        short,
        long,
        value_name = "DIR",
        help = "Remote working directory the artifact is uploaded to. Overrides `remote_dir`."
    )]
    pub remote_dir: Option<String>,
    #[arg(
        short,
        long = "artifact",
        value_name = "PATH",
        help = "Local file uploaded before submission. Overrides `artifact_path`."
    )]
    pub artifact_path: Option<PathBuf>,
    #[arg(
        short,
        long,
        value_name = "DIR",
        help = "Local directory receiving the job's .out and .err files. Overrides `output_dir`."
    )]
    pub output_dir: Option<PathBuf>,
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Batch script, relative to the remote directory unless absolute. Overrides `sbatch_script`."
    )]
    pub sbatch_script: Option<String>,
    #[arg(long, value_name = "TEMPLATE", help = "Submission command template. Overrides `submit_command`.")]
    pub submit_command: Option<String>,
    #[arg(long, value_name = "TEMPLATE", help = "Status query template. Overrides `status_command`.")]
    pub status_command: Option<String>,
    #[arg(long, value_name = "N", help = "Upload attempts. Overrides `upload_attempts`.")]
    pub upload_attempts: Option<u32>,
    #[arg(long, value_name = "N", help = "Submission attempts. Overrides `submit_attempts`.")]
    pub submit_attempts: Option<u32>,
    #[arg(long, value_name = "N", help = "Output retrieval attempts. Overrides `fetch_attempts`.")]
    pub fetch_attempts: Option<u32>,
    #[arg(long, value_name = "SECS", help = "Delay between failed attempts. Overrides `retry_delay_secs`.")]
    pub retry_delay_secs: Option<u64>,
    #[arg(long, value_name = "N", help = "Status queries before giving up. Overrides `max_queries`.")]
    pub max_queries: Option<u32>,
    #[arg(long, value_name = "SECS", help = "Wait between status queries. Overrides `poll_interval_secs`.")]
    pub poll_interval_secs: Option<u64>,
    #[arg(long, value_name = "SECS", help = "Wait after a pending status. Overrides `pending_backoff_secs`.")]
    pub pending_backoff_secs: Option<u64>,
    #[arg(long, value_name = "SECS", help = "Wait between submission and the first status query. Overrides `settle_delay_secs`.")]
    pub settle_delay_secs: Option<u64>,
    #[arg(
        short,
        long,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

impl ParsedOpts {
    /// Split into the config path and the per-key overrides.
    pub fn into_overrides(self) -> (Option<PathBuf>, Overrides) {
        let opts = self.opts;
        let overrides = Overrides {
            host: opts.host,
            port: opts.port,
            username: opts.username,
            identity_path: opts.identity_path,
            known_hosts_path: opts.known_hosts_path,
            keepalive_secs: opts.keepalive_secs,
            remote_dir: opts.remote_dir,
            artifact_path: opts.artifact_path,
            output_dir: opts.output_dir,
            sbatch_script: opts.sbatch_script,
            submit_command: opts.submit_command,
            status_command: opts.status_command,
            upload_attempts: opts.upload_attempts,
            submit_attempts: opts.submit_attempts,
            fetch_attempts: opts.fetch_attempts,
            retry_delay_secs: opts.retry_delay_secs,
            max_queries: opts.max_queries,
            poll_interval_secs: opts.poll_interval_secs,
            pending_backoff_secs: opts.pending_backoff_secs,
            settle_delay_secs: opts.settle_delay_secs,
            verbose: self.verbose_override,
        };
        (opts.config, overrides)
    }
}

pub fn cli_command() -> clap::Command {
    Opts::command()
}

pub fn parse_opts() -> ParsedOpts {
    parse_from_matches(cli_command().get_matches())
}

fn parse_from_matches(matches: clap::ArgMatches) -> ParsedOpts {
    // an absent -v must not override `verbose = true` from the config file
    let verbose_override = if matches.get_flag("verbose") {
        Some(true)
    } else {
        None
    };
    let opts = Opts::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    ParsedOpts {
        opts,
        verbose_override,
    }
}
