// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fmt::Display,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::app::services::slurm::{DEFAULT_STATUS_COMMAND, DEFAULT_SUBMIT_COMMAND};
use crate::app::types::{PollSettings, RetryPolicy, RunSettings, SshConfig};

const APP_DIR_NAME: &str = "hpcrun";
const CONFIG_FILE_NAME: &str = "hpcrun.toml";
const CONFIG_ENV_VAR: &str = "HPCRUN_CONFIG_PATH";
const PASSWORD_ENV_VAR: &str = "HPCRUN_PASSWORD";
const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_KEEPALIVE_SECS: u64 = 60;
const DEFAULT_OUTPUT_DIR: &str = ".";
const DEFAULT_SBATCH_SCRIPT: &str = "job.slurm";
const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_SECS: u64 = 0;
const DEFAULT_MAX_QUERIES: u32 = 50;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
const DEFAULT_PENDING_BACKOFF_SECS: u64 = 30;
const DEFAULT_SETTLE_DELAY_SECS: u64 = 5;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    identity_path: Option<String>,
    password: Option<String>,
    known_hosts_path: Option<String>,
    keepalive_secs: Option<u64>,
    remote_dir: Option<String>,
    artifact_path: Option<String>,
    output_dir: Option<String>,
    sbatch_script: Option<String>,
    submit_command: Option<String>,
    status_command: Option<String>,
    upload_attempts: Option<u32>,
    submit_attempts: Option<u32>,
    fetch_attempts: Option<u32>,
    retry_delay_secs: Option<u64>,
    max_queries: Option<u32>,
    poll_interval_secs: Option<u64>,
    pending_backoff_secs: Option<u64>,
    settle_delay_secs: Option<u64>,
    verbose: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_path: Option<PathBuf>,
    pub password: Option<String>,
    pub known_hosts_path: Option<PathBuf>,
    pub keepalive_secs: u64,
    pub remote_dir: String,
    pub artifact_path: PathBuf,
    pub output_dir: PathBuf,
    pub sbatch_script: String,
    pub submit_command: String,
    pub status_command: String,
    pub upload_attempts: u32,
    pub submit_attempts: u32,
    pub fetch_attempts: u32,
    pub retry_delay_secs: u64,
    pub max_queries: u32,
    pub poll_interval_secs: u64,
    pub pending_backoff_secs: u64,
    pub settle_delay_secs: u64,
    pub verbose: bool,
}

impl Config {
    pub fn ssh_config(&self) -> SshConfig {
        SshConfig {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            identity_path: self
                .identity_path
                .as_ref()
                .map(|path| path.to_string_lossy().into_owned()),
            password: self.password.clone(),
            known_hosts_path: self.known_hosts_path.clone(),
            keepalive_secs: self.keepalive_secs,
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        let delay = Duration::from_secs(self.retry_delay_secs);
        RunSettings {
            artifact_path: self.artifact_path.clone(),
            remote_dir: self.remote_dir.clone(),
            output_dir: self.output_dir.clone(),
            sbatch_script: self.sbatch_script.clone(),
            submit_command: self.submit_command.clone(),
            status_command: self.status_command.clone(),
            upload_policy: RetryPolicy::new(self.upload_attempts, delay),
            submit_policy: RetryPolicy::new(self.submit_attempts, delay),
            fetch_policy: RetryPolicy::new(self.fetch_attempts, delay),
            poll: PollSettings {
                max_queries: self.max_queries,
                query_interval: Duration::from_secs(self.poll_interval_secs),
                pending_backoff: Duration::from_secs(self.pending_backoff_secs),
            },
            settle_delay: Duration::from_secs(self.settle_delay_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

/// One resolved key as it is logged at startup.
#[derive(Debug)]
pub struct ReportedValue {
    pub key: &'static str,
    pub value: String,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub values: Vec<ReportedValue>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub identity_path: Option<PathBuf>,
    pub known_hosts_path: Option<PathBuf>,
    pub keepalive_secs: Option<u64>,
    pub remote_dir: Option<String>,
    pub artifact_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub sbatch_script: Option<String>,
    pub submit_command: Option<String>,
    pub status_command: Option<String>,
    pub upload_attempts: Option<u32>,
    pub submit_attempts: Option<u32>,
    pub fetch_attempts: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub max_queries: Option<u32>,
    pub poll_interval_secs: Option<u64>,
    pub pending_backoff_secs: Option<u64>,
    pub settle_delay_secs: Option<u64>,
    pub verbose: Option<bool>,
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, file_required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file = match config_path.as_deref() {
        Some(path) => read_config_file(path, file_required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());
    let file_path = |raw: Option<String>| raw.map(|raw| resolve_path(&raw, base_dir));

    let mut values = Vec::new();

    let host = required("host", "--host", overrides.host, file.host)?;
    let port = layered(overrides.port, file.port, DEFAULT_SSH_PORT);
    if port.value == 0 {
        anyhow::bail!("port must be between 1 and 65535");
    }
    let username = required("username", "--username", overrides.username, file.username)?;
    let identity_path = optional(
        overrides.identity_path.map(expand_path),
        file_path(file.identity_path),
    );
    let password = match std::env::var(PASSWORD_ENV_VAR).ok().filter(|v| !v.is_empty()) {
        Some(value) => ConfigValue {
            value: Some(value),
            source: ConfigSource::Env,
        },
        None => optional(None, file.password),
    };
    let known_hosts_path = optional(
        overrides.known_hosts_path.map(expand_path),
        file_path(file.known_hosts_path),
    );
    let keepalive_secs = layered(
        overrides.keepalive_secs,
        file.keepalive_secs,
        DEFAULT_KEEPALIVE_SECS,
    );
    let remote_dir = required(
        "remote_dir",
        "--remote-dir",
        overrides.remote_dir,
        file.remote_dir,
    )?;
    let artifact_path = required(
        "artifact_path",
        "--artifact",
        overrides.artifact_path.map(expand_path),
        file_path(file.artifact_path),
    )?;
    let output_dir = layered(
        overrides.output_dir.map(expand_path),
        file_path(file.output_dir),
        PathBuf::from(DEFAULT_OUTPUT_DIR),
    );
    let sbatch_script = layered(
        overrides.sbatch_script,
        file.sbatch_script,
        DEFAULT_SBATCH_SCRIPT.to_string(),
    );
    let submit_command = layered(
        overrides.submit_command,
        file.submit_command,
        DEFAULT_SUBMIT_COMMAND.to_string(),
    );
    let status_command = layered(
        overrides.status_command,
        file.status_command,
        DEFAULT_STATUS_COMMAND.to_string(),
    );
    let upload_attempts = layered(overrides.upload_attempts, file.upload_attempts, DEFAULT_ATTEMPTS);
    let submit_attempts = layered(overrides.submit_attempts, file.submit_attempts, DEFAULT_ATTEMPTS);
    let fetch_attempts = layered(overrides.fetch_attempts, file.fetch_attempts, DEFAULT_ATTEMPTS);
    for (key, attempts) in [
        ("upload_attempts", &upload_attempts),
        ("submit_attempts", &submit_attempts),
        ("fetch_attempts", &fetch_attempts),
    ] {
        if attempts.value == 0 {
            anyhow::bail!("{key} must be at least 1");
        }
    }
    let retry_delay_secs = layered(
        overrides.retry_delay_secs,
        file.retry_delay_secs,
        DEFAULT_RETRY_DELAY_SECS,
    );
    let max_queries = layered(overrides.max_queries, file.max_queries, DEFAULT_MAX_QUERIES);
    if max_queries.value == 0 {
        anyhow::bail!("max_queries must be at least 1");
    }
    let poll_interval_secs = layered(
        overrides.poll_interval_secs,
        file.poll_interval_secs,
        DEFAULT_POLL_INTERVAL_SECS,
    );
    let pending_backoff_secs = layered(
        overrides.pending_backoff_secs,
        file.pending_backoff_secs,
        DEFAULT_PENDING_BACKOFF_SECS,
    );
    let settle_delay_secs = layered(
        overrides.settle_delay_secs,
        file.settle_delay_secs,
        DEFAULT_SETTLE_DELAY_SECS,
    );
    let verbose = layered(overrides.verbose, file.verbose, false);

    record(&mut values, "host", &host);
    record(&mut values, "port", &port);
    record(&mut values, "username", &username);
    record_path(&mut values, "identity_path", &identity_path);
    values.push(ReportedValue {
        key: "password",
        value: (if password.value.is_some() { "<set>" } else { "<unset>" }).to_string(),
        source: password.source,
    });
    record_path(&mut values, "known_hosts_path", &known_hosts_path);
    record(&mut values, "keepalive_secs", &keepalive_secs);
    record(&mut values, "remote_dir", &remote_dir);
    values.push(ReportedValue {
        key: "artifact_path",
        value: artifact_path.value.display().to_string(),
        source: artifact_path.source,
    });
    values.push(ReportedValue {
        key: "output_dir",
        value: output_dir.value.display().to_string(),
        source: output_dir.source,
    });
    record(&mut values, "sbatch_script", &sbatch_script);
    record(&mut values, "submit_command", &submit_command);
    record(&mut values, "status_command", &status_command);
    record(&mut values, "upload_attempts", &upload_attempts);
    record(&mut values, "submit_attempts", &submit_attempts);
    record(&mut values, "fetch_attempts", &fetch_attempts);
    record(&mut values, "retry_delay_secs", &retry_delay_secs);
    record(&mut values, "max_queries", &max_queries);
    record(&mut values, "poll_interval_secs", &poll_interval_secs);
    record(&mut values, "pending_backoff_secs", &pending_backoff_secs);
    record(&mut values, "settle_delay_secs", &settle_delay_secs);
    record(&mut values, "verbose", &verbose);

    let config = Config {
        host: host.value,
        port: port.value,
        username: username.value,
        identity_path: identity_path.value,
        password: password.value,
        known_hosts_path: known_hosts_path.value,
        keepalive_secs: keepalive_secs.value,
        remote_dir: remote_dir.value,
        artifact_path: artifact_path.value,
        output_dir: output_dir.value,
        sbatch_script: sbatch_script.value,
        submit_command: submit_command.value,
        status_command: status_command.value,
        upload_attempts: upload_attempts.value,
        submit_attempts: submit_attempts.value,
        fetch_attempts: fetch_attempts.value,
        retry_delay_secs: retry_delay_secs.value,
        max_queries: max_queries.value,
        poll_interval_secs: poll_interval_secs.value,
        pending_backoff_secs: pending_backoff_secs.value,
        settle_delay_secs: settle_delay_secs.value,
        verbose: verbose.value,
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        values,
    };

    Ok(LoadResult { config, report })
}

fn layered<T>(override_value: Option<T>, file_value: Option<T>, default: T) -> ConfigValue<T> {
    match override_value {
        Some(value) => ConfigValue {
            value,
            source: ConfigSource::Override,
        },
        None => match file_value {
            Some(value) => ConfigValue {
                value,
                source: ConfigSource::ConfigFile,
            },
            None => ConfigValue {
                value: default,
                source: ConfigSource::Default,
            },
        },
    }
}

fn optional<T>(override_value: Option<T>, file_value: Option<T>) -> ConfigValue<Option<T>> {
    layered(override_value.map(Some), file_value.map(Some), None)
}

fn required<T>(
    key: &str,
    flag: &str,
    override_value: Option<T>,
    file_value: Option<T>,
) -> Result<ConfigValue<T>> {
    let resolved = optional(override_value, file_value);
    match resolved.value {
        Some(value) => Ok(ConfigValue {
            value,
            source: resolved.source,
        }),
        None => anyhow::bail!("{key} is required; specify {flag} or set {key} in the config file"),
    }
}

fn record<T: Display>(values: &mut Vec<ReportedValue>, key: &'static str, entry: &ConfigValue<T>) {
    values.push(ReportedValue {
        key,
        value: entry.value.to_string(),
        source: entry.source,
    });
}

fn record_path(values: &mut Vec<ReportedValue>, key: &'static str, entry: &ConfigValue<Option<PathBuf>>) {
    let value = match &entry.value {
        Some(path) => path.display().to_string(),
        None => "(none)".to_string(),
    };
    values.push(ReportedValue {
        key,
        value,
        source: entry.source,
    });
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}
