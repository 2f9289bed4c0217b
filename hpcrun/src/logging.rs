// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, Registry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOG_ENV_VAR: &str = "HPCRUN_LOG";
const LOG_FORMAT_ENV_VAR: &str = "HPCRUN_LOG_FORMAT";
const LOG_SPAN_EVENTS_ENV_VAR: &str = "HPCRUN_LOG_SPAN_EVENTS";
const LOG_FILE_ENV_VAR: &str = "HPCRUN_LOG_FILE";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Diagnostics go to stderr; stdout carries only progress and the job output.
///
/// When `HPCRUN_LOG_FILE` is set the returned guard owns the file writer's
/// worker. Drop it before exiting or the last lines never reach the file.
#[must_use = "dropping the guard stops file logging"]
pub fn init(verbose: bool) -> Option<WorkerGuard> {
    let filter = build_filter(verbose);
    let span_events = parse_span_events(env::var(LOG_SPAN_EVENTS_ENV_VAR).ok().as_deref());
    let format = parse_format(env::var(LOG_FORMAT_ENV_VAR).ok().as_deref());
    let registry = Registry::default()
        .with(filter)
        .with(tracing_error::ErrorLayer::default());
    let file_sink = build_file_writer();

    match format {
        LogFormat::Json => {
            let stderr_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(span_events.clone())
                .with_writer(std::io::stderr);
            let Some((writer, guard)) = file_sink else {
                registry.with(stderr_layer).init();
                return None;
            };
            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(span_events)
                .with_writer(writer);
            registry.with(stderr_layer).with(file_layer).init();
            Some(guard)
        }
        LogFormat::Pretty => {
            let stderr_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(span_events.clone())
                .with_writer(std::io::stderr);
            let Some((writer, guard)) = file_sink else {
                registry.with(stderr_layer).init();
                return None;
            };
            let file_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(span_events)
                .with_writer(writer);
            registry.with(stderr_layer).with(file_layer).init();
            Some(guard)
        }
        LogFormat::Compact => {
            let stderr_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(span_events.clone())
                .with_writer(std::io::stderr);
            let Some((writer, guard)) = file_sink else {
                registry.with(stderr_layer).init();
                return None;
            };
            let file_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(span_events)
                .with_writer(writer);
            registry.with(stderr_layer).with(file_layer).init();
            Some(guard)
        }
    }
}

fn build_filter(verbose: bool) -> EnvFilter {
    match env::var(LOG_ENV_VAR) {
        Ok(value) => EnvFilter::new(value),
        Err(_) => EnvFilter::new(default_directive(verbose)),
    }
}

// Quiet by default: the user-facing lines already cover progress.
fn default_directive(verbose: bool) -> &'static str {
    if verbose { "hpcrun=debug,info" } else { "warn" }
}

fn normalized(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_ascii_lowercase())
}

fn parse_format(raw: Option<&str>) -> LogFormat {
    match normalized(raw).as_deref() {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    }
}

fn parse_span_events(raw: Option<&str>) -> FmtSpan {
    match normalized(raw).as_deref() {
        Some("new") => FmtSpan::NEW,
        Some("enter") => FmtSpan::ENTER,
        Some("exit") => FmtSpan::EXIT,
        Some("close") => FmtSpan::CLOSE,
        _ => FmtSpan::NONE,
    }
}

fn build_file_writer() -> Option<(NonBlocking, WorkerGuard)> {
    let file_path = env::var(LOG_FILE_ENV_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;
    file_writer(Path::new(&file_path))
}

fn file_writer(path: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    let file_name = path.file_name()?.to_string_lossy().to_string();
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(dir, file_name);
    Some(tracing_appender::non_blocking(appender))
}
