// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use tokio::sync::watch;

mod adapters;
mod app;
mod config;
mod logging;

use app::types::CancelSignal;
use app::usecases::UseCases;

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => {
            tracing::info!(
                path = %path.display(),
                source = source.as_str(),
                present = report.config_file_present,
                "config path"
            );
        }
        (Some(path), None) => {
            tracing::info!(
                path = %path.display(),
                present = report.config_file_present,
                "config path"
            );
        }
        (None, _) => {
            tracing::info!("config path: (none)");
        }
    }
    for entry in &report.values {
        tracing::info!(
            source = entry.source.as_str(),
            "config {}: {}",
            entry.key,
            entry.value
        );
    }
}

fn spawn_interrupt_listener(cancel_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("interrupt received, stopping after the current step");
                let _ = cancel_tx.send(true);
            }
            Err(err) => tracing::warn!("failed to listen for ctrl-c: {err}"),
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config_path, overrides) = adapters::cli::parse_opts().into_overrides();
    let config::LoadResult { config, report } =
        config::load_with_report(config_path, overrides)?;
    let log_guard = logging::init(config.verbose);
    log_config_report(&report);
    if !config.artifact_path.is_file() {
        anyhow::bail!("artifact not found at {}", config.artifact_path.display());
    }

    let ssh_adapter = Arc::new(adapters::ssh::SshAdapter::new(&config.ssh_config()));
    let clock = Arc::new(adapters::time::SystemClock::new());
    let reporter = Arc::new(adapters::terminal::ConsoleReporter::stdout());
    let usecases = UseCases::new(ssh_adapter.clone(), ssh_adapter, clock, reporter);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    spawn_interrupt_listener(cancel_tx);

    let settings = config.run_settings();
    let outcome = usecases
        .run_job(&settings, &CancelSignal::new(cancel_rx))
        .await;
    let code = usecases.render_verdict(&outcome);
    // process::exit skips destructors; flush the log file first
    drop(log_guard);
    std::process::exit(code);
}
