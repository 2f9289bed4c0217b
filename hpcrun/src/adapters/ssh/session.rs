// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::anyhow;
use russh::client::Config;
use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::app::types::SshConfig;

mod auth;
mod exec;
mod sftp;

/// russh client handler that checks the server key against known_hosts.
#[derive(Clone, Debug)]
struct ClientHandler {
    host: String,
    addr: SocketAddr,
    known_hosts_path: Option<PathBuf>,
}

impl ClientHandler {
    fn new(host: String, addr: SocketAddr, known_hosts_path: Option<PathBuf>) -> Self {
        Self {
            host,
            addr,
            known_hosts_path,
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        verify_server_key(
            &self.host,
            self.addr,
            server_public_key,
            self.known_hosts_path.as_deref(),
        )
    }
}

/// Parameters for establishing the SSH connection.
#[derive(Clone, PartialEq, Eq)]
pub struct SshParams {
    /// Hostname or IP, also used for the known_hosts lookup.
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_path: Option<String>,
    /// Used for password auth and to answer keyboard-interactive prompts.
    pub password: Option<String>,
    pub known_hosts_path: Option<PathBuf>,
    pub keepalive_secs: u64,
}

impl fmt::Debug for SshParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("identity_path", &self.identity_path)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("known_hosts_path", &self.known_hosts_path)
            .field("keepalive_secs", &self.keepalive_secs)
            .finish()
    }
}

impl From<&SshConfig> for SshParams {
    fn from(config: &SshConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            identity_path: config.identity_path.clone(),
            password: config.password.clone(),
            known_hosts_path: config.known_hosts_path.clone(),
            keepalive_secs: config.keepalive_secs,
        }
    }
}

fn check_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, russh::keys::Error> {
    match known_hosts_path {
        Some(path) => russh::keys::check_known_hosts_path(host, port, key, path),
        None => russh::keys::check_known_hosts(host, port, key),
    }
}

fn learn_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<(), russh::keys::Error> {
    match known_hosts_path {
        Some(path) => learn_known_hosts_path(host, port, key, path),
        None => learn_known_hosts(host, port, key),
    }
}

/// Accept a key listed under the host name or its address; learn unknown
/// keys. A mismatching key is an error.
fn verify_server_key(
    host: &str,
    addr: SocketAddr,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, anyhow::Error> {
    let port = addr.port();
    let ip_host = addr.ip().to_string();
    let mut candidates = vec![host.to_string()];
    if ip_host != host {
        candidates.push(ip_host);
    }
    for candidate in &candidates {
        match check_known_hosts_for(candidate, port, key, known_hosts_path) {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(host, port, "server key validation failed: {err}");
                return Err(anyhow!(
                    "server key validation failed for {host}:{port}: {err}"
                ));
            }
        }
    }

    tracing::info!(
        host,
        port,
        tried = %candidates.join(", "),
        "server key not present in known_hosts; learning"
    );
    learn_known_hosts_for(host, port, key, known_hosts_path).map_err(|err| {
        tracing::warn!(host, port, "failed to learn server key: {err}");
        anyhow!("failed to learn server key for {host}:{port}: {err}")
    })?;
    Ok(true)
}

/// A missing or closed handle has to be (re)established before use.
fn needs_connect(handle: Option<&russh::client::Handle<ClientHandler>>) -> bool {
    handle.is_none_or(|h| h.is_closed())
}

/// Owns the single SSH connection used for a run.
pub struct SessionManager {
    params: SshParams,
    config: Arc<Config>,
    // commands and transfers are serialized on this handle
    handle: Arc<Mutex<Option<russh::client::Handle<ClientHandler>>>>,
    keepalive_task_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl SessionManager {
    pub fn new(params: SshParams) -> Self {
        let keepalive = (params.keepalive_secs > 0).then(|| Duration::from_secs(params.keepalive_secs));
        let cfg = Config {
            // jobs can stay pending for a long time between status queries
            inactivity_timeout: None,
            keepalive_interval: keepalive,
            channel_buffer_size: 64,
            window_size: 1024 * 1024,
            ..Default::default()
        };
        Self {
            params,
            config: Arc::new(cfg),
            handle: Arc::new(Mutex::new(None)),
            keepalive_task_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn params(&self) -> &SshParams {
        &self.params
    }

    pub async fn shutdown(&self) {
        if let Some(task) = self.keepalive_task_handle.lock().await.take() {
            task.abort();
        }
        let mut handle_field = self.handle.lock().await;
        if let Some(handle) = handle_field.take() {
            if !handle.is_closed() {
                if let Err(err) = handle
                    .disconnect(russh::Disconnect::ByApplication, "", "en")
                    .await
                {
                    tracing::debug!("error while disconnecting: {err}");
                }
            }
            tracing::info!(
                host = %self.params.host,
                user = %self.params.username,
                "ssh session closed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SshParams {
        SshParams {
            host: "hpc.example.edu".into(),
            port: 22,
            username: "stu658".into(),
            identity_path: None,
            password: Some("hunter2".into()),
            known_hosts_path: None,
            keepalive_secs: 60,
        }
    }

    #[test]
    fn debug_output_redacts_password() {
        let rendered = format!("{:?}", params());
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn params_from_config_copy_every_field() {
        let config = SshConfig {
            host: "login".into(),
            port: 2222,
            username: "u".into(),
            identity_path: Some("/home/u/.ssh/id_ed25519".into()),
            password: None,
            known_hosts_path: Some(PathBuf::from("/tmp/known_hosts")),
            keepalive_secs: 15,
        };
        let params = SshParams::from(&config);
        assert_eq!(params.port, 2222);
        assert_eq!(params.identity_path.as_deref(), Some("/home/u/.ssh/id_ed25519"));
        assert_eq!(params.known_hosts_path, Some(PathBuf::from("/tmp/known_hosts")));
        assert_eq!(params.keepalive_secs, 15);
    }

    #[tokio::test]
    async fn new_manager_needs_connect_and_shuts_down_cleanly() {
        let manager = SessionManager::new(params());
        assert!(needs_connect(manager.handle.lock().await.as_ref()));
        manager.shutdown().await;
        assert!(needs_connect(manager.handle.lock().await.as_ref()));
    }

    #[test]
    fn zero_keepalive_disables_keepalive() {
        let mut params = params();
        params.keepalive_secs = 0;
        let manager = SessionManager::new(params);
        assert!(manager.config.keepalive_interval.is_none());
    }
}
