// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ExecCapture, FileTransferPort, RemoteExecPort};
use crate::app::types::SshConfig;

mod error;
mod session;

use error::AuthenticationFailure;
use session::{SessionManager, SshParams};

/// Remote session over a single lazily established SSH connection.
#[derive(Clone)]
pub struct SshAdapter {
    session: Arc<SessionManager>,
}

impl SshAdapter {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            session: Arc::new(SessionManager::new(SshParams::from(config))),
        }
    }

    fn params(&self) -> &SshParams {
        self.session.params()
    }

    async fn connect(&self) -> AppResult<()> {
        self.session
            .ensure_connected()
            .await
            .map_err(map_connect_error)
    }
}

fn is_authentication_failure(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<AuthenticationFailure>())
}

fn map_connect_error(err: anyhow::Error) -> AppError {
    if is_authentication_failure(&err) {
        return AppError::with_message(
            AppErrorKind::Authentication,
            codes::AUTHENTICATION_FAILURE,
            format!("ssh connect failed: {err:#}"),
        );
    }
    AppError::with_message(
        AppErrorKind::Connection,
        codes::CONNECTION_FAILURE,
        format!("ssh connect failed: {err:#}"),
    )
}

fn map_exec_error(err: anyhow::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Remote,
        codes::REMOTE_ERROR,
        format!("ssh exec failed: {err:#}"),
    )
}

fn map_transfer_error(err: anyhow::Error, remote_path: &str) -> AppError {
    if is_sftp_missing_path(&err) {
        return AppError::with_message(
            AppErrorKind::NotFound,
            codes::NOT_FOUND,
            format!("remote path missing: {remote_path}"),
        );
    }
    if is_local_io_error(&err) {
        return AppError::with_message(AppErrorKind::Local, codes::LOCAL_ERROR, format!("{err:#}"));
    }
    AppError::with_message(
        AppErrorKind::Remote,
        codes::REMOTE_ERROR,
        format!("sftp transfer failed: {err:#}"),
    )
}

fn is_sftp_missing_path(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        let Some(sftp_error) = cause.downcast_ref::<russh_sftp::client::error::Error>() else {
            return false;
        };
        matches!(
            sftp_error,
            russh_sftp::client::error::Error::Status(status)
                if status.status_code == russh_sftp::protocol::StatusCode::NoSuchFile
        )
    })
}

fn is_local_io_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<std::io::Error>())
}

#[async_trait]
impl RemoteExecPort for SshAdapter {
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, command),
        fields(op = "exec_capture", host = %self.params().host, user = %self.params().username, port = self.params().port)
    )]
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture> {
        self.connect().await?;
        let captured = self
            .session
            .exec_capture(command)
            .await
            .map_err(|err| map_exec_error(err).with_context(command))?;
        let exit_code = captured.exit_code();
        Ok(ExecCapture {
            stdout: captured.stdout,
            stderr: captured.stderr,
            exit_code,
        })
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self),
        fields(op = "close", host = %self.params().host, user = %self.params().username, port = self.params().port)
    )]
    async fn close(&self) {
        self.session.shutdown().await;
    }
}

#[async_trait]
impl FileTransferPort for SshAdapter {
    #[tracing::instrument(
        name = "sftp",
        level = "debug",
        skip(self, local_path, remote_dir),
        fields(op = "upload_file", host = %self.params().host, local = %local_path.display(), path = %remote_dir)
    )]
    async fn upload_file(&self, local_path: &Path, remote_dir: &str) -> AppResult<()> {
        self.connect().await?;
        let remote_path = self
            .session
            .upload_file(local_path, remote_dir)
            .await
            .map_err(|err| map_transfer_error(err, remote_dir))?;
        tracing::debug!(remote = %remote_path, "upload complete");
        Ok(())
    }

    #[tracing::instrument(
        name = "sftp",
        level = "debug",
        skip(self, remote_path, local_path),
        fields(op = "download_file", host = %self.params().host, path = %remote_path, local = %local_path.display())
    )]
    async fn download_file(&self, remote_path: &str, local_path: &Path) -> AppResult<()> {
        self.connect().await?;
        self.session
            .download_file(remote_path, local_path)
            .await
            .map_err(|err| map_transfer_error(err, remote_path))
    }
}
