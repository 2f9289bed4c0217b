// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags, StatusCode};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs as tokiofs;
use tokio::io::{AsyncRead, AsyncWriteExt};

use super::SessionManager;

impl SessionManager {
    async fn sftp(&self) -> Result<SftpSession> {
        let guard = self.handle.lock().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| anyhow!("SSH handle lost before opening SFTP"))?;
        let channel = handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        Ok(sftp)
    }

    /// Copy `local_path` into `remote_dir` under its own file name,
    /// creating the directory and replacing an existing file.
    pub(crate) async fn upload_file(&self, local_path: &Path, remote_dir: &str) -> Result<String> {
        let file_name = local_path
            .file_name()
            .ok_or_else(|| anyhow!("{} has no file name", local_path.display()))?
            .to_string_lossy()
            .into_owned();
        let mut local = tokiofs::File::open(local_path)
            .await
            .with_context(|| format!("opening {}", local_path.display()))?;

        let sftp = self.sftp().await?;
        let result = upload_into(&sftp, &mut local, &sftp_path(remote_dir), &file_name).await;
        let _ = sftp.close().await;
        if let Ok(remote_path) = &result {
            tracing::debug!(
                local = %local_path.display(),
                remote = %remote_path,
                "uploaded over sftp"
            );
        }
        result
    }

    /// Copy `remote_path` to `local_path`. `local_path` is only replaced once
    /// the whole file has arrived; nothing is created locally when the
    /// remote file cannot be opened.
    pub(crate) async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let sftp = self.sftp().await?;
        let result = download_into(&sftp, &sftp_path(remote_path), local_path).await;
        let _ = sftp.close().await;
        result
    }
}

async fn upload_into(
    sftp: &SftpSession,
    local: &mut tokiofs::File,
    remote_dir: &str,
    file_name: &str,
) -> Result<String> {
    ensure_remote_dir(sftp, remote_dir).await?;
    let remote_path = join_sftp(remote_dir, file_name);
    let flags = OpenFlags::WRITE
        .union(OpenFlags::CREATE)
        .union(OpenFlags::TRUNCATE);
    let mut rfile = sftp
        .open_with_flags(&remote_path, flags)
        .await
        .with_context(|| format!("opening remote file {remote_path}"))?;
    tokio::io::copy(local, &mut rfile)
        .await
        .with_context(|| format!("writing remote file {remote_path}"))?;
    rfile.flush().await?;
    rfile.shutdown().await?;
    Ok(remote_path)
}

async fn download_into(sftp: &SftpSession, remote_path: &str, local_path: &Path) -> Result<()> {
    let mut rfile = sftp
        .open(remote_path)
        .await
        .with_context(|| format!("opening remote file {remote_path}"))?;
    if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokiofs::create_dir_all(parent).await?;
    }
    write_replacing(&mut rfile, local_path)
        .await
        .with_context(|| format!("reading remote file {remote_path}"))
}

/// Stream `reader` into a `.part` sibling and rename it over `target`.
/// On failure the partial file is removed and `target` is left untouched.
async fn write_replacing<R>(reader: &mut R, target: &Path) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let partial = partial_path(target);
    let written = async {
        let mut file = tokiofs::File::create(&partial).await?;
        tokio::io::copy(reader, &mut file).await?;
        file.flush().await
    }
    .await;
    if let Err(err) = written {
        let _ = tokiofs::remove_file(&partial).await;
        return Err(err).with_context(|| format!("writing {}", partial.display()));
    }
    tokiofs::rename(&partial, target)
        .await
        .with_context(|| format!("moving {} into place", partial.display()))
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

async fn ensure_remote_dir(sftp: &SftpSession, remote_dir: &str) -> Result<()> {
    for cur in build_remote_dir_paths(remote_dir) {
        match sftp.metadata(&cur).await {
            Ok(meta) => {
                if !meta.is_dir() {
                    return Err(anyhow!(
                        "remote path exists but is not a directory: {}",
                        cur
                    ));
                }
            }
            Err(e) => {
                tracing::debug!(path = %cur, "creating remote directory after metadata error: {e}");
                let attrs = FileAttributes {
                    permissions: Some(0o700),
                    ..Default::default()
                };
                sftp.create_dir(&cur)
                    .await
                    .with_context(|| format!("creating path {}", &cur))?;
                if let Err(e) = sftp.set_metadata(&cur, attrs).await {
                    if is_permission_denied(&e) {
                        tracing::debug!(path = %cur, "permission denied when setting metadata: {e}");
                    } else {
                        tracing::warn!(path = %cur, "error when setting metadata: {e}");
                    }
                }
            }
        }
    }
    Ok(())
}

/// SFTP does not expand `~`; paths relative to the login directory are
/// already resolved against home.
fn sftp_path(path: &str) -> String {
    match path {
        "~" => ".".to_string(),
        _ => match path.strip_prefix("~/") {
            Some(rest) if rest.is_empty() => ".".to_string(),
            Some(rest) => rest.to_string(),
            None => path.to_string(),
        },
    }
}

fn join_sftp(dir: &str, name: &str) -> String {
    match dir.trim_end_matches('/') {
        "" if dir.starts_with('/') => format!("/{name}"),
        "" | "." => name.to_string(),
        trimmed => format!("{trimmed}/{name}"),
    }
}

/// Every directory prefix of `remote_dir`, outermost first. The root and
/// the current directory are assumed to exist.
fn build_remote_dir_paths(remote_dir: &str) -> Vec<String> {
    let absolute = remote_dir.starts_with('/');
    let mut paths = Vec::new();
    let mut cur = String::new();
    for seg in remote_dir.split('/') {
        if seg.is_empty() || seg == "." {
            continue;
        }
        if cur.is_empty() {
            cur = if absolute {
                format!("/{seg}")
            } else {
                seg.to_string()
            };
        } else {
            cur = format!("{cur}/{seg}");
        }
        paths.push(cur.clone());
    }
    paths
}

fn is_permission_denied(err: &russh_sftp::client::error::Error) -> bool {
    match err {
        russh_sftp::client::error::Error::Status(status) => {
            status.status_code == StatusCode::PermissionDenied
        }
        russh_sftp::client::error::Error::IO(msg) => {
            msg.to_lowercase().contains("permission denied")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_dir_prefixes_for_absolute_and_relative_paths() {
        assert_eq!(
            build_remote_dir_paths("/lustre/home/stu658/cuda-test/"),
            vec![
                "/lustre",
                "/lustre/home",
                "/lustre/home/stu658",
                "/lustre/home/stu658/cuda-test",
            ]
        );
        assert_eq!(build_remote_dir_paths("cuda-test/./run"), vec!["cuda-test", "cuda-test/run"]);
        assert!(build_remote_dir_paths("/").is_empty());
        assert!(build_remote_dir_paths(".").is_empty());
    }

    #[test]
    fn tilde_paths_become_home_relative() {
        assert_eq!(sftp_path("~/cuda-test"), "cuda-test");
        assert_eq!(sftp_path("~"), ".");
        assert_eq!(sftp_path("~/"), ".");
        assert_eq!(sftp_path("/abs/dir"), "/abs/dir");
        assert_eq!(sftp_path("~other/dir"), "~other/dir");
    }

    #[test]
    fn join_sftp_handles_root_and_current_dir() {
        assert_eq!(join_sftp("/work/", "cuda.cu"), "/work/cuda.cu");
        assert_eq!(join_sftp("/", "cuda.cu"), "/cuda.cu");
        assert_eq!(join_sftp(".", "cuda.cu"), "cuda.cu");
        assert_eq!(join_sftp("cuda-test", "cuda.cu"), "cuda-test/cuda.cu");
    }

    struct BrokenReader {
        sent: bool,
    }

    impl AsyncRead for BrokenReader {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if self.sent {
                return std::task::Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                )));
            }
            self.sent = true;
            buf.put_slice(b"partial");
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn partial_path_is_a_sibling() {
        assert_eq!(
            partial_path(Path::new("/out/42.err")),
            PathBuf::from("/out/42.err.part")
        );
    }

    #[tokio::test]
    async fn interrupted_copy_leaves_target_untouched() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("42.err");
        std::fs::write(&target, "previous run").unwrap();

        let err = write_replacing(&mut BrokenReader { sent: false }, &target)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("connection reset"));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "previous run");
        assert!(!partial_path(&target).exists());

        let fresh = dir.path().join("43.err");
        let err = write_replacing(&mut BrokenReader { sent: false }, &fresh)
            .await
            .unwrap_err();
        assert!(err.chain().any(|cause| cause.is::<std::io::Error>()));
        assert!(!fresh.exists());
    }

    #[tokio::test]
    async fn completed_copy_replaces_target() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("42.out");
        std::fs::write(&target, "stale").unwrap();
        let mut reader: &[u8] = b"done\n";
        write_replacing(&mut reader, &target).await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "done\n");
        assert!(!partial_path(&target).exists());
    }

    #[test]
    fn permission_denied_detection() {
        let err = russh_sftp::client::error::Error::IO("Permission denied (os error 13)".into());
        assert!(is_permission_denied(&err));
        let err = russh_sftp::client::error::Error::IO("broken pipe".into());
        assert!(!is_permission_denied(&err));
    }
}
