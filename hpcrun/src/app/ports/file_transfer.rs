// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;
use std::path::Path;

use crate::app::errors::AppResult;

#[async_trait]
/// File transfer boundary between the local machine and the cluster.
/// A missing remote file is reported as `AppErrorKind::NotFound`.
pub trait FileTransferPort: Send + Sync {
    /// Copy `local_path` into `remote_dir`, keeping its file name.
    async fn upload_file(&self, local_path: &Path, remote_dir: &str) -> AppResult<()>;

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> AppResult<()>;
}
