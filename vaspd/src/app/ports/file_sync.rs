// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;
use std::path::Path;

use crate::app::errors::AppResult;

#[async_trait]
/// Local-to-remote directory transfer used to mirror queued job trees onto the cluster.
pub trait FileSyncPort: Send + Sync {
    /// Copies `local_dir` recursively into `remote_dir`, creating directories as needed.
    async fn sync_dir(&self, local_dir: &Path, remote_dir: &str) -> AppResult<()>;
}
