// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::app::errors::AppResult;

#[async_trait]
/// Local filesystem boundary for the queue directory.
pub trait LocalFilesystemPort: Send + Sync {
    async fn ensure_dir(&self, path: &Path) -> AppResult<()>;

    /// Immediate subdirectories of `path`, in listing order.
    async fn list_subdirs(&self, path: &Path) -> AppResult<Vec<PathBuf>>;
}
