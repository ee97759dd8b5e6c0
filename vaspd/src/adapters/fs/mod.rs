// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::LocalFilesystemPort;

#[derive(Clone, Default)]
pub struct LocalFilesystem;

impl LocalFilesystem {
    pub fn new() -> Self {
        Self
    }
}

fn map_io_error(action: &str, path: &Path, err: std::io::Error) -> AppError {
    let (kind, code) = if err.kind() == ErrorKind::NotFound {
        (AppErrorKind::NotFound, codes::NOT_FOUND)
    } else {
        (AppErrorKind::Internal, codes::LOCAL_ERROR)
    };
    AppError::with_message(kind, code, format!("failed to {action}: {err}"))
        .with_context(path.display().to_string())
}

#[async_trait]
impl LocalFilesystemPort for LocalFilesystem {
    #[tracing::instrument(name = "fs", level = "debug", skip(self, path), fields(op = "ensure_dir", path = %path.display()))]
    async fn ensure_dir(&self, path: &Path) -> AppResult<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|err| map_io_error("create directory", path, err))
    }

    /// Immediate subdirectories of `path`, sorted by name. Plain files are ignored.
    #[tracing::instrument(name = "fs", level = "debug", skip(self, path), fields(op = "list_subdirs", path = %path.display()))]
    async fn list_subdirs(&self, path: &Path) -> AppResult<Vec<PathBuf>> {
        let mut reader = tokio::fs::read_dir(path)
            .await
            .map_err(|err| map_io_error("read directory", path, err))?;
        let mut dirs = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|err| map_io_error("read directory entry", path, err))?
        {
            match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => dirs.push(entry.path()),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!("cannot stat {}: {err}", entry.path().display());
                }
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}
