// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{FileSyncPort, RemoteSessionPort};
use crate::app::types::{CommandOutput, SshConfig};

mod error;
mod session;
mod sync_plan;

use error::AuthenticationFailure;
use session::SessionManager;

/// Remote session over a single two-hop SSH connection, established at construction.
#[derive(Clone)]
pub struct SshAdapter {
    session: Arc<SessionManager>,
}

impl SshAdapter {
    pub async fn connect(config: SshConfig) -> AppResult<Self> {
        let session = SessionManager::connect(config)
            .await
            .map_err(map_connect_error)?;
        Ok(Self {
            session: Arc::new(session),
        })
    }

    pub async fn is_connected(&self) -> bool {
        !self.session.is_closed().await
    }

    pub async fn shutdown(&self) {
        self.session.shutdown().await;
    }
}

fn ssh_error_code(err: &anyhow::Error) -> &'static str {
    if err.chain().any(|cause| cause.is::<AuthenticationFailure>()) {
        codes::AUTHENTICATION_FAILURE
    } else {
        codes::CONNECTION_FAILURE
    }
}

fn map_connect_error(err: anyhow::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Aborted,
        ssh_error_code(&err),
        format!("ssh connect failed: {err:#}"),
    )
}

fn map_transfer_error(err: anyhow::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Internal,
        codes::REMOTE_ERROR,
        format!("directory transfer failed: {err:#}"),
    )
}

fn command_output(stdout: Vec<u8>, stderr: Vec<u8>, exit_code: Option<i32>) -> CommandOutput {
    let stdout = String::from_utf8_lossy(&stdout).into_owned();
    let stderr = String::from_utf8_lossy(&stderr).into_owned();
    match exit_code {
        Some(code) => CommandOutput::from_exit(stdout, stderr, code),
        // Killed by a signal or the channel dropped before reporting a status.
        None => CommandOutput {
            ok: false,
            stdout,
            stderr,
            exit_code: None,
        },
    }
}

#[async_trait]
impl RemoteSessionPort for SshAdapter {
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, command),
        fields(op = "run", host = %self.session.config().host, user = %self.session.config().username)
    )]
    async fn run(&self, command: &str) -> CommandOutput {
        match self.session.exec_capture(command).await {
            Ok((stdout, stderr, code)) => {
                let output = command_output(stdout, stderr, code);
                if !output.ok {
                    tracing::debug!(exit_code = ?output.exit_code, "remote command failed: {command}");
                }
                output
            }
            Err(err) => {
                tracing::warn!("ssh exec failed for '{command}': {err:#}");
                CommandOutput::transport_failure(format!("ssh exec failed: {err:#}"))
            }
        }
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, local_path),
        fields(op = "put_file", host = %self.session.config().host, path = %remote_path)
    )]
    async fn put_file(&self, local_path: &Path, remote_path: &str) -> bool {
        match self.session.upload_file(local_path, remote_path).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    "upload {} -> {remote_path} failed: {err:#}",
                    local_path.display()
                );
                false
            }
        }
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, local_path),
        fields(op = "get_file", host = %self.session.config().host, path = %remote_path)
    )]
    async fn get_file(&self, remote_path: &str, local_path: &Path) -> bool {
        match self.session.download_file(remote_path, local_path).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    "download {remote_path} -> {} failed: {err:#}",
                    local_path.display()
                );
                false
            }
        }
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self),
        fields(op = "exists", host = %self.session.config().host, path = %remote_path)
    )]
    async fn exists(&self, remote_path: &str) -> bool {
        match self.session.path_exists(remote_path).await {
            Ok(exists) => exists,
            Err(err) => {
                tracing::warn!("existence check for {remote_path} failed: {err:#}");
                false
            }
        }
    }
}

#[async_trait]
impl FileSyncPort for SshAdapter {
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, local_dir),
        fields(op = "sync_dir", host = %self.session.config().host, local = %local_dir.display(), path = %remote_dir)
    )]
    async fn sync_dir(&self, local_dir: &Path, remote_dir: &str) -> AppResult<()> {
        let stats = self
            .session
            .sync_dir(local_dir, remote_dir)
            .await
            .map_err(map_transfer_error)?;
        tracing::info!(
            uploaded = stats.uploaded,
            skipped = stats.skipped,
            "synced {} to {remote_dir}",
            local_dir.display()
        );
        Ok(())
    }
}
