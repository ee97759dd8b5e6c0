// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use std::path::Path;
use tokio::fs as tokiofs;
use tokio::io::AsyncWriteExt;

use super::SessionManager;
use super::super::sync_plan::{RemoteEntry, build_sync_plan, needs_upload, remote_dir_chain};

/// Counts from one directory mirror.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub uploaded: usize,
    pub skipped: usize,
}

impl SessionManager {
    async fn sftp(&self) -> Result<SftpSession> {
        let handle = self.target.lock().await;
        let channel = handle
            .channel_open_session()
            .await
            .context("open sftp channel")?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .context("request sftp subsystem")?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .context("start sftp session")?;
        Ok(sftp)
    }

    pub async fn path_exists(&self, remote_path: &str) -> Result<bool> {
        let sftp = self.sftp().await?;
        sftp.try_exists(remote_path)
            .await
            .with_context(|| format!("stat {remote_path}"))
    }

    pub async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let sftp = self.sftp().await?;
        upload_single_file(&sftp, local_path, remote_path).await
    }

    pub async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let sftp = self.sftp().await?;
        let meta = sftp
            .metadata(remote_path)
            .await
            .with_context(|| format!("stat {remote_path}"))?;
        if meta.is_dir() {
            anyhow::bail!("{remote_path} is a directory");
        }
        download_file(&sftp, remote_path, local_path).await
    }

    /// Mirror a local directory tree into `remote_dir`.
    /// - Creates remote directories as needed
    /// - Skips files where remote mtime >= local mtime
    pub async fn sync_dir(&self, local_dir: &Path, remote_dir: &str) -> Result<SyncStats> {
        let plan = build_sync_plan(local_dir, remote_dir)?;
        let sftp = self.sftp().await?;

        ensure_remote_dirs(&sftp, &remote_dir_chain(&plan.remote_root)).await?;
        ensure_remote_dirs(&sftp, &plan.remote_dirs).await?;

        let mut stats = SyncStats::default();
        for item in &plan.items {
            let remote = remote_entry(&sftp, &item.remote_path).await?;
            if needs_upload(item.local_mtime, remote, &item.remote_path)? {
                upload_single_file(&sftp, &item.local_path, &item.remote_path).await?;
                stats.uploaded += 1;
            } else {
                log::debug!(
                    "remote file {} is at least as new as {}, skipping transfer",
                    item.remote_path,
                    item.local_path.display()
                );
                stats.skipped += 1;
            }
        }
        Ok(stats)
    }
}

async fn remote_entry(sftp: &SftpSession, remote_path: &str) -> Result<RemoteEntry> {
    match sftp.metadata(remote_path).await {
        Ok(meta) if meta.is_dir() => Ok(RemoteEntry::Directory),
        Ok(meta) => Ok(RemoteEntry::File {
            mtime: meta.mtime.map(u64::from),
        }),
        Err(e) if is_missing(&e) => Ok(RemoteEntry::Missing),
        Err(e) => Err(anyhow!("stat {remote_path} failed: {e}")),
    }
}

async fn ensure_remote_dirs(sftp: &SftpSession, dirs: &[String]) -> Result<()> {
    for cur in dirs {
        match sftp.metadata(cur).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(anyhow!(
                    "remote path exists but is not a directory: {cur}"
                ));
            }
            Err(e) if is_missing(&e) => {
                log::debug!("creating remote directory {cur}");
                sftp.create_dir(cur.as_str())
                    .await
                    .with_context(|| format!("creating path {cur}"))?;
            }
            Err(e) => return Err(anyhow!("stat {cur} failed: {e}")),
        }
    }
    Ok(())
}

async fn upload_single_file(sftp: &SftpSession, local_path: &Path, remote_path: &str) -> Result<()> {
    log::debug!(
        "uploading file over sftp: {} -> {remote_path}",
        local_path.display()
    );
    let mut lf = tokiofs::File::open(local_path)
        .await
        .with_context(|| format!("opening local file {}", local_path.display()))?;
    let mut rfile = sftp
        .create(remote_path)
        .await
        .with_context(|| format!("creating remote file {remote_path}"))?;
    tokio::io::copy(&mut lf, &mut rfile)
        .await
        .with_context(|| format!("writing {remote_path}"))?;
    rfile.flush().await?;
    rfile.shutdown().await?;
    Ok(())
}

async fn download_file(sftp: &SftpSession, remote_path: &str, local_path: &Path) -> Result<()> {
    if let Some(parent) = local_path.parent() {
        tokiofs::create_dir_all(parent).await?;
    }
    let mut rfile = sftp
        .open(remote_path)
        .await
        .with_context(|| format!("opening remote file {remote_path}"))?;
    let mut lfile = tokiofs::File::create(local_path)
        .await
        .with_context(|| format!("creating {}", local_path.display()))?;
    tokio::io::copy(&mut rfile, &mut lfile).await?;
    lfile.flush().await?;
    Ok(())
}

fn is_missing(err: &russh_sftp::client::error::Error) -> bool {
    matches!(
        err,
        russh_sftp::client::error::Error::Status(status)
            if status.status_code == StatusCode::NoSuchFile
    )
}
