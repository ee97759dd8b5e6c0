// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::types::CommandOutput;

#[async_trait]
/// Command and file channel to the cluster, routed user -> bastion -> target.
/// None of these calls fail outward: transport errors become `ok = false` / `false`.
/// There is no retry at this layer and no caching of results.
pub trait RemoteSessionPort: Send + Sync {
    async fn run(&self, command: &str) -> CommandOutput;

    async fn put_file(&self, local_path: &Path, remote_path: &str) -> bool;

    async fn get_file(&self, remote_path: &str, local_path: &Path) -> bool;

    /// SFTP stat of the path; a stat or session failure reads as `false`.
    async fn exists(&self, remote_path: &str) -> bool;
}
