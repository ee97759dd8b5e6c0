// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::types::MeshTask;

#[async_trait]
/// Remote tool invocations that derive inputs for, and outputs from, the band stage.
pub trait MeshGeneratorPort: Send + Sync {
    /// Writes `KPOINTS` into `stage_dir`. The return value is the only completion signal.
    async fn generate(&self, stage_dir: &str, task: MeshTask) -> bool;

    /// Extracts band data files from a finished band calculation.
    async fn extract_bands(&self, stage_dir: &str) -> bool;
}
