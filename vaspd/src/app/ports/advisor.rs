// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::types::PatchSet;

#[async_trait]
/// Proposes INCAR changes for a failing stage.
/// An empty patch set means "no fix"; implementations swallow their own failures into it.
pub trait RemediationAdvisorPort: Send + Sync {
    async fn analyze(&self, run_log_tail: &str, output_tail: &str, incar: &str) -> PatchSet;
}
