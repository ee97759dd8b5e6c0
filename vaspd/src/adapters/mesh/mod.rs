// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use async_trait::async_trait;

use crate::app::ports::{MeshGeneratorPort, RemoteSessionPort};
use crate::app::services::shell::{remote_join, sh_escape};
use crate::app::types::MeshTask;

/// vaspkit menu answers: task, then "K-path for band structure".
const KPATH_MENU_SUFFIX: &str = "2";
/// Task 211 (band structure), projected, all elements.
const BAND_EXTRACT_INPUT: &str = "211\\n1\\n0\\n";
const BAND_OUTPUTS: [&str; 2] = ["BAND.dat", "BAND_O.dat"];

/// Drives the vaspkit binary installed on the cluster by piping menu answers into it.
pub struct VaspkitMeshGenerator {
    session: Arc<dyn RemoteSessionPort>,
    /// Left unescaped so the remote shell expands `~`.
    executable: String,
}

impl VaspkitMeshGenerator {
    pub fn new(session: Arc<dyn RemoteSessionPort>, executable: impl Into<String>) -> Self {
        Self {
            session,
            executable: executable.into(),
        }
    }

    fn command(&self, stage_dir: &str, input: &str) -> String {
        format!(
            "cd {} && printf '{input}' | {}",
            sh_escape(stage_dir),
            self.executable
        )
    }

    async fn run_in(&self, stage_dir: &str, input: &str) -> bool {
        let output = self.session.run(&self.command(stage_dir, input)).await;
        if !output.ok {
            tracing::warn!(
                exit_code = ?output.exit_code,
                "vaspkit failed in {stage_dir}: {}",
                output.stderr.trim()
            );
        }
        output.ok
    }
}

#[async_trait]
impl MeshGeneratorPort for VaspkitMeshGenerator {
    #[tracing::instrument(name = "vaspkit", level = "info", skip(self), fields(task = task.code()))]
    async fn generate(&self, stage_dir: &str, task: MeshTask) -> bool {
        let input = format!("{}\\n{KPATH_MENU_SUFFIX}\\n", task.code());
        if !self.run_in(stage_dir, &input).await {
            return false;
        }
        let kpoints = remote_join(stage_dir, "KPOINTS");
        if self.session.exists(&kpoints).await {
            tracing::info!("KPOINTS generated in {stage_dir}");
            true
        } else {
            tracing::warn!("vaspkit finished but {kpoints} was not written");
            false
        }
    }

    #[tracing::instrument(name = "vaspkit", level = "info", skip(self), fields(task = "211"))]
    async fn extract_bands(&self, stage_dir: &str) -> bool {
        if !self.run_in(stage_dir, BAND_EXTRACT_INPUT).await {
            return false;
        }
        for name in BAND_OUTPUTS {
            if self.session.exists(&remote_join(stage_dir, name)).await {
                tracing::info!("band data written to {name} in {stage_dir}");
                return true;
            }
        }
        tracing::warn!("vaspkit finished but no band data file appeared in {stage_dir}");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::ScriptedSession;
    use crate::app::types::CommandOutput;

    const DIR: &str = "/scratch/jobs/Si/bands";
    const VASPKIT: &str = "~/vaspkit.1.5.1/bin/vaspkit";

    fn generator(session: Arc<ScriptedSession>) -> VaspkitMeshGenerator {
        VaspkitMeshGenerator::new(session, VASPKIT)
    }

    #[tokio::test]
    async fn generate_pipes_task_answers_and_checks_kpoints() {
        let session = Arc::new(ScriptedSession::new().with_file(&format!("{DIR}/KPOINTS"), "K-path\n"));

        assert!(generator(session.clone()).generate(DIR, MeshTask::KPath2D).await);
        assert_eq!(
            session.commands(),
            vec![format!("cd '{DIR}' && printf '302\\n2\\n' | {VASPKIT}")]
        );
    }

    #[tokio::test]
    async fn generate_fails_without_kpoints_file() {
        let session = Arc::new(ScriptedSession::new());

        assert!(!generator(session).generate(DIR, MeshTask::KPath3D).await);
    }

    #[tokio::test]
    async fn generate_fails_when_vaspkit_fails() {
        let session = Arc::new(ScriptedSession::new().with_file(&format!("{DIR}/KPOINTS"), "old\n"));
        session.respond(
            "cd ",
            CommandOutput::from_exit(String::new(), "vaspkit: command not found".to_string(), 127),
        );

        assert!(!generator(session).generate(DIR, MeshTask::KPath3D).await);
    }

    #[tokio::test]
    async fn extract_bands_accepts_spin_resolved_output() {
        let session = Arc::new(ScriptedSession::new().with_file(&format!("{DIR}/BAND_O.dat"), "# k E\n"));

        assert!(generator(session.clone()).extract_bands(DIR).await);
        assert_eq!(
            session.commands(),
            vec![format!("cd '{DIR}' && printf '211\\n1\\n0\\n' | {VASPKIT}")]
        );
    }

    #[tokio::test]
    async fn extract_bands_fails_without_band_files() {
        let session = Arc::new(ScriptedSession::new());

        assert!(!generator(session).extract_bands(DIR).await);
    }
}
