// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Per-job stage machine: relaxation -> static -> bands.
//!
//! No stage state is stored anywhere. Every call re-derives the job state from the remote tree
//! (completion markers in each stage's OUTCAR), so repeated calls and daemon restarts converge on
//! whatever actually happened on the cluster.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::app::errors::{AppResult, local_error, remote_error};
use crate::app::ports::{
    MeshGeneratorPort, RemediationAdvisorPort, RemoteSessionPort, RetryLedgerPort,
};
use crate::app::services::shell::{remote_join, sh_escape};
use crate::app::services::{incar, log_analyzer, slurm};
use crate::app::types::{
    JobState, LogStatus, MeshTask, PatchSet, RunningMatch, Stage, StageMarkers,
};

pub const RUN_LOG: &str = "run.log";
pub const PREVIOUS_RUN_LOG: &str = "run.log.prev";
pub const OUTCAR: &str = "OUTCAR";
pub const INCAR: &str = "INCAR";
pub const POSCAR: &str = "POSCAR";
pub const CONTCAR: &str = "CONTCAR";
pub const POTCAR: &str = "POTCAR";
pub const CHGCAR: &str = "CHGCAR";
pub const KPOINTS: &str = "KPOINTS";

/// Files that must be present in a stage directory before it is submitted.
pub fn required_inputs(stage: Stage) -> &'static [&'static str] {
    match stage {
        Stage::Relaxation | Stage::Static => &[slurm::JOB_SCRIPT_NAME, INCAR, POTCAR, POSCAR],
        Stage::Bands => &[slurm::JOB_SCRIPT_NAME, INCAR, POTCAR, POSCAR, CHGCAR, KPOINTS],
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Pause between submission and the first log read.
    pub settle_delay: Duration,
    pub max_retries: u32,
    pub log_tail_lines: usize,
    pub running_match: RunningMatch,
    pub markers: StageMarkers,
    pub mesh_task: MeshTask,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(5),
            max_retries: 3,
            log_tail_lines: 100,
            running_match: RunningMatch::Exact,
            markers: StageMarkers::default(),
            mesh_task: MeshTask::KPath3D,
        }
    }
}

/// Completion facts read from the remote tree, gathered latest stage first.
/// Fields after the first `true` completion are left `false` because they are never consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageProbe {
    pub bands_complete: bool,
    pub static_complete: bool,
    pub relaxation_complete: bool,
    pub relaxation_dir_exists: bool,
}

/// Total and side-effect free: the same probe always yields the same state.
pub fn decide_state(probe: &StageProbe) -> JobState {
    if probe.bands_complete {
        JobState::Complete
    } else if probe.static_complete {
        JobState::BandsActive
    } else if probe.relaxation_complete {
        JobState::StaticActive
    } else if probe.relaxation_dir_exists {
        JobState::RelaxationActive
    } else {
        JobState::NotStarted
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Every stage reports completion; nothing was done.
    Complete,
    /// A precondition or remote step did not hold this cycle; revisited next cycle.
    Deferred(String),
    /// The run log shows no failure. `submitted` is true when this pass queued the job.
    Healthy { submitted: bool, step_count: usize },
    /// A patch was applied and the stage resubmitted.
    Remediated { attempt: u32, patch: PatchSet },
    /// The advisor had nothing to offer.
    NoFixAvailable,
    /// Retry budget for the stage directory is spent.
    ManualIntervention { attempts: u32 },
    /// Reading or writing the INCAR failed; the retry count is untouched.
    RemediationFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub state: JobState,
    pub outcome: StageOutcome,
}

#[derive(Clone)]
pub struct StageOrchestrator {
    session: Arc<dyn RemoteSessionPort>,
    advisor: Arc<dyn RemediationAdvisorPort>,
    mesh: Arc<dyn MeshGeneratorPort>,
    ledger: Arc<dyn RetryLedgerPort>,
    settings: OrchestratorSettings,
}

impl StageOrchestrator {
    pub fn new(
        session: Arc<dyn RemoteSessionPort>,
        advisor: Arc<dyn RemediationAdvisorPort>,
        mesh: Arc<dyn MeshGeneratorPort>,
        ledger: Arc<dyn RetryLedgerPort>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            session,
            advisor,
            mesh,
            ledger,
            settings,
        }
    }

    /// Reads the remote tree and returns the job state without changing anything.
    pub async fn inspect(&self, job_dir: &str) -> JobState {
        decide_state(&self.probe(job_dir).await)
    }

    /// Advances one job directory by at most one stage step.
    #[tracing::instrument(name = "job", level = "info", skip(self), fields(path = %job_dir))]
    pub async fn process(&self, job_dir: &str) -> JobReport {
        let state = self.inspect(job_dir).await;
        tracing::info!(state = %state, "evaluated job state");
        let outcome = match state {
            JobState::Complete => {
                tracing::info!("all stages complete");
                StageOutcome::Complete
            }
            JobState::NotStarted => {
                let dir = stage_dir(job_dir, Stage::Relaxation);
                tracing::warn!("relaxation directory {dir} is missing; nothing to run");
                StageOutcome::Deferred(format!("relaxation directory {dir} is missing"))
            }
            JobState::RelaxationActive => {
                let work_dir = stage_dir(job_dir, Stage::Relaxation);
                self.submit_and_monitor(Stage::Relaxation, &work_dir).await
            }
            JobState::StaticActive => self.run_static(job_dir).await,
            JobState::BandsActive => self.run_bands(job_dir).await,
        };
        JobReport { state, outcome }
    }

    async fn probe(&self, job_dir: &str) -> StageProbe {
        let mut probe = StageProbe::default();
        probe.bands_complete = self.is_stage_complete(job_dir, Stage::Bands).await;
        if probe.bands_complete {
            return probe;
        }
        probe.static_complete = self.is_stage_complete(job_dir, Stage::Static).await;
        if probe.static_complete {
            return probe;
        }
        probe.relaxation_complete = self.is_stage_complete(job_dir, Stage::Relaxation).await;
        if probe.relaxation_complete {
            return probe;
        }
        probe.relaxation_dir_exists = self
            .session
            .exists(&stage_dir(job_dir, Stage::Relaxation))
            .await;
        probe
    }

    async fn is_stage_complete(&self, job_dir: &str, stage: Stage) -> bool {
        let outcar = remote_join(&stage_dir(job_dir, stage), OUTCAR);
        if !self.session.exists(&outcar).await {
            return false;
        }
        let marker = self.settings.markers.for_stage(stage);
        let command = format!("grep -q -F -- {} {}", sh_escape(marker), sh_escape(&outcar));
        self.session.run(&command).await.ok
    }

    async fn run_static(&self, job_dir: &str) -> StageOutcome {
        let work_dir = stage_dir(job_dir, Stage::Static);
        let relax_dir = stage_dir(job_dir, Stage::Relaxation);
        tracing::info!("relaxation complete, driving static stage");

        if let Err(err) = self.ensure_dir(&work_dir).await {
            return StageOutcome::Deferred(err.to_string());
        }
        if let Err(err) = self
            .ensure_copied(&relax_dir, CONTCAR, &work_dir, POSCAR)
            .await
        {
            return StageOutcome::Deferred(err.to_string());
        }
        self.submit_and_monitor(Stage::Static, &work_dir).await
    }

    async fn run_bands(&self, job_dir: &str) -> StageOutcome {
        let work_dir = stage_dir(job_dir, Stage::Bands);
        let static_dir = stage_dir(job_dir, Stage::Static);
        tracing::info!("static stage complete, driving bands stage");

        if let Err(err) = self.ensure_dir(&work_dir).await {
            return StageOutcome::Deferred(err.to_string());
        }
        for artifact in [CHGCAR, POSCAR] {
            if let Err(err) = self
                .ensure_copied(&static_dir, artifact, &work_dir, artifact)
                .await
            {
                return StageOutcome::Deferred(err.to_string());
            }
        }
        if let Err(err) = self.ensure_mesh(&work_dir).await {
            tracing::warn!("band stage halted: {err}");
            return StageOutcome::Deferred(err.to_string());
        }

        let outcome = self.submit_and_monitor(Stage::Bands, &work_dir).await;
        if matches!(outcome, StageOutcome::Healthy { .. })
            && self.is_stage_complete(job_dir, Stage::Bands).await
        {
            if self.mesh.extract_bands(&work_dir).await {
                tracing::info!("band data extracted in {work_dir}");
            } else {
                tracing::warn!("band data extraction failed in {work_dir}");
            }
        }
        outcome
    }

    async fn ensure_dir(&self, dir: &str) -> AppResult<()> {
        if self.session.exists(dir).await {
            return Ok(());
        }
        tracing::info!("creating {dir}");
        let output = self
            .session
            .run(&format!("mkdir -p {}", sh_escape(dir)))
            .await;
        if output.ok {
            Ok(())
        } else {
            Err(remote_error(format!(
                "failed to create {dir}: {}",
                output.stderr.trim()
            )))
        }
    }

    /// Copies `from_dir/from_name` to `to_dir/to_name` unless the destination already exists.
    async fn ensure_copied(
        &self,
        from_dir: &str,
        from_name: &str,
        to_dir: &str,
        to_name: &str,
    ) -> AppResult<()> {
        let destination = remote_join(to_dir, to_name);
        if self.session.exists(&destination).await {
            return Ok(());
        }
        let source = remote_join(from_dir, from_name);
        tracing::info!("copying {source} to {destination}");
        let output = self
            .session
            .run(&format!("cp {} {}", sh_escape(&source), sh_escape(&destination)))
            .await;
        if output.ok {
            Ok(())
        } else {
            Err(remote_error(format!(
                "failed to copy {source} to {destination}: {}",
                output.stderr.trim()
            )))
        }
    }

    async fn ensure_mesh(&self, work_dir: &str) -> AppResult<()> {
        let kpoints = remote_join(work_dir, KPOINTS);
        if self.session.exists(&kpoints).await {
            return Ok(());
        }
        tracing::info!("generating k-path mesh in {work_dir}");
        if !self.mesh.generate(work_dir, self.settings.mesh_task).await {
            return Err(remote_error(format!(
                "k-path generation failed in {work_dir}"
            )));
        }
        // The generator's answer is not trusted on its own.
        if !self.session.exists(&kpoints).await {
            return Err(remote_error(format!(
                "k-path generation reported success but {kpoints} is missing"
            )));
        }
        Ok(())
    }

    async fn missing_inputs(&self, stage: Stage, work_dir: &str) -> Vec<&'static str> {
        let mut missing = Vec::new();
        for name in required_inputs(stage) {
            if !self.session.exists(&remote_join(work_dir, name)).await {
                missing.push(*name);
            }
        }
        missing
    }

    #[tracing::instrument(name = "stage", level = "info", skip(self, work_dir), fields(stage = %stage))]
    async fn submit_and_monitor(&self, stage: Stage, work_dir: &str) -> StageOutcome {
        let queue = self.session.run(slurm::LIST_ACTIVE_DIRS_CMD).await;
        if !queue.ok {
            tracing::warn!(
                "scheduler query failed, not submitting {work_dir}: {}",
                queue.stderr.trim()
            );
            return StageOutcome::Deferred(format!(
                "scheduler query failed: {}",
                queue.stderr.trim()
            ));
        }

        let running =
            slurm::is_stage_running(&queue.stdout, work_dir, self.settings.running_match);
        if running {
            tracing::info!("{work_dir} is already queued or running; checking logs");
            return self.check_run_log(work_dir, false).await;
        }

        // A spent budget blocks every sbatch, including the one for a job that crashed out of
        // the queue.
        let attempts = self.ledger.attempts(work_dir);
        if attempts >= self.settings.max_retries {
            tracing::error!(
                attempts,
                "manual intervention required for {work_dir}: retry budget of {} spent",
                self.settings.max_retries
            );
            return StageOutcome::ManualIntervention { attempts };
        }

        let missing = self.missing_inputs(stage, work_dir).await;
        if !missing.is_empty() {
            let listed = missing.join(", ");
            tracing::warn!("not submitting {work_dir}: missing {listed}");
            return StageOutcome::Deferred(format!("{work_dir} is missing {listed}"));
        }

        // The log left by a run that has since left the queue decides between a plain
        // submission and a patched one.
        if let Some((run_log, outcar_tail)) = self.read_tails(work_dir).await {
            let status = log_analyzer::classify(&run_log);
            if status.is_failure() {
                tracing::info!("previous run in {work_dir} failed");
                return self
                    .remediate(work_dir, &status, &run_log, &outcar_tail)
                    .await;
            }
        }

        if let Err(err) = self.submit(work_dir).await {
            return StageOutcome::Deferred(err.to_string());
        }
        tokio::time::sleep(self.settings.settle_delay).await;
        self.check_run_log(work_dir, true).await
    }

    /// Classifies the current run log and remediates on failure.
    async fn check_run_log(&self, work_dir: &str, submitted: bool) -> StageOutcome {
        let Some((run_log, outcar_tail)) = self.read_tails(work_dir).await else {
            return StageOutcome::Healthy {
                submitted,
                step_count: 0,
            };
        };
        let status = log_analyzer::classify(&run_log);
        if !status.is_failure() {
            tracing::debug!(steps = status.step_count, "{work_dir} looks healthy");
            return StageOutcome::Healthy {
                submitted,
                step_count: status.step_count,
            };
        }
        self.remediate(work_dir, &status, &run_log, &outcar_tail)
            .await
    }

    /// Moves the previous run log aside so that only output of the new job is classified.
    async fn rotate_run_log(&self, work_dir: &str) -> AppResult<()> {
        let log_path = remote_join(work_dir, RUN_LOG);
        if !self.session.exists(&log_path).await {
            return Ok(());
        }
        let previous = remote_join(work_dir, PREVIOUS_RUN_LOG);
        let output = self
            .session
            .run(&format!("mv -f {} {}", sh_escape(&log_path), sh_escape(&previous)))
            .await;
        if !output.ok {
            return Err(remote_error(format!(
                "cannot move {log_path} aside: {}",
                output.stderr.trim()
            )));
        }
        tracing::debug!("moved {log_path} to {previous}");
        Ok(())
    }

    async fn submit(&self, work_dir: &str) -> AppResult<Option<i64>> {
        self.rotate_run_log(work_dir).await?;
        tracing::info!("submitting job in {work_dir}");
        let output = self.session.run(&slurm::submit_command(work_dir)).await;
        if !output.ok {
            tracing::warn!("sbatch failed in {work_dir}: {}", output.stderr.trim());
            return Err(remote_error(format!(
                "sbatch failed in {work_dir}: {}",
                output.stderr.trim()
            )));
        }
        let job_id = slurm::parse_job_id(&output.stdout);
        match job_id {
            Some(id) => tracing::info!("submitted batch job {id} for {work_dir}"),
            None => tracing::info!("submitted {work_dir}: {}", output.stdout.trim()),
        }
        Ok(job_id)
    }

    /// Run log and OUTCAR tails. `None` when there is no run log to inspect yet.
    async fn read_tails(&self, work_dir: &str) -> Option<(String, String)> {
        let log_path = remote_join(work_dir, RUN_LOG);
        if !self.session.exists(&log_path).await {
            tracing::debug!("{log_path} not written yet");
            return None;
        }
        let run_log = self.tail(&log_path).await?;
        let outcar_path = remote_join(work_dir, OUTCAR);
        let outcar_tail = if self.session.exists(&outcar_path).await {
            self.tail(&outcar_path).await.unwrap_or_default()
        } else {
            String::new()
        };
        Some((run_log, outcar_tail))
    }

    async fn tail(&self, path: &str) -> Option<String> {
        let command = format!(
            "tail -n {} {}",
            self.settings.log_tail_lines,
            sh_escape(path)
        );
        let output = self.session.run(&command).await;
        if output.ok {
            Some(output.stdout)
        } else {
            tracing::warn!("failed to read {path}: {}", output.stderr.trim());
            None
        }
    }

    async fn remediate(
        &self,
        work_dir: &str,
        status: &LogStatus,
        run_log: &str,
        outcar_tail: &str,
    ) -> StageOutcome {
        let message = status.message.as_deref().unwrap_or("unclassified failure");
        tracing::warn!(action = ?status.action, "issue detected in {work_dir}: {message}");

        let attempts = self.ledger.attempts(work_dir);
        if attempts >= self.settings.max_retries {
            tracing::error!(
                attempts,
                "manual intervention required for {work_dir}: retry budget of {} spent",
                self.settings.max_retries
            );
            return StageOutcome::ManualIntervention { attempts };
        }

        let incar_path = remote_join(work_dir, INCAR);
        let current = self.session.run(&format!("cat {}", sh_escape(&incar_path))).await;
        if !current.ok {
            tracing::warn!("cannot read {incar_path}: {}", current.stderr.trim());
            return StageOutcome::RemediationFailed(format!("cannot read {incar_path}"));
        }

        tracing::info!("requesting remediation for {work_dir}");
        let patch = self
            .advisor
            .analyze(run_log, outcar_tail, &current.stdout)
            .await;
        if patch.is_empty() {
            tracing::warn!("no fix available for {work_dir}");
            return StageOutcome::NoFixAvailable;
        }
        tracing::info!("applying INCAR patch to {work_dir}: {patch}");

        let patched = incar::apply_patch(&current.stdout, &patch);
        if let Err(err) = self.write_remote(&incar_path, &patched).await {
            tracing::warn!("failed to write patched INCAR: {err}");
            return StageOutcome::RemediationFailed(err.to_string());
        }

        let attempt = attempts + 1;
        tracing::info!("resubmitting {work_dir} (retry {attempt})");
        if let Err(err) = self.submit(work_dir).await {
            tracing::warn!("resubmission after patch failed: {err}");
        }
        self.ledger.record_attempt(work_dir);
        StageOutcome::Remediated { attempt, patch }
    }

    async fn write_remote(&self, remote_path: &str, contents: &str) -> AppResult<()> {
        let mut staged = tempfile::NamedTempFile::new()
            .map_err(|err| local_error(format!("failed to create temp file: {err}")))?;
        staged
            .write_all(contents.as_bytes())
            .and_then(|_| staged.flush())
            .map_err(|err| local_error(format!("failed to stage {remote_path}: {err}")))?;
        if self.session.put_file(staged.path(), remote_path).await {
            Ok(())
        } else {
            Err(remote_error(format!("failed to upload {remote_path}")))
        }
    }
}

pub fn stage_dir(job_dir: &str, stage: Stage) -> String {
    remote_join(job_dir, stage.dir_name())
}
