// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::app::errors::AppResult;
use crate::app::orchestrator::{JobReport, StageOrchestrator};
use crate::app::ports::{FileSyncPort, LocalFilesystemPort};
use crate::app::services::shell::remote_join;
use crate::app::types::JobState;

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub queue_dir: PathBuf,
    pub remote_base_dir: String,
    pub poll_interval: Duration,
}

/// What one pass over the queue directory did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSummary {
    pub entries: usize,
    pub transfer_failures: usize,
    pub reports: Vec<(String, JobReport)>,
}

pub struct QueueDaemon {
    local_fs: Arc<dyn LocalFilesystemPort>,
    file_sync: Arc<dyn FileSyncPort>,
    orchestrator: StageOrchestrator,
    settings: DaemonSettings,
}

impl QueueDaemon {
    pub fn new(
        local_fs: Arc<dyn LocalFilesystemPort>,
        file_sync: Arc<dyn FileSyncPort>,
        orchestrator: StageOrchestrator,
        settings: DaemonSettings,
    ) -> Self {
        Self {
            local_fs,
            file_sync,
            orchestrator,
            settings,
        }
    }

    /// Creates the local queue directory if it does not exist yet.
    pub async fn prepare(&self) -> AppResult<()> {
        self.local_fs.ensure_dir(&self.settings.queue_dir).await
    }

    /// Remote mirror of a queue entry.
    pub fn remote_dir_for(&self, entry_name: &str) -> String {
        remote_join(&self.settings.remote_base_dir, entry_name)
    }

    /// Transfers every queued job directory and advances each one by a single step.
    /// A failed transfer skips that entry only.
    #[tracing::instrument(name = "cycle", level = "info", skip(self), fields(queue = %self.settings.queue_dir.display()))]
    pub async fn run_cycle(&self) -> AppResult<CycleSummary> {
        let entries = self.local_fs.list_subdirs(&self.settings.queue_dir).await?;
        let mut summary = CycleSummary {
            entries: entries.len(),
            ..CycleSummary::default()
        };
        if entries.is_empty() {
            tracing::debug!("queue is empty");
        }

        for entry in entries {
            let Some(name) = entry_name(&entry) else {
                tracing::warn!("skipping queue entry without a name: {}", entry.display());
                continue;
            };
            let remote_dir = self.remote_dir_for(&name);
            tracing::info!("syncing {} to {remote_dir}", entry.display());
            if let Err(err) = self.file_sync.sync_dir(&entry, &remote_dir).await {
                tracing::warn!("transfer of {name} failed, skipping this cycle: {err}");
                summary.transfer_failures += 1;
                continue;
            }
            let report = self.orchestrator.process(&remote_dir).await;
            summary.reports.push((name, report));
        }
        Ok(summary)
    }

    /// Read-only job states for every queued entry, without transferring anything.
    pub async fn status(&self) -> AppResult<Vec<(String, JobState)>> {
        let entries = self.local_fs.list_subdirs(&self.settings.queue_dir).await?;
        let mut states = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(name) = entry_name(&entry) else {
                continue;
            };
            let state = self.orchestrator.inspect(&self.remote_dir_for(&name)).await;
            states.push((name, state));
        }
        Ok(states)
    }

    /// Runs cycles until `shutdown` flips to `true` or its sender goes away.
    ///
    /// Each cycle runs on its own task so that a panic inside one job is logged and the loop
    /// keeps going after the usual sleep.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.settings.poll_interval.as_secs(),
            "queue daemon started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let daemon = Arc::clone(&self);
            match tokio::spawn(async move { daemon.run_cycle().await }).await {
                Ok(Ok(summary)) => tracing::info!(
                    entries = summary.entries,
                    processed = summary.reports.len(),
                    transfer_failures = summary.transfer_failures,
                    "cycle finished"
                ),
                Ok(Err(err)) => tracing::error!(code = err.code(), "cycle failed: {err}"),
                Err(err) if err.is_panic() => tracing::error!("cycle panicked: {err}"),
                Err(err) => tracing::error!("cycle task aborted: {err}"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("queue daemon stopped");
    }
}

fn entry_name(entry: &Path) -> Option<String> {
    entry
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ledger::InMemoryRetryLedger;
    use crate::app::orchestrator::{OrchestratorSettings, StageOutcome};
    use crate::app::test_support::{FakeMesh, FixedAdvisor, ScriptedQueue, ScriptedSession};
    use crate::app::types::{PatchSet, RELAXATION_MARKER};

    fn daemon(queue: Arc<ScriptedQueue>, session: Arc<ScriptedSession>) -> QueueDaemon {
        let orchestrator = StageOrchestrator::new(
            session.clone(),
            Arc::new(FixedAdvisor::new(PatchSet::new())),
            Arc::new(FakeMesh::new(session, true, true)),
            Arc::new(InMemoryRetryLedger::new()),
            OrchestratorSettings {
                settle_delay: Duration::ZERO,
                ..OrchestratorSettings::default()
            },
        );
        QueueDaemon::new(
            queue.clone(),
            queue,
            orchestrator,
            DaemonSettings {
                queue_dir: PathBuf::from("/queue"),
                remote_base_dir: "/scratch/jobs/".to_string(),
                poll_interval: Duration::from_millis(10),
            },
        )
    }

    #[tokio::test]
    async fn transfer_failure_skips_only_that_entry() {
        let queue = Arc::new(ScriptedQueue::new(&["Si", "GaAs", "MoS2"]).failing_transfer("GaAs"));
        let session = Arc::new(ScriptedSession::new().with_dir("/scratch/jobs/MoS2/relaxation"));
        let daemon = daemon(queue.clone(), session.clone());

        let summary = daemon.run_cycle().await.expect("cycle");

        assert_eq!(summary.entries, 3);
        assert_eq!(summary.transfer_failures, 1);
        let processed: Vec<&str> = summary
            .reports
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(processed, vec!["Si", "MoS2"]);
        assert_eq!(summary.reports[0].1.state, JobState::NotStarted);
        assert_eq!(summary.reports[1].1.state, JobState::RelaxationActive);
        assert_eq!(
            queue.transfers()[2],
            (PathBuf::from("/queue/MoS2"), "/scratch/jobs/MoS2".to_string())
        );
        assert!(
            session
                .commands()
                .iter()
                .all(|command| !command.contains("GaAs"))
        );
    }

    #[tokio::test]
    async fn unreadable_queue_fails_the_cycle() {
        let queue = Arc::new(ScriptedQueue::new(&[]).failing_listing());
        let daemon = daemon(queue, Arc::new(ScriptedSession::new()));

        let err = daemon.run_cycle().await.expect_err("listing fails");
        assert!(err.to_string().contains("queue unreadable"));
    }

    #[tokio::test]
    async fn status_reports_states_without_side_effects() {
        let queue = Arc::new(ScriptedQueue::new(&["Si"]));
        let session = Arc::new(ScriptedSession::new().with_file(
            "/scratch/jobs/Si/relaxation/OUTCAR",
            &format!("{RELAXATION_MARKER}\n"),
        ));
        let daemon = daemon(queue.clone(), session.clone());

        let states = daemon.status().await.expect("status");

        assert_eq!(states, vec![("Si".to_string(), JobState::StaticActive)]);
        assert!(queue.transfers().is_empty());
        assert!(
            session
                .commands()
                .iter()
                .all(|command| command.starts_with("grep -q -F"))
        );
    }

    #[tokio::test]
    async fn loop_survives_failed_cycles_and_stops_on_shutdown() {
        let queue = Arc::new(ScriptedQueue::new(&[]).failing_listing());
        let daemon = Arc::new(daemon(queue, Arc::new(ScriptedSession::new())));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(daemon.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        tx.send(true).expect("send shutdown");
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("daemon stops")
            .expect("daemon task");
    }

    #[tokio::test]
    async fn remediation_outcomes_surface_in_the_summary() {
        let queue = Arc::new(ScriptedQueue::new(&["Si"]));
        let session = Arc::new(
            ScriptedSession::new()
                .with_file("/scratch/jobs/Si/relaxation/run.log", "ZHEGV failed\n")
                .with_file("/scratch/jobs/Si/relaxation/INCAR", "ALGO = Fast\n"),
        );
        session.respond(
            "squeue",
            crate::app::types::CommandOutput::from_exit(
                "/scratch/jobs/Si/relaxation\n".to_string(),
                String::new(),
                0,
            ),
        );
        let daemon = daemon(queue, session);

        let summary = daemon.run_cycle().await.expect("cycle");

        assert_eq!(summary.reports[0].1.outcome, StageOutcome::NoFixAvailable);
    }
}
