// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::services::shell::sh_escape;
use crate::app::types::RunningMatch;

pub const JOB_SCRIPT_NAME: &str = "job.sh";

/// Working directories of every job the connected user has in the queue.
pub const LIST_ACTIVE_DIRS_CMD: &str = "squeue -u $USER -h -o %Z";

pub fn submit_command(stage_dir: &str) -> String {
    format!("cd {} && sbatch {JOB_SCRIPT_NAME}", sh_escape(stage_dir))
}

pub fn parse_job_id(line: &str) -> Option<i64> {
    // Expect message from sbatch like: "Submitted batch job 11"
    let marker = "job ";
    let idx = line.find(marker)?;
    let after_job = &line[idx + marker.len()..];
    after_job.trim().parse::<i64>().ok()
}

/// Decides whether `stage_dir` is among the directories listed by `squeue -o %Z`.
///
/// `Substring` keeps the loose containment test, which also fires for any directory whose path
/// merely contains `stage_dir` (e.g. `/jobs/Si/bands` inside `/jobs/Si/bands-old`).
pub fn is_stage_running(squeue_output: &str, stage_dir: &str, mode: RunningMatch) -> bool {
    match mode {
        RunningMatch::Substring => squeue_output.contains(stage_dir),
        RunningMatch::Exact => {
            let wanted = stage_dir.trim_end_matches('/');
            squeue_output
                .lines()
                .map(|line| line.trim().trim_end_matches('/'))
                .any(|dir| !dir.is_empty() && dir == wanted)
        }
    }
}
