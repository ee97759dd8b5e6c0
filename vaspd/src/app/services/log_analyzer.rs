// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Classification of a run-log tail into continue / algorithm error / slow convergence.
//!
//! Only the tail is inspected, so whatever is visible is treated as the current state of the run.
//! Error signatures always win over the step-count heuristic.

use crate::app::types::{LogAction, LogStatus};

/// Electronic steps above this count are reported as slow convergence.
pub const SLOW_CONVERGENCE_THRESHOLD: usize = 60;

const ITERATION_PREFIXES: [&str; 2] = ["DAV:", "RMM:"];

struct Signature {
    marker: &'static str,
    message: &'static str,
}

const ALGORITHM_SIGNATURES: [Signature; 2] = [
    Signature {
        marker: "ZHEGV",
        message: "ZHEGV: diagonalization failed, try ALGO = Normal",
    },
    Signature {
        marker: "EDDDAV",
        message: "EDDDAV: subspace gradient error in the Davidson solver",
    },
];

pub fn classify(log_tail: &str) -> LogStatus {
    if log_tail.is_empty() {
        return LogStatus {
            action: LogAction::Continue,
            message: None,
            step_count: 0,
        };
    }

    if let Some(signature) = ALGORITHM_SIGNATURES
        .iter()
        .find(|signature| log_tail.contains(signature.marker))
    {
        return LogStatus {
            action: LogAction::AlgorithmError,
            message: Some(signature.message.to_string()),
            step_count: 0,
        };
    }

    let step_count = count_iteration_records(log_tail);
    if step_count > SLOW_CONVERGENCE_THRESHOLD {
        return LogStatus {
            action: LogAction::SlowConvergence,
            message: Some(format!(
                "slow convergence: {step_count} electronic steps (limit {SLOW_CONVERGENCE_THRESHOLD})"
            )),
            step_count,
        };
    }

    LogStatus {
        action: LogAction::Continue,
        message: None,
        step_count,
    }
}

fn count_iteration_records(log_tail: &str) -> usize {
    log_tail
        .lines()
        .filter(|line| ITERATION_PREFIXES.iter().any(|prefix| line.contains(prefix)))
        .count()
}
