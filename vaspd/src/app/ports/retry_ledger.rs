// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Remediation attempt counter keyed by stage directory.
/// Kept behind a trait so a durable store can replace the in-memory one.
pub trait RetryLedgerPort: Send + Sync {
    fn attempts(&self, stage_dir: &str) -> u32;

    /// Increments and returns the new count.
    fn record_attempt(&self, stage_dir: &str) -> u32;
}
