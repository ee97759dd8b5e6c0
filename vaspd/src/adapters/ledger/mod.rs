// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Mutex;

use crate::app::ports::RetryLedgerPort;

/// Retry counts held only in process memory. A restart forgets every count.
#[derive(Debug, Default)]
pub struct InMemoryRetryLedger {
    counts: Mutex<HashMap<String, u32>>,
}

impl InMemoryRetryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RetryLedgerPort for InMemoryRetryLedger {
    fn attempts(&self, stage_dir: &str) -> u32 {
        let counts = self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        counts.get(stage_dir).copied().unwrap_or(0)
    }

    fn record_attempt(&self, stage_dir: &str) -> u32 {
        let mut counts = self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = counts.entry(stage_dir.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}
