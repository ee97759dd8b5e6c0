// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

/// Connection parameters for the two-hop route: user -> bastion -> target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    /// Target host, resolved by the bastion.
    pub host: String,
    pub port: u16,
    /// Jump host, resolved locally.
    pub bastion: String,
    pub bastion_port: u16,
    pub username: String,
    pub identity_path: PathBuf,
    pub known_hosts_path: Option<PathBuf>,
    pub keepalive_secs: u64,
}

/// Outcome of one remote command. Transport failures are folded into `ok = false`
/// with the error text in `stderr` and no exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn from_exit(stdout: String, stderr: String, exit_code: i32) -> Self {
        Self {
            ok: exit_code == 0,
            stdout,
            stderr,
            exit_code: Some(exit_code),
        }
    }

    pub fn transport_failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            stdout: String::new(),
            stderr: error.into(),
            exit_code: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Relaxation,
    Static,
    Bands,
}

impl Stage {
    /// Subdirectory of a job tree holding this stage.
    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::Relaxation => "relaxation",
            Stage::Static => "static-scf",
            Stage::Bands => "bands",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Relaxation => "RELAXATION",
            Stage::Static => "STATIC",
            Stage::Bands => "BANDS",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a job tree in the stage sequence, recomputed from remote files on every pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NotStarted,
    RelaxationActive,
    StaticActive,
    BandsActive,
    Complete,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::NotStarted => "NOT_STARTED",
            JobState::RelaxationActive => "RELAXATION_ACTIVE",
            JobState::StaticActive => "STATIC_ACTIVE",
            JobState::BandsActive => "BANDS_ACTIVE",
            JobState::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage completion markers searched for in each stage's OUTCAR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageMarkers {
    pub relaxation: String,
    pub static_scf: String,
    pub bands: String,
}

pub const RELAXATION_MARKER: &str = "reached required accuracy";
pub const TIMING_MARKER: &str = "General timing and accounting informations for this job";

impl Default for StageMarkers {
    fn default() -> Self {
        Self {
            relaxation: RELAXATION_MARKER.to_string(),
            static_scf: TIMING_MARKER.to_string(),
            bands: TIMING_MARKER.to_string(),
        }
    }
}

impl StageMarkers {
    pub fn for_stage(&self, stage: Stage) -> &str {
        match stage {
            Stage::Relaxation => &self.relaxation,
            Stage::Static => &self.static_scf,
            Stage::Bands => &self.bands,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogAction {
    Continue,
    AlgorithmError,
    SlowConvergence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogStatus {
    pub action: LogAction,
    pub message: Option<String>,
    pub step_count: usize,
}

impl LogStatus {
    pub fn is_failure(&self) -> bool {
        self.action != LogAction::Continue
    }
}

/// Value of a single INCAR tag proposed by the advisor.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for PatchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchValue::Text(value) => f.write_str(value),
            PatchValue::Integer(value) => write!(f, "{value}"),
            PatchValue::Float(value) => write!(f, "{value}"),
            PatchValue::Bool(true) => f.write_str(".TRUE."),
            PatchValue::Bool(false) => f.write_str(".FALSE."),
        }
    }
}

/// Ordered INCAR tag -> value mapping. Inserting an existing tag replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchSet {
    entries: Vec<(String, PatchValue)>,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: impl Into<String>, value: PatchValue) {
        let tag = tag.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == tag) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((tag, value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PatchValue)> {
        self.entries
            .iter()
            .map(|(tag, value)| (tag.as_str(), value))
    }
}

impl fmt::Display for PatchSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (tag, value) in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{tag} = {value}")?;
        }
        Ok(())
    }
}

/// vaspkit task used to produce a band-structure k-path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshTask {
    KPath3D,
    KPath2D,
}

impl MeshTask {
    pub fn code(self) -> &'static str {
        match self {
            MeshTask::KPath3D => "303",
            MeshTask::KPath2D => "302",
        }
    }
}

/// How a stage directory is matched against the scheduler's list of active job directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunningMatch {
    /// Whole-line comparison, ignoring trailing slashes.
    #[default]
    Exact,
    /// Any occurrence of the stage path inside the scheduler output.
    Substring,
}
