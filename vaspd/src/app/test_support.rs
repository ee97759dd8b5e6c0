// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Scripted stand-ins for the remote ports, shared by the orchestrator and daemon tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::app::errors::{AppResult, remote_error};
use crate::app::ports::{
    FileSyncPort, LocalFilesystemPort, MeshGeneratorPort, RemediationAdvisorPort,
    RemoteSessionPort,
};
use crate::app::types::{CommandOutput, MeshTask, PatchSet};

/// In-memory remote filesystem that understands the handful of shell commands the
/// orchestrator issues (`grep -q -F`, `tail`, `cat`, `mkdir -p`, `cp`). Other commands are
/// answered from scripted prefix responses, falling back to success with empty output.
#[derive(Default)]
pub(crate) struct ScriptedSession {
    files: Mutex<HashMap<String, String>>,
    dirs: Mutex<Vec<String>>,
    responses: Mutex<Vec<(String, VecDeque<CommandOutput>)>>,
    commands: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(String, String)>>,
    fail_uploads: Mutex<bool>,
}

impl ScriptedSession {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_file(self, path: &str, contents: &str) -> Self {
        self.add_file(path, contents);
        self
    }

    pub(crate) fn with_dir(self, path: &str) -> Self {
        self.dirs.lock().expect("dirs lock").push(path.to_string());
        self
    }

    pub(crate) fn add_file(&self, path: &str, contents: &str) {
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_string(), contents.to_string());
    }

    /// Queues a response for the next command starting with `prefix`. The last queued
    /// response for a prefix is reused once the queue drains.
    pub(crate) fn respond(&self, prefix: &str, output: CommandOutput) {
        let mut responses = self.responses.lock().expect("responses lock");
        match responses.iter_mut().find(|(p, _)| p == prefix) {
            Some((_, queue)) => queue.push_back(output),
            None => responses.push((prefix.to_string(), VecDeque::from([output]))),
        }
    }

    pub(crate) fn fail_uploads(&self) {
        *self.fail_uploads.lock().expect("fail_uploads lock") = true;
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("commands lock").clone()
    }

    pub(crate) fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|command| command.starts_with(prefix))
            .collect()
    }

    pub(crate) fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().expect("uploads lock").clone()
    }

    pub(crate) fn file(&self, path: &str) -> Option<String> {
        self.files.lock().expect("files lock").get(path).cloned()
    }

    fn path_exists(&self, path: &str) -> bool {
        let path = path.trim_end_matches('/');
        if self.files.lock().expect("files lock").contains_key(path) {
            return true;
        }
        let dirs = self.dirs.lock().expect("dirs lock");
        if dirs.iter().any(|dir| dir == path) {
            return true;
        }
        // Any stored file implies its parent directories.
        let prefix = format!("{path}/");
        self.files
            .lock()
            .expect("files lock")
            .keys()
            .any(|file| file.starts_with(&prefix))
    }

    fn scripted(&self, command: &str) -> Option<CommandOutput> {
        let mut responses = self.responses.lock().expect("responses lock");
        let (_, queue) = responses
            .iter_mut()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn emulate(&self, command: &str) -> CommandOutput {
        let args = quoted_args(command);
        let ok = |stdout: String| CommandOutput::from_exit(stdout, String::new(), 0);
        let missing = |path: &str| {
            CommandOutput::from_exit(String::new(), format!("{path}: No such file or directory"), 1)
        };
        if command.starts_with("grep -q -F") {
            let (Some(marker), Some(path)) = (args.first(), args.get(1)) else {
                return missing("grep");
            };
            return match self.file(path) {
                Some(contents) if contents.contains(marker.as_str()) => ok(String::new()),
                Some(_) => CommandOutput::from_exit(String::new(), String::new(), 1),
                None => missing(path),
            };
        }
        if command.starts_with("tail -n") || command.starts_with("cat ") {
            let Some(path) = args.first() else {
                return missing("cat");
            };
            return match self.file(path) {
                Some(contents) => ok(contents),
                None => missing(path),
            };
        }
        if command.starts_with("mkdir -p") {
            if let Some(path) = args.first() {
                self.dirs.lock().expect("dirs lock").push(path.clone());
            }
            return ok(String::new());
        }
        if command.starts_with("cp ") {
            let (Some(from), Some(to)) = (args.first(), args.get(1)) else {
                return missing("cp");
            };
            return match self.file(from) {
                Some(contents) => {
                    self.add_file(to, &contents);
                    ok(String::new())
                }
                None => missing(from),
            };
        }
        if command.starts_with("mv -f ") {
            let (Some(from), Some(to)) = (args.first(), args.get(1)) else {
                return missing("mv");
            };
            let moved = self.files.lock().expect("files lock").remove(from);
            return match moved {
                Some(contents) => {
                    self.add_file(to, &contents);
                    ok(String::new())
                }
                None => missing(from),
            };
        }
        if command.contains("sbatch") {
            return ok("Submitted batch job 1001\n".to_string());
        }
        ok(String::new())
    }
}

/// Single-quoted arguments of a command built with `sh_escape`.
fn quoted_args(command: &str) -> Vec<String> {
    command
        .split('\'')
        .skip(1)
        .step_by(2)
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl RemoteSessionPort for ScriptedSession {
    async fn run(&self, command: &str) -> CommandOutput {
        self.commands
            .lock()
            .expect("commands lock")
            .push(command.to_string());
        match self.scripted(command) {
            Some(output) => output,
            None => self.emulate(command),
        }
    }

    async fn put_file(&self, local_path: &Path, remote_path: &str) -> bool {
        if *self.fail_uploads.lock().expect("fail_uploads lock") {
            return false;
        }
        let Ok(contents) = std::fs::read_to_string(local_path) else {
            return false;
        };
        self.add_file(remote_path, &contents);
        self.uploads
            .lock()
            .expect("uploads lock")
            .push((remote_path.to_string(), contents));
        true
    }

    async fn get_file(&self, remote_path: &str, local_path: &Path) -> bool {
        match self.file(remote_path) {
            Some(contents) => std::fs::write(local_path, contents).is_ok(),
            None => false,
        }
    }

    async fn exists(&self, remote_path: &str) -> bool {
        self.path_exists(remote_path)
    }
}

/// Advisor returning the same patch every time and counting calls.
#[derive(Default)]
pub(crate) struct FixedAdvisor {
    patch: PatchSet,
    calls: Mutex<Vec<(String, String, String)>>,
}

impl FixedAdvisor {
    pub(crate) fn new(patch: PatchSet) -> Self {
        Self {
            patch,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    pub(crate) fn last_call(&self) -> Option<(String, String, String)> {
        self.calls.lock().expect("calls lock").last().cloned()
    }
}

#[async_trait]
impl RemediationAdvisorPort for FixedAdvisor {
    async fn analyze(&self, run_log_tail: &str, output_tail: &str, incar: &str) -> PatchSet {
        self.calls.lock().expect("calls lock").push((
            run_log_tail.to_string(),
            output_tail.to_string(),
            incar.to_string(),
        ));
        self.patch.clone()
    }
}

/// Mesh generator that optionally writes KPOINTS into a [`ScriptedSession`].
pub(crate) struct FakeMesh {
    session: std::sync::Arc<ScriptedSession>,
    succeed: bool,
    write_file: bool,
    generated: Mutex<Vec<(String, MeshTask)>>,
    extracted: Mutex<Vec<String>>,
}

impl FakeMesh {
    pub(crate) fn new(
        session: std::sync::Arc<ScriptedSession>,
        succeed: bool,
        write_file: bool,
    ) -> Self {
        Self {
            session,
            succeed,
            write_file,
            generated: Mutex::new(Vec::new()),
            extracted: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn generated(&self) -> Vec<(String, MeshTask)> {
        self.generated.lock().expect("generated lock").clone()
    }

    pub(crate) fn extracted(&self) -> Vec<String> {
        self.extracted.lock().expect("extracted lock").clone()
    }
}

#[async_trait]
impl MeshGeneratorPort for FakeMesh {
    async fn generate(&self, stage_dir: &str, task: MeshTask) -> bool {
        self.generated
            .lock()
            .expect("generated lock")
            .push((stage_dir.to_string(), task));
        if self.write_file {
            self.session.add_file(
                &format!("{stage_dir}/KPOINTS"),
                "K-Path Generated by VASPKIT.\n",
            );
        }
        self.succeed
    }

    async fn extract_bands(&self, stage_dir: &str) -> bool {
        self.extracted
            .lock()
            .expect("extracted lock")
            .push(stage_dir.to_string());
        true
    }
}

/// Queue directory listing and transfer results scripted per entry name.
#[derive(Default)]
pub(crate) struct ScriptedQueue {
    entries: Vec<PathBuf>,
    failing_transfers: Vec<String>,
    list_error: bool,
    transfers: Mutex<Vec<(PathBuf, String)>>,
}

impl ScriptedQueue {
    pub(crate) fn new(entries: &[&str]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|name| PathBuf::from("/queue").join(name))
                .collect(),
            ..Self::default()
        }
    }

    pub(crate) fn failing_transfer(mut self, name: &str) -> Self {
        self.failing_transfers.push(name.to_string());
        self
    }

    pub(crate) fn failing_listing(mut self) -> Self {
        self.list_error = true;
        self
    }

    pub(crate) fn transfers(&self) -> Vec<(PathBuf, String)> {
        self.transfers.lock().expect("transfers lock").clone()
    }
}

#[async_trait]
impl LocalFilesystemPort for ScriptedQueue {
    async fn ensure_dir(&self, _path: &Path) -> AppResult<()> {
        Ok(())
    }

    async fn list_subdirs(&self, _path: &Path) -> AppResult<Vec<PathBuf>> {
        if self.list_error {
            return Err(crate::app::errors::local_error("queue unreadable"));
        }
        Ok(self.entries.clone())
    }
}

#[async_trait]
impl FileSyncPort for ScriptedQueue {
    async fn sync_dir(&self, local_dir: &Path, remote_dir: &str) -> AppResult<()> {
        self.transfers
            .lock()
            .expect("transfers lock")
            .push((local_dir.to_path_buf(), remote_dir.to_string()));
        let name = local_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failing_transfers.contains(&name) {
            return Err(remote_error(format!("transfer of {name} failed")));
        }
        Ok(())
    }
}
