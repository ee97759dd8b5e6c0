// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::app::types::{MeshTask, RunningMatch, SshConfig, StageMarkers};

const APP_DIR_NAME: &str = "vaspd";
const CONFIG_FILE_NAME: &str = "vaspd.toml";
const CONFIG_ENV_VAR: &str = "VASPD_CONFIG_PATH";

const DEFAULT_QUEUE_DIR: &str = "/opt/manager-vasp/queue";
const DEFAULT_REMOTE_BASE_DIR: &str = "/scratch/user/vasp_jobs";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_SETTLE_DELAY_SECS: u64 = 5;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_LOG_TAIL_LINES: usize = 100;

const DEFAULT_SSH_HOST: &str = "huk";
const DEFAULT_BASTION: &str = "bastiao";
const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_IDENTITY_PATH: &str = "~/.ssh/id_ed25519";
const DEFAULT_KEEPALIVE_SECS: u64 = 30;

const DEFAULT_ADVISOR_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_ADVISOR_KEY_ENV: &str = "GOOGLE_API_KEY";
const DEFAULT_ADVISOR_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_ADVISOR_TIMEOUT_SECS: u64 = 120;

const DEFAULT_VASPKIT: &str = "~/vaspkit.1.5.1/bin/vaspkit";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    queue_dir: Option<String>,
    remote_base_dir: Option<String>,
    poll_interval_secs: Option<u64>,
    settle_delay_secs: Option<u64>,
    max_retries: Option<u32>,
    log_tail_lines: Option<usize>,
    running_match: Option<RunningMatch>,
    verbose: Option<bool>,
    #[serde(default)]
    ssh: FileSshConfig,
    #[serde(default)]
    advisor: FileAdvisorConfig,
    #[serde(default)]
    vaspkit: FileVaspkitConfig,
    #[serde(default)]
    markers: FileMarkers,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSshConfig {
    host: Option<String>,
    port: Option<u16>,
    bastion: Option<String>,
    bastion_port: Option<u16>,
    user: Option<String>,
    identity_path: Option<String>,
    known_hosts_path: Option<String>,
    keepalive_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileAdvisorConfig {
    enabled: Option<bool>,
    model: Option<String>,
    api_key_env: Option<String>,
    endpoint: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileVaspkitConfig {
    executable: Option<String>,
    kpath: Option<KPathKind>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
enum KPathKind {
    #[serde(rename = "3d")]
    ThreeD,
    #[serde(rename = "2d")]
    TwoD,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileMarkers {
    relaxation: Option<String>,
    #[serde(rename = "static")]
    static_scf: Option<String>,
    bands: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    pub enabled: bool,
    pub model: String,
    /// Name of the environment variable holding the API key, never the key itself.
    pub api_key_env: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

#[derive(Debug)]
pub struct Config {
    pub queue_dir: PathBuf,
    pub remote_base_dir: String,
    pub poll_interval_secs: u64,
    pub settle_delay_secs: u64,
    pub max_retries: u32,
    pub log_tail_lines: usize,
    pub running_match: RunningMatch,
    pub verbose: bool,
    pub ssh: SshConfig,
    pub advisor: AdvisorConfig,
    pub vaspkit_executable: String,
    pub mesh_task: MeshTask,
    pub markers: StageMarkers,
    #[allow(dead_code)]
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub queue_dir: ConfigValue<PathBuf>,
    pub remote_base_dir: ConfigValue<String>,
    pub poll_interval_secs: ConfigValue<u64>,
    pub max_retries: ConfigValue<u32>,
    pub running_match: ConfigValue<RunningMatch>,
    pub verbose: ConfigValue<bool>,
    pub ssh_user: ConfigValue<String>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub queue_dir: Option<PathBuf>,
    pub remote_base_dir: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub verbose: Option<bool>,
}

#[allow(dead_code)]
pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());

    let (queue_dir, queue_dir_source) = match overrides.queue_dir {
        Some(path) => (expand_path(path), ConfigSource::Override),
        None => match file_config.queue_dir {
            Some(raw) => (resolve_path(&raw, base_dir), ConfigSource::ConfigFile),
            None => (PathBuf::from(DEFAULT_QUEUE_DIR), ConfigSource::Default),
        },
    };

    let (remote_base_dir, remote_base_dir_source) = pick(
        overrides.remote_base_dir,
        file_config.remote_base_dir,
        || DEFAULT_REMOTE_BASE_DIR.to_string(),
    );
    let remote_base_dir = remote_base_dir.trim_end_matches('/').to_string();
    if remote_base_dir.is_empty() {
        anyhow::bail!("remote_base_dir must not be empty or the remote root");
    }

    let (poll_interval_secs, poll_interval_source) = pick(
        overrides.poll_interval_secs,
        file_config.poll_interval_secs,
        || DEFAULT_POLL_INTERVAL_SECS,
    );
    if poll_interval_secs == 0 {
        anyhow::bail!("poll_interval_secs must be at least 1");
    }

    let (max_retries, max_retries_source) =
        pick(None, file_config.max_retries, || DEFAULT_MAX_RETRIES);
    let (running_match, running_match_source) =
        pick(None, file_config.running_match, RunningMatch::default);
    let (verbose, verbose_source) = pick(overrides.verbose, file_config.verbose, || false);

    let settle_delay_secs = file_config
        .settle_delay_secs
        .unwrap_or(DEFAULT_SETTLE_DELAY_SECS);
    let log_tail_lines = file_config.log_tail_lines.unwrap_or(DEFAULT_LOG_TAIL_LINES);
    if log_tail_lines == 0 {
        anyhow::bail!("log_tail_lines must be at least 1");
    }

    let file_ssh = file_config.ssh;
    let (username, username_source) = match file_ssh.user {
        Some(user) => (user, ConfigSource::ConfigFile),
        None => (
            ssh_user_from_env().context(
                "no ssh user configured; set [ssh] user in the config file or export SSH_USER",
            )?,
            ConfigSource::Env,
        ),
    };
    let ssh = SshConfig {
        host: file_ssh.host.unwrap_or_else(|| DEFAULT_SSH_HOST.to_string()),
        port: file_ssh.port.unwrap_or(DEFAULT_SSH_PORT),
        bastion: file_ssh
            .bastion
            .unwrap_or_else(|| DEFAULT_BASTION.to_string()),
        bastion_port: file_ssh.bastion_port.unwrap_or(DEFAULT_SSH_PORT),
        username,
        identity_path: resolve_path(
            file_ssh
                .identity_path
                .as_deref()
                .unwrap_or(DEFAULT_IDENTITY_PATH),
            base_dir,
        ),
        known_hosts_path: file_ssh
            .known_hosts_path
            .as_deref()
            .map(|raw| resolve_path(raw, base_dir)),
        keepalive_secs: file_ssh.keepalive_secs.unwrap_or(DEFAULT_KEEPALIVE_SECS),
    };

    let file_advisor = file_config.advisor;
    let advisor = AdvisorConfig {
        enabled: file_advisor.enabled.unwrap_or(true),
        model: file_advisor
            .model
            .unwrap_or_else(|| DEFAULT_ADVISOR_MODEL.to_string()),
        api_key_env: file_advisor
            .api_key_env
            .unwrap_or_else(|| DEFAULT_ADVISOR_KEY_ENV.to_string()),
        endpoint: file_advisor
            .endpoint
            .unwrap_or_else(|| DEFAULT_ADVISOR_ENDPOINT.to_string()),
        timeout_secs: file_advisor
            .timeout_secs
            .unwrap_or(DEFAULT_ADVISOR_TIMEOUT_SECS),
    };

    let vaspkit_executable = file_config
        .vaspkit
        .executable
        .unwrap_or_else(|| DEFAULT_VASPKIT.to_string());
    let mesh_task = match file_config.vaspkit.kpath {
        Some(KPathKind::TwoD) => MeshTask::KPath2D,
        Some(KPathKind::ThreeD) | None => MeshTask::KPath3D,
    };

    let defaults = StageMarkers::default();
    let markers = StageMarkers {
        relaxation: file_config.markers.relaxation.unwrap_or(defaults.relaxation),
        static_scf: file_config.markers.static_scf.unwrap_or(defaults.static_scf),
        bands: file_config.markers.bands.unwrap_or(defaults.bands),
    };

    let config = Config {
        queue_dir,
        remote_base_dir,
        poll_interval_secs,
        settle_delay_secs,
        max_retries,
        log_tail_lines,
        running_match,
        verbose,
        ssh,
        advisor,
        vaspkit_executable,
        mesh_task,
        markers,
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        queue_dir: ConfigValue {
            value: config.queue_dir.clone(),
            source: queue_dir_source,
        },
        remote_base_dir: ConfigValue {
            value: config.remote_base_dir.clone(),
            source: remote_base_dir_source,
        },
        poll_interval_secs: ConfigValue {
            value: config.poll_interval_secs,
            source: poll_interval_source,
        },
        max_retries: ConfigValue {
            value: config.max_retries,
            source: max_retries_source,
        },
        running_match: ConfigValue {
            value: config.running_match,
            source: running_match_source,
        },
        verbose: ConfigValue {
            value: config.verbose,
            source: verbose_source,
        },
        ssh_user: ConfigValue {
            value: config.ssh.username.clone(),
            source: username_source,
        },
    };

    Ok(LoadResult { config, report })
}

/// Flag, then file, then default.
fn pick<T>(flag: Option<T>, file: Option<T>, default: impl FnOnce() -> T) -> (T, ConfigSource) {
    match flag {
        Some(value) => (value, ConfigSource::Override),
        None => match file {
            Some(value) => (value, ConfigSource::ConfigFile),
            None => (default(), ConfigSource::Default),
        },
    }
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn ssh_user_from_env() -> Option<String> {
    non_empty_env("SSH_USER").or_else(|| non_empty_env("USER"))
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}
