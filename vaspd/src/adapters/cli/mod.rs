// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{Args, CommandFactory, FromArgMatches, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "vaspd",
    version,
    about,
    long_about = None,
    after_help = "Drives queued VASP jobs through relaxation, static-scf and bands on a remote Slurm cluster.\n\
\n\
Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: default location < VASPD_CONFIG_PATH < --config.\n\
A missing default config file is OK; a missing explicit one is an error.\n\
Paths in the config file are resolved relative to the config file directory."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, vaspd uses VASPD_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Poll the queue and advance every job (default).
    Run(RunArgs),
    /// Connect through the bastion and run a trivial command on the cluster.
    Check,
    /// Print the stage reached by every queued job without touching anything.
    Status,
    /// Download one file from a job's remote directory.
    Fetch(FetchArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    #[arg(
        long,
        value_name = "PATH",
        help = "Local queue of job directories. Overrides `queue_dir` from the config file."
    )]
    pub queue_dir: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Remote parent directory for job copies. Overrides `remote_base_dir` from the config file."
    )]
    pub remote_base_dir: Option<String>,
    #[arg(
        long,
        value_name = "SECS",
        help = "Sleep between cycles. Overrides `poll_interval_secs` from the config file."
    )]
    pub poll_interval_secs: Option<u64>,
    #[arg(long, help = "Run a single cycle and exit.")]
    pub once: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Queue entry name.
    pub job: String,
    /// Path inside the job's remote directory, e.g. bands/BAND.dat.
    pub relative_path: String,
    /// Where to write the file locally.
    pub local_path: PathBuf,
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

impl Opts {
    /// Subcommand to execute; a bare `vaspd` runs the daemon.
    pub fn action(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Run(RunArgs::default()))
    }
}

const HELP_TEMPLATE: &str = r#"vaspd: VASP stage manager

{before-help}{about-with-newline}{usage-heading} {usage}
{after-help}

{all-args}
"#;

fn apply_help_template_recursively(cmd: &mut clap::Command) {
    let mut owned = std::mem::take(cmd);
    owned = owned.help_template(HELP_TEMPLATE);
    for sub in owned.get_subcommands_mut() {
        apply_help_template_recursively(sub);
    }
    *cmd = owned;
}

pub fn cli_command() -> clap::Command {
    let mut cmd = Opts::command();
    apply_help_template_recursively(&mut cmd);
    cmd
}

pub fn parse_opts() -> ParsedOpts {
    let cmd = cli_command();
    let matches = cmd.get_matches();
    let verbose_override = if matches.get_flag("verbose") {
        Some(true)
    } else {
        None
    };
    let opts = Opts::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    ParsedOpts {
        opts,
        verbose_override,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Opts {
        let matches = cli_command().try_get_matches_from(args).expect("parse");
        Opts::from_arg_matches(&matches).expect("opts")
    }

    #[test]
    fn bare_invocation_runs_the_daemon() {
        let opts = parse(&["vaspd"]);
        match opts.action() {
            Command::Run(args) => {
                assert!(!args.once);
                assert!(args.queue_dir.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn run_flags_are_parsed() {
        let opts = parse(&[
            "vaspd",
            "run",
            "--queue-dir",
            "/tmp/queue",
            "--remote-base-dir",
            "/scratch/me",
            "--poll-interval-secs",
            "5",
            "--once",
        ]);
        match opts.action() {
            Command::Run(args) => {
                assert_eq!(args.queue_dir, Some(PathBuf::from("/tmp/queue")));
                assert_eq!(args.remote_base_dir.as_deref(), Some("/scratch/me"));
                assert_eq!(args.poll_interval_secs, Some(5));
                assert!(args.once);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let opts = parse(&["vaspd", "status", "--config", "/etc/vaspd.toml", "-v"]);
        assert!(matches!(opts.action(), Command::Status));
        assert_eq!(opts.config, Some(PathBuf::from("/etc/vaspd.toml")));
        assert!(opts.verbose);
    }

    #[test]
    fn fetch_takes_three_positionals() {
        let opts = parse(&["vaspd", "fetch", "Si", "bands/BAND.dat", "out/BAND.dat"]);
        match opts.action() {
            Command::Fetch(args) => {
                assert_eq!(args.job, "Si");
                assert_eq!(args.relative_path, "bands/BAND.dat");
                assert_eq!(args.local_path, PathBuf::from("out/BAND.dat"));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(
            cli_command()
                .try_get_matches_from(["vaspd", "fetch", "Si"])
                .is_err()
        );
    }
}
