// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use adapters::advisor::{GeminiAdvisor, GeminiSettings, NoopAdvisor};
use adapters::cli::{Command, FetchArgs, RunArgs};
use adapters::ssh::SshAdapter;
use app::daemon::{DaemonSettings, QueueDaemon};
use app::orchestrator::{OrchestratorSettings, StageOrchestrator};
use app::ports::{RemediationAdvisorPort, RemoteSessionPort};

mod adapters;
mod app;
mod config;
mod logging;

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => {
            tracing::info!(
                "config path: {} (source={}, present={})",
                path.display(),
                source.as_str(),
                report.config_file_present
            );
        }
        (Some(path), None) => {
            tracing::info!(
                "config path: {} (present={})",
                path.display(),
                report.config_file_present
            );
        }
        (None, _) => {
            tracing::info!("config path: (none)");
        }
    }
    tracing::info!(
        "config queue_dir: {} (source={})",
        report.queue_dir.value.display(),
        report.queue_dir.source.as_str()
    );
    tracing::info!(
        "config remote_base_dir: {} (source={})",
        report.remote_base_dir.value,
        report.remote_base_dir.source.as_str()
    );
    tracing::info!(
        "config poll_interval_secs: {} (source={})",
        report.poll_interval_secs.value,
        report.poll_interval_secs.source.as_str()
    );
    tracing::info!(
        "config max_retries: {} (source={})",
        report.max_retries.value,
        report.max_retries.source.as_str()
    );
    tracing::info!(
        "config running_match: {:?} (source={})",
        report.running_match.value,
        report.running_match.source.as_str()
    );
    tracing::info!(
        "config verbose: {} (source={})",
        report.verbose.value,
        report.verbose.source.as_str()
    );
    tracing::info!(
        "config ssh user: {} (source={})",
        report.ssh_user.value,
        report.ssh_user.source.as_str()
    );
}

fn build_advisor(config: &config::AdvisorConfig) -> anyhow::Result<Arc<dyn RemediationAdvisorPort>> {
    if !config.enabled {
        tracing::info!("remediation advisor disabled by configuration");
        return Ok(Arc::new(NoopAdvisor));
    }
    let api_key = std::env::var(&config.api_key_env)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let Some(api_key) = api_key else {
        tracing::warn!(
            "{} is not set; failed calculations will not be remediated automatically",
            config.api_key_env
        );
        return Ok(Arc::new(NoopAdvisor));
    };
    let advisor = GeminiAdvisor::new(GeminiSettings {
        model: config.model.clone(),
        endpoint: config.endpoint.clone(),
        api_key,
        timeout: Duration::from_secs(config.timeout_secs),
    })?;
    tracing::info!(model = %config.model, "remediation advisor ready");
    Ok(Arc::new(advisor))
}

fn build_daemon(config: &config::Config, ssh: &SshAdapter) -> anyhow::Result<QueueDaemon> {
    let session: Arc<dyn RemoteSessionPort> = Arc::new(ssh.clone());
    let advisor = build_advisor(&config.advisor)?;
    let mesh = Arc::new(adapters::mesh::VaspkitMeshGenerator::new(
        session.clone(),
        config.vaspkit_executable.clone(),
    ));
    let ledger = Arc::new(adapters::ledger::InMemoryRetryLedger::new());
    let orchestrator = StageOrchestrator::new(
        session,
        advisor,
        mesh,
        ledger,
        OrchestratorSettings {
            settle_delay: Duration::from_secs(config.settle_delay_secs),
            max_retries: config.max_retries,
            log_tail_lines: config.log_tail_lines,
            running_match: config.running_match,
            markers: config.markers.clone(),
            mesh_task: config.mesh_task,
        },
    );
    Ok(QueueDaemon::new(
        Arc::new(adapters::fs::LocalFilesystem::new()),
        Arc::new(ssh.clone()),
        orchestrator,
        DaemonSettings {
            queue_dir: config.queue_dir.clone(),
            remote_base_dir: config.remote_base_dir.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        },
    ))
}

async fn connect(config: &config::Config) -> anyhow::Result<SshAdapter> {
    tracing::info!(
        "connecting to {}@{} via {}",
        config.ssh.username,
        config.ssh.host,
        config.ssh.bastion
    );
    Ok(SshAdapter::connect(config.ssh.clone()).await?)
}

async fn run_daemon(config: &config::Config, ssh: &SshAdapter, args: &RunArgs) -> anyhow::Result<()> {
    let daemon = build_daemon(config, ssh)?;
    daemon.prepare().await?;
    if args.once {
        let summary = daemon.run_cycle().await?;
        for (job, report) in &summary.reports {
            tracing::info!(job = %job, state = %report.state, "{:?}", report.outcome);
        }
        if summary.transfer_failures > 0 {
            tracing::warn!(failures = summary.transfer_failures, "some queue entries were not transferred");
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("interrupt received, stopping after the current cycle"),
            Err(err) => tracing::error!("cannot listen for ctrl-c: {err}"),
        }
        let _ = shutdown_tx.send(true);
    });
    Arc::new(daemon).run(shutdown_rx).await;
    Ok(())
}

async fn check(ssh: &SshAdapter) -> bool {
    let output = ssh.run("echo ok").await;
    output.ok && output.stdout.trim() == "ok" && ssh.is_connected().await
}

async fn status(config: &config::Config, ssh: &SshAdapter) -> anyhow::Result<()> {
    let daemon = build_daemon(config, ssh)?;
    for (job, state) in daemon.status().await? {
        println!("{job}\t{state}");
    }
    Ok(())
}

async fn fetch(config: &config::Config, ssh: &SshAdapter, args: &FetchArgs) -> anyhow::Result<()> {
    let remote_path = app::services::shell::job_file_path(
        &config.remote_base_dir,
        &args.job,
        &args.relative_path,
    )?;
    if !ssh.get_file(&remote_path, &args.local_path).await {
        anyhow::bail!(
            "failed to download {remote_path} to {}",
            args.local_path.display()
        );
    }
    println!("{remote_path} -> {}", args.local_path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = adapters::cli::parse_opts();
    let opts = parsed.opts;
    let command = opts.action();
    let run_args = match &command {
        Command::Run(args) => args.clone(),
        _ => RunArgs::default(),
    };
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            queue_dir: run_args.queue_dir.clone(),
            remote_base_dir: run_args.remote_base_dir.clone(),
            poll_interval_secs: run_args.poll_interval_secs,
            verbose: parsed.verbose_override,
        },
    )?;
    logging::init(config.verbose);
    log_config_report(&report);

    if let Command::Fetch(args) = &command {
        // Fail on a bad path before paying for the two-hop connection.
        app::services::shell::job_file_path(&config.remote_base_dir, &args.job, &args.relative_path)?;
    }

    let ssh = match (&command, connect(&config).await) {
        (_, Ok(ssh)) => ssh,
        (Command::Check, Err(err)) => {
            tracing::error!(code = err_code(&err), "{err:#}");
            println!("FAILED");
            std::process::exit(1);
        }
        (_, Err(err)) => return Err(err),
    };

    let result = match &command {
        Command::Run(args) => run_daemon(&config, &ssh, args).await,
        Command::Check => {
            let healthy = check(&ssh).await;
            ssh.shutdown().await;
            if healthy {
                println!("OK");
                return Ok(());
            }
            println!("FAILED");
            std::process::exit(1);
        }
        Command::Status => status(&config, &ssh).await,
        Command::Fetch(args) => fetch(&config, &ssh, args).await,
    };
    ssh.shutdown().await;
    result
}

fn err_code(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<app::errors::AppError>()
        .map(|err| err.code())
        .unwrap_or(app::errors::codes::INTERNAL_ERROR)
}
