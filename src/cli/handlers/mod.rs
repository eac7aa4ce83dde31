use std::{
    io::{self, Write},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap_complete::Shell;
use tokio::net::TcpListener;

use crate::{
    cli::{CompletionsArgs, ServeArgs, WorkerArgs},
    config,
    health::HealthChecker,
    http::{self, ApiClient, AppState, WorkerSummary},
    logging::EventLogger,
    runner::Supervisor,
    signals::{self, ShutdownSignals},
};

pub async fn serve(args: ServeArgs) -> Result<()> {
    let config = config::load_or_default(args.config.as_deref())?;

    let supervisor = Arc::new(Supervisor::new(&config, EventLogger::stdio()));
    supervisor.spawn_background_tasks();
    let health = HealthChecker::new(&config.health, config.supervisor.probe_host.clone())?;

    let address = config.dashboard.address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding control plane on {address}"))?;
    let local = listener.local_addr().context("reading control plane address")?;
    tracing::info!(address = %local, workers = config.workers.len(), "control plane listening");

    // Signals arriving while workers autostart are queued until serve awaits them.
    let shutdown = ShutdownSignals::install().context("installing shutdown signal handlers")?;
    supervisor.start_autostart().await;

    let served = http::serve(
        listener,
        AppState::new(Arc::clone(&supervisor), health),
        signals::shutdown_requested(shutdown),
    )
    .await;

    tracing::info!("stopping all workers before exit");
    supervisor.shutdown().await;
    tracing::info!("all workers stopped");
    served
}

pub async fn status(url: &str) -> Result<()> {
    let client = ApiClient::new(url)?;
    let statuses = client.status().await?;
    if statuses.is_empty() {
        println!("no workers configured");
    }
    for (index, status) in statuses.iter().enumerate() {
        println!("{:>3}. {status}", index + 1);
    }
    Ok(())
}

pub async fn workers(url: &str) -> Result<()> {
    let client = ApiClient::new(url)?;
    let workers = client.workers().await?;
    write_workers(io::stdout().lock(), &workers).context("writing worker table")?;
    Ok(())
}

pub async fn toggle(url: &str, args: WorkerArgs) -> Result<()> {
    let client = ApiClient::new(url)?;
    if !client.toggle(args.id).await? {
        bail!("unknown worker {}", args.id);
    }
    println!("toggled worker {}", args.id);
    Ok(())
}

pub async fn restart(url: &str, args: WorkerArgs) -> Result<()> {
    let client = ApiClient::new(url)?;
    if !client.restart(args.id).await? {
        bail!("unknown worker {}", args.id);
    }
    println!("restarted worker {}", args.id);
    Ok(())
}

pub async fn toggle_all(url: &str) -> Result<()> {
    let client = ApiClient::new(url)?;
    let action = client.toggle_all().await?;
    println!("all workers {action}");
    Ok(())
}

pub async fn stop_all(url: &str) -> Result<()> {
    let client = ApiClient::new(url)?;
    client.stop_all().await?;
    println!("all workers stopped");
    Ok(())
}

pub fn completions(args: CompletionsArgs) -> Result<()> {
    use clap::CommandFactory;
    let mut cmd = crate::cli::Cli::command();
    let shell: Shell = args.shell;
    clap_complete::generate(shell, &mut cmd, "portvisor", &mut io::stdout());
    Ok(())
}

fn write_workers<W: Write>(mut writer: W, workers: &[WorkerSummary]) -> io::Result<()> {
    if workers.is_empty() {
        writeln!(writer, "no workers configured")?;
        return Ok(());
    }

    writeln!(
        writer,
        "{:<6} {:<6} {:<8} {:<8} {:<12} {:<9} {}",
        "WORKER", "PORT", "PID", "DESIRED", "HEALTH", "RESTARTS", "LAST EXIT"
    )?;
    for worker in workers {
        let pid = worker
            .pid
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "-".to_string());
        let restarts = if worker.needs_manual_start {
            format!("{}!", worker.restart_attempts)
        } else {
            worker.restart_attempts.to_string()
        };
        writeln!(
            writer,
            "{:<6} {:<6} {:<8} {:<8} {:<12} {:<9} {}",
            format!("W{}", worker.id),
            worker.port,
            pid,
            if worker.desired { "yes" } else { "no" },
            worker.health,
            restarts,
            describe_exit(worker)
        )?;
    }

    if workers.iter().any(|worker| worker.needs_manual_start) {
        writeln!(writer)?;
        writeln!(
            writer,
            "! restart ceiling reached; start the worker manually to resume supervision"
        )?;
    }
    Ok(())
}

fn describe_exit(worker: &WorkerSummary) -> String {
    let Some(exit) = &worker.last_exit else {
        return "-".to_string();
    };
    let status = match (exit.code, exit.signal) {
        (Some(code), _) => format!("code {code}"),
        (None, Some(signal)) => format!("signal {signal}"),
        (None, None) => "unknown".to_string(),
    };
    match &exit.at {
        Some(at) => format!("{status} at {at}"),
        None => status,
    }
}
