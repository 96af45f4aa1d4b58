//! Autopilot - adaptive maintenance task scheduler
//!
//! `--start` runs the scheduler with its control API in the foreground.
//! Every other flag talks to that API, or to an in-process scheduler when
//! none is running.

use anyhow::Result;
use autopilot_lib::SchedulerError;
use clap::{ArgGroup, Parser};
use output::OutputFormat;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod client;
mod config;
mod output;
mod runtime;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Adaptive maintenance task scheduler
#[derive(Parser)]
#[command(name = "autopilot")]
#[command(author, version, about = "Adaptive maintenance task scheduler", long_about = None)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["start", "stop", "status", "enable", "disable", "execute"])
))]
pub struct Cli {
    /// Start the scheduler and block until interrupted
    #[arg(long)]
    pub start: bool,

    /// Stop a running scheduler
    #[arg(long)]
    pub stop: bool,

    /// Print task and scheduler status
    #[arg(long)]
    pub status: bool,

    /// Enable a task by name
    #[arg(long, value_name = "NAME")]
    pub enable: Option<String>,

    /// Disable a task by name
    #[arg(long, value_name = "NAME")]
    pub disable: Option<String>,

    /// Run one task immediately and print its result
    #[arg(long, value_name = "NAME")]
    pub execute: Option<String>,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, env = "AUTOPILOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: OutputFormat,

    /// Control API address, overriding the configured one
    #[arg(long, value_name = "HOST:PORT")]
    pub api_addr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Start,
    Stop,
    Status,
    Enable(String),
    Disable(String),
    Execute(String),
}

impl Cli {
    fn action(&self) -> Action {
        if self.start {
            Action::Start
        } else if self.stop {
            Action::Stop
        } else if let Some(name) = &self.enable {
            Action::Enable(name.clone())
        } else if let Some(name) = &self.disable {
            Action::Disable(name.clone())
        } else if let Some(name) = &self.execute {
            Action::Execute(name.clone())
        } else {
            Action::Status
        }
    }
}

fn init_tracing(daemon: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if daemon {
        registry.with(fmt::layer().json()).init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let action = cli.action();
    init_tracing(action == Action::Start);

    match run(&cli, action).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, action: Action) -> Result<ExitCode> {
    let mut config = config::load(cli.config.as_deref());
    if let Some(addr) = &cli.api_addr {
        config.api_addr = addr.clone();
    }

    let client = client::ApiClient::new(&config.api_addr)?;
    let reachable = client.is_reachable().await;

    match action {
        Action::Start if reachable => {
            anyhow::bail!("a scheduler is already running at {}", config.api_addr)
        }
        Action::Start => start(config).await,
        _ if reachable => remote(&client, action, cli.format).await,
        _ => local(&config, action, cli.format).await,
    }
}

/// Run the scheduler and control API until Ctrl-C, `POST /shutdown` or the
/// API server failing
async fn start(config: autopilot_lib::AppConfig) -> Result<ExitCode> {
    let listener = api::bind(&config.api_addr).await?;
    let runtime = runtime::Runtime::build(&config).await?;
    let task_count = runtime.scheduler.task_names().await.len();
    runtime
        .logger
        .log_startup(VERSION, &runtime.tier.to_string(), task_count);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let state = Arc::new(api::AppState::new(
        runtime.registry.clone(),
        runtime.scheduler.clone(),
        shutdown_tx,
    ));
    let mut api_handle = tokio::spawn(api::serve(listener, state.clone()));

    runtime.scheduler.start().await;

    let mut api_exit = None;
    let reason = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for SIGINT");
            }
            "SIGINT received"
        }
        _ = shutdown_rx.wait_for(|stop| *stop) => "shutdown requested",
        joined = &mut api_handle => {
            api_exit = Some(joined);
            "API server exited"
        }
    };

    info!(reason = %reason, "Shutting down");
    runtime.scheduler.stop().await;
    state.request_shutdown();

    let joined = match api_exit {
        Some(joined) => joined,
        None => api_handle.await,
    };
    let code = match joined {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            warn!(error = %e, "API server failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            warn!(error = %e, "API server task panicked");
            ExitCode::FAILURE
        }
    };
    runtime.logger.log_shutdown(reason);

    Ok(code)
}

async fn remote(client: &client::ApiClient, action: Action, format: OutputFormat) -> Result<ExitCode> {
    match action {
        Action::Start => anyhow::bail!("--start is not a remote command"),
        Action::Stop => {
            let response = client.shutdown().await?;
            output::print_success(&format!("Scheduler {}", response.status));
        }
        Action::Status => {
            let status = client.status().await?;
            output::print_status(&status, format);
        }
        Action::Enable(name) => match client.enable(&name).await? {
            Some(_) => output::print_success(&format!("Task {name} enabled")),
            None => return Ok(unknown_task(&name)),
        },
        Action::Disable(name) => match client.disable(&name).await? {
            Some(_) => output::print_success(&format!("Task {name} disabled")),
            None => return Ok(unknown_task(&name)),
        },
        Action::Execute(name) => match client.execute(&name).await? {
            Some(result) => output::print_result(&result, format),
            None => return Ok(unknown_task(&name)),
        },
    }
    Ok(ExitCode::SUCCESS)
}

/// No scheduler is running: answer from an in-process, unstarted one
async fn local(config: &autopilot_lib::AppConfig, action: Action, format: OutputFormat) -> Result<ExitCode> {
    if action == Action::Stop {
        output::print_info("Scheduler is not running");
        return Ok(ExitCode::SUCCESS);
    }

    let runtime = runtime::Runtime::build(config).await?;
    let scheduler = &runtime.scheduler;

    match action {
        Action::Start | Action::Stop => anyhow::bail!("--start and --stop are not local commands"),
        Action::Status => {
            output::print_status(&scheduler.status().await, format);
        }
        Action::Enable(name) => {
            if !scheduler.enable(&name).await {
                return Ok(unknown_task(&name));
            }
            output::print_warning(&format!(
                "No scheduler running; {name} is enabled for this process only"
            ));
        }
        Action::Disable(name) => {
            if !scheduler.disable(&name).await {
                return Ok(unknown_task(&name));
            }
            output::print_warning(&format!(
                "No scheduler running; {name} is disabled for this process only"
            ));
        }
        Action::Execute(name) => match scheduler.execute_now(&name).await {
            Ok(result) => output::print_result(&result, format),
            Err(SchedulerError::UnknownTask(_)) => return Ok(unknown_task(&name)),
            Err(e) => return Err(e.into()),
        },
    }
    Ok(ExitCode::SUCCESS)
}

fn unknown_task(name: &str) -> ExitCode {
    output::print_error(&format!("Unknown task: {name}"));
    ExitCode::FAILURE
}
