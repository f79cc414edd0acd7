use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cosim_orchestrator::api::{AppState, ServerCommand, create_router};
use cosim_orchestrator::{LauncherConfig, RunContext, local_executor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status used when a second Ctrl-C forces the process down.
const FORCED_EXIT_STATUS: i32 = 130;

#[derive(Parser)]
#[command(name = "cosim-orchestrator")]
#[command(about = "Launches the actions of a co-simulation action plan")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Carry out one action plan and exit with its return code
    Run {
        /// Action plan JSON file
        #[arg(long)]
        plan: PathBuf,
        /// Launcher configuration (cosim.json)
        #[arg(long, env = "COSIM_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Start the app server and carry out submitted plans
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(short, long, default_value = "5000")]
        port: u16,
        #[arg(long, env = "COSIM_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("cosim_orchestrator=info".parse()?)
                .add_directive("tower_http=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { plan, config } => {
            let config = Arc::new(LauncherConfig::load(config.as_deref())?);
            let code = run_plan(&plan, config).await?;
            println!("{code}");
            if !code.is_ok() {
                std::process::exit(1);
            }
        }
        Commands::Serve { host, port, config } => {
            let config = Arc::new(LauncherConfig::load(config.as_deref())?);
            serve(&host, port, config).await?;
        }
    }

    Ok(())
}

async fn run_plan(
    plan: &Path,
    config: Arc<LauncherConfig>,
) -> Result<cosim_orchestrator::LauncherReturnCode> {
    info!("Carrying out action plan {}", plan.display());
    let executor = local_executor(plan, config)
        .with_context(|| format!("failed to load action plan {}", plan.display()))?;

    let ctx = executor.context();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("caught interrupt, stopping after the running actions");
            ctx.interrupt();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(FORCED_EXIT_STATUS);
        }
    });

    Ok(executor.carry_out_action_plan().await)
}

/// The run currently being carried out by the serve loop.
struct ActiveRun {
    ctx: Arc<RunContext>,
    handle: JoinHandle<()>,
}

async fn serve(host: &str, port: u16, config: Arc<LauncherConfig>) -> Result<()> {
    let script_dir = config.script_dir();
    let (tx, mut rx) = mpsc::channel(16);
    let app = create_router(AppState {
        script_dir: script_dir.clone(),
        commands: tx,
    });

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    info!("App server listening on http://{host}:{port}");
    info!("Scripts are stored in {}", script_dir.display());

    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let mut active: Option<ActiveRun> = None;

    loop {
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else { break };
                match command {
                    ServerCommand::Start { script } => {
                        if active.as_ref().is_some_and(|run| !run.handle.is_finished()) {
                            warn!("a plan is already running, ignoring {}", script.display());
                            continue;
                        }
                        match local_executor(&script, config.clone()) {
                            Ok(executor) => {
                                let ctx = executor.context();
                                info!(run_id = %ctx.run_id(), "starting {}", script.display());
                                let handle = tokio::spawn(async move {
                                    let code = executor.carry_out_action_plan().await;
                                    info!("action plan finished with {code}");
                                });
                                active = Some(ActiveRun { ctx, handle });
                            }
                            Err(err) => error!("could not load {}: {err:#}", script.display()),
                        }
                    }
                    ServerCommand::Stop => match &active {
                        Some(run) if !run.handle.is_finished() => {
                            info!(run_id = %run.ctx.run_id(), "stopping the running plan");
                            run.ctx.interrupt();
                        }
                        _ => info!("no plan is running"),
                    },
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                warn!("caught interrupt, shutting down");
                break;
            }
        }
    }

    server.abort();

    if let Some(run) = active {
        if !run.handle.is_finished() {
            run.ctx.interrupt();
            info!("waiting for the running plan to wind down");
            tokio::select! {
                _ = run.handle => {}
                _ = tokio::signal::ctrl_c() => std::process::exit(FORCED_EXIT_STATUS),
            }
        }
    }

    Ok(())
}
