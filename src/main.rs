use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{debug, info};

use tripreduce::app::{self, AppConfig, EngineSettings};
use tripreduce::mapreduce::{parse_trigger_path, ReportOutcome, TRIP_SPEEDS};
use tripreduce::orchestration::{InstanceStatus, OrchestrationEngine, RuntimeStatus};
use tripreduce::server::ApiServer;

/// Average trip speed per day of week over a container of CSV trip logs
#[derive(Parser)]
#[command(name = "tripreduce")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a TOML settings file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding instance histories (overrides the settings file)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an instance and drive it to completion in this process
    Run {
        /// Input location: scheme://host/container/prefix
        #[arg(long)]
        path: String,
    },
    /// Continue an instance whose previous run was interrupted
    Resume {
        /// Instance id printed by `run` or `list`
        instance_id: String,
    },
    /// Print the status snapshot of an instance as JSON
    Status { instance_id: String },
    /// List known instances
    List,
    /// Serve the HTTP trigger and status API
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:7071")]
        bind: SocketAddr,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    if let Err(e) = run(cli).await {
        app::handle_fatal_error(e, verbose);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = EngineSettings::load(cli.config.as_deref())?.with_state_dir(cli.state_dir);
    let config = AppConfig::new(cli.verbose).with_settings(settings);
    app::init_logging(&config)?;

    let engine = app::initialize_engine(&config).await?;

    match cli.command {
        Commands::Run { path } => {
            let request = parse_trigger_path(Some(&path))
                .map_err(tripreduce::Error::from)?
                .with_result_container(config.settings.result_container());
            let input = serde_json::to_value(&request)?;
            let instance_id = engine.start_instance(TRIP_SPEEDS, input).await?;
            info!("Instance id: {}", instance_id);
            let status = engine.run_instance(&instance_id).await?;
            report(&status)
        }
        Commands::Resume { instance_id } => {
            let status = engine
                .run_instance(&instance_id)
                .await
                .with_context(|| format!("Failed to resume instance {}", instance_id))?;
            report(&status)
        }
        Commands::Status { instance_id } => {
            let status = load_status(&engine, &instance_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Commands::List => {
            let statuses = engine.list_instances().await?;
            if statuses.is_empty() {
                println!("No instances found");
            }
            for status in statuses {
                println!(
                    "{}  {:<9}  {}",
                    status.instance_id,
                    status.runtime_status.to_string(),
                    status.created_time.to_rfc3339()
                );
            }
            Ok(())
        }
        Commands::Serve { bind } => {
            debug!("Result container: {:?}", config.settings.result_container());
            ApiServer::new(engine)
                .with_result_container(config.settings.result_container())
                .serve(bind)
                .await
        }
    }
}

async fn load_status(engine: &OrchestrationEngine, instance_id: &str) -> Result<InstanceStatus> {
    engine
        .status(instance_id)
        .await?
        .ok_or_else(|| anyhow!("Instance {} not found", instance_id))
}

/// Print the terminal value of an instance, or fail with its error
fn report(status: &InstanceStatus) -> Result<()> {
    match status.runtime_status {
        RuntimeStatus::Completed => {
            let output = status
                .output
                .clone()
                .ok_or_else(|| anyhow!("Instance {} completed without output", status.instance_id))?;
            let outcome: ReportOutcome = serde_json::from_value(output)
                .context("Unexpected output from trip-speed instance")?;
            println!("{}", outcome.summary());
            Ok(())
        }
        RuntimeStatus::Failed => Err(anyhow!(
            "Instance {} failed: {}",
            status.instance_id,
            status.error.as_deref().unwrap_or("unknown error")
        )),
        other => Err(anyhow!(
            "Instance {} stopped while {}",
            status.instance_id,
            other
        )),
    }
}
