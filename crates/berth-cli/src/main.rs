use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use berth_core::app::{CancelToken, Controller, ControllerBuilder, cancel_pair};
use berth_core::config::BerthConfig;
use berth_core::domain::report::EXIT_CONFIGURATION;
use berth_core::impls::{InMemoryCluster, KubectlCluster, KubectlExecAdmin, LocalArtifactStore};
use berth_core::ports::SystemClock;

mod reporter;

use reporter::StdoutReporter;

const DEFAULT_CONFIG: &str = "berth.toml";

#[derive(Parser)]
#[command(
    name = "berth",
    version,
    about = "Migrate a database workload to per-replica managed storage"
)]
struct Cli {
    /// Config file [default: berth.toml if present, else built-in defaults]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override [cluster].namespace
    #[arg(long, global = true)]
    namespace: Option<String>,

    /// Override [cluster].context
    #[arg(long, global = true)]
    context: Option<String>,

    /// Log level for berth targets (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print events and the final report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Run against an in-memory cluster seeded with a legacy deployment
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Migrate the legacy deployment to the managed topology
    Migrate,
    /// Show the current topology and storage bindings
    Status,
    /// Print manual steps back to the legacy topology
    RollbackHint,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(level: Option<&str>, format: LogFormat) {
    let filter = match level {
        Some(level) => EnvFilter::new(format!("berth={level}")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("berth=info")),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(cli: &Cli) -> Result<BerthConfig> {
    let mut config = match &cli.config {
        Some(path) => BerthConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => BerthConfig::load(Path::new(DEFAULT_CONFIG))?,
        None => {
            tracing::info!("no {DEFAULT_CONFIG} found; using built-in defaults");
            BerthConfig::default()
        }
    };
    if let Some(namespace) = &cli.namespace {
        config.cluster.namespace = namespace.clone();
    }
    if let Some(context) = &cli.context {
        config.cluster.context = Some(context.clone());
    }
    config.validate()?;
    Ok(config)
}

/// A cluster holding the legacy deployment named in `config`, with a few
/// sample documents on its volume.
async fn simulated_cluster(config: &BerthConfig) -> InMemoryCluster {
    let cluster = InMemoryCluster::new();
    let volume = config.legacy.volume.as_deref().unwrap_or("legacy-pv");
    let records = (1..=3)
        .map(|i| json!({ "_id": i, "room": "general", "text": format!("message {i}") }))
        .collect();
    cluster
        .seed_legacy(&config.legacy.deployment, &config.legacy.claim, volume, records)
        .await;
    cluster
}

async fn build_controller(cli: &Cli, config: BerthConfig) -> Result<Controller> {
    let builder = ControllerBuilder::new().event_sink(StdoutReporter::new(cli.json));
    let builder = if cli.simulate {
        let cluster = simulated_cluster(&config).await;
        let artifacts = std::env::temp_dir().join("berth-simulate");
        builder
            .admin(cluster.admin())
            .cluster(cluster)
            .artifact_store(LocalArtifactStore::new(artifacts, SystemClock))
    } else {
        builder
            .cluster(KubectlCluster::new(&config.cluster))
            .admin(KubectlExecAdmin::new(config.cluster.clone(), config.database.clone()))
    };
    builder.config(config).build().context("wiring controller")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn listen_for_interrupt() -> CancelToken {
    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received");
            handle.cancel();
        }
    });
    token
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli).context("loading configuration")?;
    let controller = build_controller(&cli, config).await?;

    match cli.command {
        Command::Migrate => {
            let cancel = listen_for_interrupt();
            let report = controller.migrate(&cancel).await;
            if cli.json {
                print_json(&report)?;
            } else {
                print!("{}", report.render_text());
            }
            Ok(ExitCode::from(u8::try_from(report.exit_code()).unwrap_or(1)))
        }
        Command::Status => match controller.status().await {
            Ok(view) => {
                if cli.json {
                    print_json(&view)?;
                } else {
                    print!("{}", view.render_text());
                }
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                eprintln!("error: cannot inspect cluster: {e}");
                Ok(ExitCode::FAILURE)
            }
        },
        Command::RollbackHint => match controller.rollback_hint().await {
            Ok(hint) => {
                if cli.json {
                    print_json(&hint)?;
                } else {
                    print!("{}", hint.render_text());
                }
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                eprintln!("error: cannot inspect cluster: {e}");
                Ok(ExitCode::FAILURE)
            }
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref(), cli.log_format);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_CONFIGURATION as u8)
        }
    }
}
