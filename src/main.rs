use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use worktime_scaler::config::{self, ChangeFilter, ConfigWatcher};
use worktime_scaler::controller::ScalingController;
use worktime_scaler::providers::CloudProviderFactory;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller
    Run(RunArgs),
    /// Validate a configuration file and print the effective configuration
    CheckConfig {
        /// Path to the configuration file
        path: PathBuf,
    },
    /// Show version and build information
    Version,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Namespace holding the configuration and saved pool state
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    namespace: String,

    /// Name of the ConfigMap watched for configuration updates
    #[arg(long, env = "CONFIG_MAP_NAME", default_value = "worktime-scaler-config")]
    config_map_name: String,

    /// EKS cluster name, required when any pool uses the aws provider
    #[arg(long, env = "EKS_CLUSTER_NAME")]
    eks_cluster_name: Option<String>,

    /// Time between reconciliations
    #[arg(long, env = "RECONCILE_INTERVAL", default_value = "1m", value_parser = parse_interval)]
    reconcile_interval: Duration,

    /// Default log level, overridden by RUST_LOG
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Port of the health, metrics and status API
    #[arg(long, env = "API_PORT", default_value_t = 8080)]
    api_port: u16,
}

fn parse_interval(value: &str) -> Result<Duration, String> {
    let period = duration_str::parse(value).map_err(|e| e.to_string())?;
    if period.is_zero() {
        return Err("interval must be greater than zero".to_string());
    }
    Ok(period)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("worktime-scaler v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::CheckConfig { path } => check_config(path),
        Commands::Run(run_args) => run_controller(run_args).await,
    }
}

fn check_config(path: PathBuf) -> anyhow::Result<()> {
    let cfg = config::read_config(&path)
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    print!("{}", serde_yaml::to_string(&cfg)?);
    Ok(())
}

fn init_tracing(level: Level, format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
    }
}

async fn run_controller(args: RunArgs) -> anyhow::Result<()> {
    init_tracing(args.log_level, args.log_format);

    info!("Starting worktime-scaler v{}", env!("CARGO_PKG_VERSION"));

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let raw = tokio::fs::read_to_string(&args.config)
        .await
        .with_context(|| format!("failed to read {}", args.config.display()))?;
    let cfg = config::read_config_from_str(&raw)
        .with_context(|| format!("invalid configuration in {}", args.config.display()))?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;

    let factory = Arc::new(CloudProviderFactory::new(
        client.clone(),
        args.namespace.clone(),
        args.eks_cluster_name.clone(),
        http.clone(),
    ));
    let controller = Arc::new(
        ScalingController::new(cfg, factory, http)
            .await
            .context("failed to create scaling controller")?,
    );

    let (tx, rx) = mpsc::channel(4);
    let watcher = ConfigWatcher {
        config_path: Some(args.config.clone()),
        client: Some(client),
        namespace: args.namespace.clone(),
        config_map_name: args.config_map_name.clone(),
        filter: ChangeFilter::new(Some(&raw)),
    };
    tokio::spawn(async move {
        if let Err(e) = watcher.run(tx).await {
            error!("Configuration watcher error: {:?}", e);
        }
    });
    tokio::spawn(controller.clone().listen(rx));

    #[cfg(feature = "rest-api")]
    {
        let api_controller = controller.clone();
        let port = args.api_port;
        tokio::spawn(async move {
            if let Err(e) = worktime_scaler::rest_api::run_server(api_controller, port).await {
                error!("REST API server error: {:?}", e);
            }
        });
    }

    let reconciler = tokio::spawn(controller.run(args.reconcile_interval));

    shutdown_signal().await;
    info!("Shutdown signal received, stopping");
    reconciler.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
