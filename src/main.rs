//! Flax HTTP mock server - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use flax::server;
use flax::{ControlPlane, Dispatcher, MockRegistry, SpecFile};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "flax",
    about = "HTTP mock server - request stubbing and RESTful collection emulation",
    version
)]
struct Args {
    /// Path to the spec file (.json, .yaml or .yml)
    #[arg(short, long, env = "FLAX_SPEC", default_value = "flax.yaml")]
    spec: PathBuf,

    /// Interface to bind (overrides the spec file)
    #[arg(long)]
    host: Option<String>,

    /// Port serving mocks (overrides the spec file)
    #[arg(long)]
    http_port: Option<u16>,

    /// Port serving the control plane (overrides the spec file)
    #[arg(long)]
    control_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print the default spec and exit
    #[arg(long)]
    print_config: bool,

    /// Validate the spec file and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        print!("{}", serde_yaml::to_string(&SpecFile::default())?);
        return Ok(());
    }

    if args.validate {
        if !args.spec.exists() {
            anyhow::bail!("Spec file not found: {}", args.spec.display());
        }
        let spec = SpecFile::from_file(&args.spec)?;
        println!(
            "Spec is valid ({} http mocks, {} rest mocks)",
            spec.http.len(),
            spec.rest.len()
        );
        return Ok(());
    }

    let mut spec = SpecFile::load_or_default(&args.spec)?;
    if let Some(host) = args.host {
        spec.config.host = host;
    }
    if let Some(port) = args.http_port {
        spec.config.http_port = port;
    }
    if let Some(port) = args.control_port {
        spec.config.control_port = port;
    }
    spec.config.validate()?;

    let registry = Arc::new(MockRegistry::new());
    registry.upsert_all(spec.mocks())?;

    let dispatcher = Arc::new(
        Dispatcher::new(Arc::clone(&registry))
            .with_logging(spec.config.log_matches, spec.config.log_unmatched),
    );
    let control = Arc::new(ControlPlane::new(Arc::clone(&dispatcher)));

    let http_listener = server::bind(spec.config.http_addr()?, "mocks").await?;
    let control_listener = server::bind(spec.config.control_addr()?, "control").await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let mocks = tokio::spawn(server::serve(
        http_listener,
        dispatcher,
        shutdown_tx.subscribe(),
        "mocks",
    ));
    let control = tokio::spawn(server::serve(
        control_listener,
        control,
        shutdown_tx.subscribe(),
        "control",
    ));

    info!(mocks = registry.len(), "Flax mock server started");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    if shutdown_tx.send(()).is_err() {
        warn!("No listener was running at shutdown");
    }

    let (mocks, control) = tokio::join!(mocks, control);
    mocks?;
    control?;

    Ok(())
}
