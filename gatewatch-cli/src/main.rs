mod config;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gatewatch_engine::{
    AlertDispatcher, AlertSink, HealthFlag, HealthServer, HttpClassifier, HttpStreamConnector,
    LogAlertSink, StreamSupervisor, SupervisionOutcome, WebhookAlertSink,
};
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::config::{ALERT_TIMEOUT, ConfigFile, DEFAULT_CONFIG_PATH, Settings};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const DEFAULT_LOG_FILTER: &str = "gatewatch=info,gatewatch_engine=info,mjpeg=info";
const VERBOSE_LOG_FILTER: &str = "gatewatch=debug,gatewatch_engine=debug,mjpeg=debug";

/// Watch a camera stream and alert when the door is left open.
#[derive(Debug, Parser)]
#[command(name = "gatewatch", version, about)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "GATEWATCH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Validate the configuration and print a summary without connecting
    #[arg(long)]
    test: bool,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Exit as soon as the retry budget is spent instead of serving
    /// UNHEALTHY until shutdown
    #[arg(long)]
    exit_on_failure: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose, args.quiet, args.json_logs) {
        eprintln!("Error: failed to initialise logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("Application error: {e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, quiet: bool, json: bool) -> anyhow::Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer().with_target(verbose)).try_init()?;
    }
    Ok(())
}

fn print_summary(path: &std::path::Path, settings: &Settings) {
    let stream = &settings.monitor.stream;
    println!("Running in test mode: verifying setup...");
    println!("Config file: {}", path.display());
    println!("Stream URL: {} (boundary {:?})", stream.url, stream.boundary);
    println!("Classifier: {}", settings.classifier_url);
    match &settings.alert_webhook_url {
        Some(url) => println!("Alerts: webhook {url}"),
        None => println!("Alerts: log only"),
    }
    println!("Recipients: {}", settings.alert.recipients.join(", "));
    println!("Health endpoint: {}", settings.health_bind);
    println!("Test mode completed successfully!");
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let settings = ConfigFile::load(&args.config)?.settings()?;

    if args.test {
        print_summary(&args.config, &settings);
        return Ok(ExitCode::SUCCESS);
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                shutdown.cancel();
            }
        });
    }

    let health = HealthFlag::new();
    let server = HealthServer::bind(settings.health_bind)
        .await
        .with_context(|| format!("failed to bind health endpoint on {}", settings.health_bind))?;
    let server_task = tokio::spawn(server.run(health.clone(), shutdown.clone()));

    let connector = Arc::new(HttpStreamConnector::new(&settings.monitor.stream)?);
    let classifier = Arc::new(HttpClassifier::new(
        settings.classifier_url.clone(),
        settings.classifier_timeout,
    )?);
    let sink: Arc<dyn AlertSink> = match &settings.alert_webhook_url {
        Some(url) => Arc::new(WebhookAlertSink::new(url.clone(), ALERT_TIMEOUT)?),
        None => Arc::new(LogAlertSink),
    };
    info!(sink = sink.name(), "Alert transport ready");

    let dispatcher = AlertDispatcher::new(sink, settings.alert);
    let mut supervisor = StreamSupervisor::new(
        settings.monitor,
        connector,
        classifier,
        dispatcher,
        health.clone(),
    )?;

    let outcome = supervisor.run(shutdown.clone()).await;
    info!(?outcome, alerts_sent = supervisor.alerts_sent(), "Supervision finished");

    let code = match outcome {
        SupervisionOutcome::RetriesExhausted { attempts } => {
            health.set_unhealthy();
            if !args.exit_on_failure {
                warn!(attempts, "Stream unavailable, reporting UNHEALTHY until shutdown");
                shutdown.cancelled().await;
            }
            ExitCode::FAILURE
        }
        SupervisionOutcome::CeilingReached | SupervisionOutcome::Shutdown => ExitCode::SUCCESS,
    };

    shutdown.cancel();
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Health endpoint failed"),
        Err(e) => warn!(error = %e, "Health endpoint task panicked"),
    }

    Ok(code)
}
