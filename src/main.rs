use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use voice_tutor::{
    ApiIntentRouter, ApiSafetyChecker, AppConfig, AppState, AuditSink, ChatClient, EscalationBus,
    IntentRouter, JobStore, Orchestrator, SafetyChecker, SessionRegistry, SpecialistRegistry,
    TracingAuditSink, server,
};

/// Voice-tutor backend: classify, stream, filter, speak
#[derive(Parser, Debug)]
#[command(name = "voice-tutor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the orchestration backend
    #[command(name = "serve")]
    Serve {
        /// Path to a JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the bind port
        #[arg(long, env = "VOICE_TUTOR_PORT")]
        port: Option<u16>,

        /// API key for the upstream generator endpoints
        #[arg(long, env = "VOICE_TUTOR_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Serve {
        config: None,
        host: None,
        port: None,
        api_key: None,
    });

    match command {
        Command::Serve {
            config,
            host,
            port,
            api_key,
        } => run_server(config, host, port, api_key).await,
    }
}

async fn run_server(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    api_key: Option<String>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => AppConfig::load(&path)?,
        None => AppConfig::default(),
    };
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(key) = api_key {
        config.upstream.api_key = Some(key);
    }

    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let chat = Arc::new(ChatClient::from_config(&config.upstream));
    let router: Arc<dyn IntentRouter> = Arc::new(ApiIntentRouter::new(
        Arc::clone(&chat),
        config.upstream.classifier_model.clone(),
    ));
    let specialists = Arc::new(SpecialistRegistry::from_config(
        Arc::clone(&chat),
        &config.upstream,
    ));
    let safety: Arc<dyn SafetyChecker> =
        Arc::new(ApiSafetyChecker::new(Arc::clone(&chat), &config.upstream));
    let escalation = Arc::new(EscalationBus::new(
        Arc::clone(&audit),
        config.server.observer_base_url.clone(),
    ));

    let jobs = Arc::new(JobStore::new(Duration::from_secs(config.jobs.ttl_secs)));
    let sessions = Arc::new(SessionRegistry::new());

    let shutdown = CancellationToken::new();
    let reclaimer = Arc::clone(&jobs).spawn_reclaimer(
        Duration::from_secs(config.jobs.reclaim_interval_secs),
        shutdown.clone(),
    );

    let orchestrator = Arc::new(Orchestrator::new(
        jobs,
        sessions,
        router,
        specialists,
        safety,
        audit,
        Arc::clone(&escalation),
    ));

    let state = AppState {
        orchestrator,
        escalation,
        default_wait: Duration::from_secs(config.jobs.wait_timeout_secs),
    };
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid bind address")?;

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let result = server::serve(state, addr, shutdown.clone()).await;

    // In-flight pipelines finish on their own; only the reclaimer is ours
    // to stop.
    shutdown.cancel();
    let _ = reclaimer.await;
    result
}
