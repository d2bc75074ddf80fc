use std::sync::Arc;

use anyhow::Context;
use secrecy::SecretString;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use meeting_brief::asana::{AsanaClient, AsanaConfig};
use meeting_brief::config::{PipelineConfig, ServerConfig, parse_pairs, require_env};
use meeting_brief::dispatch::Collaborators;
use meeting_brief::llm::{LlmConfig, create_provider};
use meeting_brief::pipeline::{Orchestrator, PipelineDeps};
use meeting_brief::routing::{ProjectDirectory, StaticDirectory};
use meeting_brief::server::{AppState, webhook_routes};
use meeting_brief::sources::FirefliesSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing();

    let llm_config = LlmConfig::from_env()?;
    let pipeline_config = PipelineConfig::from_env()?;
    let server_config = ServerConfig::from_env()?;

    eprintln!("📝 Meeting Brief v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", llm_config.model);
    eprintln!("   Intake project: {}", pipeline_config.intake_project_id);
    eprintln!("   Internal project: {}", pipeline_config.internal_project_id);

    let llm = create_provider(&llm_config)?;

    let source = FirefliesSource::new(
        SecretString::from(require_env("FIREFLIES_API_KEY")?),
        pipeline_config.sink_timeout,
    )?;

    let asana = Arc::new(AsanaClient::new(AsanaConfig::from_env()?)?);

    // ── Project directory ────────────────────────────────────────────
    let directory: Arc<dyn ProjectDirectory> = match optional_env("BRIEF_CLIENT_PROJECTS") {
        Some(raw) => {
            let directory = StaticDirectory::from_pairs(parse_pairs("BRIEF_CLIENT_PROJECTS", &raw)?);
            eprintln!("   Directory: {} static client projects", directory.len());
            Arc::new(directory)
        }
        None => {
            eprintln!("   Directory: Asana workspace projects");
            asana.clone()
        }
    };

    let collaborators = match optional_env("BRIEF_COLLABORATORS") {
        Some(raw) => Collaborators::new(parse_pairs("BRIEF_COLLABORATORS", &raw)?),
        None => Collaborators::default(),
    };
    eprintln!("   Collaborators: {}", collaborators.len());

    let orchestrator = Orchestrator::new(
        pipeline_config,
        PipelineDeps {
            source: Arc::new(source),
            llm,
            directory,
            sink: asana,
            collaborators,
        },
    );

    if server_config.webhook_secret.is_none() {
        tracing::warn!("FIREFLIES_WEBHOOK_SECRET not set; webhook requests are not authenticated");
    }

    let port = server_config.port;
    let app = webhook_routes(AppState {
        orchestrator: Arc::new(orchestrator),
        config: Arc::new(server_config),
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind webhook port {port}"))?;
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook/fireflies\n", port);
    tracing::info!(port, "Webhook server started");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Stderr logging, plus a daily rolling file when `BRIEF_LOG_DIR` is set.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_target(false);

    match optional_env("BRIEF_LOG_DIR") {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "meeting-brief.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
