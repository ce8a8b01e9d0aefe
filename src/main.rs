use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use relaybot::config::Config;
use relaybot::relay::line::public_base;
use relaybot::relay::{
    ArtifactCache, CacheSweeper, ConversationCache, Dispatcher, GeminiClient, GrokClient, LineClient, Providers,
    Upstream,
};
use relaybot::server::{self, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    let env_file = std::env::args().nth(1).map(PathBuf::from);
    let config = match Config::load(env_file.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            // No log dir without config, so stdout only
            tracing_subscriber::fmt().with_env_filter(env_filter()).init();
            error!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = init_logging(&config.log_dir);

    info!("🚀 Starting relaybot...");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
}

/// Log to stdout and to `{log_dir}/relaybot.log`.
fn init_logging(log_dir: &Path) -> Option<WorkerGuard> {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(env_filter());

    let log_file = std::fs::create_dir_all(log_dir).and_then(|_| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join("relaybot.log"))
    });

    match log_file {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(stdout_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_filter(env_filter()),
                )
                .init();
            Some(guard)
        }
        Err(e) => {
            tracing_subscriber::registry().with(stdout_layer).init();
            warn!("File logging disabled ({}): {e}", log_dir.display());
            None
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let history = ConversationCache::new(config.history_ttl, config.history_max_turns);
    let artifacts = ArtifactCache::new(config.artifact_ttl);
    let sweeper = CacheSweeper::start(config.sweep_interval, history.clone(), artifacts.clone());

    let line = Arc::new(LineClient::new(
        config.channel_token.clone(),
        config.line_api_base.clone(),
        config.upstream_timeout,
    ));

    let public_base = match config.public_base_url.clone() {
        Some(url) => url,
        None => {
            let endpoint = line.webhook_endpoint().await?;
            public_base(&endpoint).ok_or_else(|| format!("webhook endpoint has no host: {endpoint}"))?
        }
    };
    info!("Public base: {}", public_base);

    let upstream: Arc<dyn Upstream> = Arc::new(Providers::new(
        GrokClient::new(
            config.grok_api_key.clone(),
            config.grok_api_base.clone(),
            config.upstream_timeout,
        ),
        GeminiClient::new(
            config.gemini_api_key.clone(),
            config.gemini_api_base.clone(),
            config.upstream_timeout,
        ),
        artifacts.clone(),
    ));

    let state = Arc::new(AppState {
        dispatcher: Dispatcher::new(upstream.clone(), line, history, public_base),
        upstream,
        artifacts,
        channel_secret: config.channel_secret.clone(),
        default_location: config.default_location.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("🎯 Listening on {}", addr);

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    drop(sweeper);
    info!("👋 Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
