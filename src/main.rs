//! Server binary. It wires up:
//! - the ffmpeg transcoder and the HTTP source fetcher
//! - the session registry, the conversion pipeline and the reaper
//! - the axum router

use hls_relay::adapters::ffmpeg::FfmpegTranscoder;
use hls_relay::adapters::fs::LocalSources;
use hls_relay::adapters::http::{router, AppState, HttpOptions};
use hls_relay::adapters::remote::HttpFetcher;
use hls_relay::application::pipeline::{ConversionPipeline, PipelineSettings};
use hls_relay::application::reaper::Reaper;
use hls_relay::application::registry::SessionRegistry;
use hls_relay::ServiceConfig;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tokio::fs::create_dir_all(&config.artifact_root).await?;

    // 1. Adapters
    let fetcher = Arc::new(HttpFetcher::new(config.download_timeout)?);
    let transcoder = Arc::new(FfmpegTranscoder::new(&config.ffmpeg_bin, config.transcode_timeout));
    if which::which(&config.ffmpeg_bin).is_err() {
        tracing::warn!(ffmpeg = %config.ffmpeg_bin, "ffmpeg not found; conversions will fail");
    }
    let local_sources = config.local_source_root.as_ref().map(LocalSources::new);

    // 2. Application services
    let registry = SessionRegistry::new(&config.artifact_root);
    let pipeline = Arc::new(ConversionPipeline::new(
        registry.clone(),
        fetcher,
        transcoder,
        local_sources,
        PipelineSettings {
            profile: config.profile.clone(),
            invocation: config.invocation,
            scratch_dir: config.scratch_dir.clone(),
            public_prefix: String::from("/static"),
        },
    ));

    // 3. Reaper
    let shutdown = CancellationToken::new();
    let reaper = config.reaper_enabled.then(|| {
        Reaper::new(registry, config.retention, config.reaper_interval).spawn(shutdown.clone())
    });

    // 4. HTTP layer
    let app = router(
        AppState { pipeline },
        &HttpOptions {
            allowed_origins: config.allowed_origins.clone(),
            max_upload_bytes: config.max_upload_bytes,
        },
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!(
        addr = %config.bind_addr(),
        artifact_root = %config.artifact_root.display(),
        mode = ?config.invocation,
        "listening"
    );

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(reaper) = reaper {
        let _ = reaper.await;
    }
    Ok(())
}
