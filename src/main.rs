use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use git_poller::bus::{RedisBus, RetryConfig};
use git_poller::config::Config;
use git_poller::control::PollerControl;
use git_poller::poller::{GitPollerConfig, GitPollerFactory};
use git_poller::pool::PollerPool;
use git_poller::server::{AppState, build_router};

/// Control messages buffered between the bus listener and the dispatcher.
const CONTROL_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, fallbacks) = Config::from_env();

    let default_filter = format!(
        "git_poller={}",
        config.log_level.as_str().to_ascii_lowercase()
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    for fallback in &fallbacks {
        warn!(%fallback, "Ignoring configuration value");
    }

    let shutdown = CancellationToken::new();
    let (pool, runner) = PollerPool::with_shutdown(shutdown.child_token());
    let pool_task = tokio::spawn(runner.run());

    let bus = RedisBus::connect(&config.redis_url, RetryConfig::DEFAULT)
        .await
        .with_context(|| format!("connecting to redis at {}", config.redis_url))?;

    let sink = Arc::new(bus.sink(config.pipelines_channel.clone()));
    let factory = Arc::new(GitPollerFactory::new(
        GitPollerConfig {
            interval: config.poll_interval,
            ..GitPollerConfig::default()
        },
        sink,
    ));
    let control = PollerControl::new(pool.clone(), factory);

    let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);
    let listener_task = tokio::spawn({
        let bus = bus.clone();
        let channel = config.control_channel.clone();
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = bus.listen(&channel, control_tx, shutdown).await {
                error!(error = %e, "Control channel listener failed");
            }
        }
    });
    let dispatcher_task = tokio::spawn(control.clone().run(control_rx, shutdown.clone()));

    let app = build_router(AppState::new(control));
    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("binding {}", config.http_addr))?;
    info!(addr = %config.http_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("HTTP server failed")?;

    // The server can also stop on its own; make sure everything else follows.
    shutdown.cancel();

    for (name, task) in [
        ("control listener", listener_task),
        ("control dispatcher", dispatcher_task),
    ] {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "Task ended abnormally");
        }
    }
    pool_task.await.context("poller pool control loop panicked")?;

    info!("Shut down");
    Ok(())
}

/// Resolves on Ctrl-C or once `shutdown` is cancelled elsewhere.
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                shutdown.cancel();
            }
            Err(e) => {
                error!(error = %e, "Unable to listen for Ctrl-C");
                shutdown.cancelled().await;
            }
        },
        _ = shutdown.cancelled() => {}
    }
}
