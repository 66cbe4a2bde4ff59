//! Control plane binary: configuration, logging, wiring, graceful shutdown.

use orra_engine::{ChannelConfig, HttpPlanner, HttpWebhookTransport, PlannerConfig, SchedulerConfig};
use orra_server::{build_state, router, Config};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How long open connections get to drain after the shutdown signal. Worker
/// channel sessions stay open on their own, so the drain must be bounded.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    init_tracing(&config);

    let planner = Arc::new(HttpPlanner::new(PlannerConfig {
        url: config.planner.url.clone(),
        api_key: config.planner.api_key.clone(),
        timeout: config.planner.timeout,
        max_retries: config.planner.max_retries,
    }));
    let webhook_transport = Arc::new(HttpWebhookTransport::new(config.webhook.timeout));

    let state = build_state(
        planner,
        webhook_transport,
        ChannelConfig {
            ping_interval: config.channel.ping_interval,
            pong_timeout: config.channel.pong_timeout,
            max_message_bytes: config.channel.max_message_bytes,
        },
        SchedulerConfig {
            dispatch_concurrency: config.scheduler.dispatch_concurrency,
            task_timeout: config.scheduler.task_timeout,
            ..SchedulerConfig::default()
        },
    );
    state.channel.spawn_health_monitor();

    let app = router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "control plane listening");

    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = drain_tx.send(());
    });
    let mut server = std::pin::pin!(std::future::IntoFuture::into_future(server));

    tokio::select! {
        result = &mut server => result?,
        _ = drain_rx => {
            match tokio::time::timeout(SHUTDOWN_DEADLINE, &mut server).await {
                Ok(result) => {
                    result?;
                    info!("all connections drained");
                }
                Err(_) => {
                    warn!("shutdown deadline elapsed before all connections drained");
                }
            }
        }
    }
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    if config.logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "shutdown signal handler failed");
    }
}
