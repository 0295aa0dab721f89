use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use buhbot_classifier::ClassifierClient;
use buhbot_core::config::BotConfig;
use buhbot_ingress::IngressContext;
use buhbot_scheduler::{QueueName, SchedulerEngine};
use buhbot_settings::ConfigResolver;
use buhbot_sla::SlaTimerRouter;
use buhbot_telegram::TelegramAdapter;
use tokio::sync::watch;
use tracing::{error, info};

mod app;
mod http;

use app::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "buhbot_gateway=info,tower_http=debug".into()),
        )
        .init();

    // load config: explicit path > BUHBOT_CONFIG env > ~/.buhbot/buhbot.toml
    let config_path = std::env::var("BUHBOT_CONFIG").ok();
    let config = match BotConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            // unlike a dev-local agent runtime, this engine must not silently
            // fall back to defaults — a misconfigured bot_token/api_key
            // would otherwise run with no SLA enforcement at all.
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(config).await {
        error!(%err, "gateway exited with an error");
        std::process::exit(1);
    }
}

async fn run(config: BotConfig) -> anyhow::Result<()> {
    let db = buhbot_store::open(&config.database.path)?;
    let scheduler_conn = rusqlite::Connection::open(&config.database.path)?;
    let scheduler = Arc::new(SchedulerEngine::new(scheduler_conn)?);

    let resolver = Arc::new(ConfigResolver::new(db.clone()));
    let classifier = Arc::new(ClassifierClient::new(
        config.classifier.api_key.clone(),
        config.classifier.base_url.clone(),
        config.classifier.model.clone(),
        Duration::from_secs(config.classifier.timeout_secs),
    ));

    scheduler.register_handler(
        QueueName::SlaTimer,
        Arc::new(SlaTimerRouter::new(db.clone(), scheduler.clone(), resolver.clone())),
        config.queue.sla_timer_concurrency,
        None,
    );

    let ingress_ctx = Arc::new(IngressContext {
        db: db.clone(),
        resolver: resolver.clone(),
        classifier: classifier.clone(),
        scheduler: scheduler.clone(),
    });

    let telegram = TelegramAdapter::new(config.platform.bot_token.clone(), ingress_ctx);
    telegram.register_alert_dispatch(&scheduler, config.queue.alert_dispatch_concurrency);

    let state = Arc::new(AppState::new(config.clone(), db, resolver, classifier, scheduler.clone()));
    let router = app::build_router(state);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let grace = Duration::from_secs(config.queue.shutdown_grace_secs);

    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx, grace));
    let telegram_handle = tokio::spawn(telegram.run());

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    info!(%addr, "buhbot gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown_signal(shutdown_tx)).await?;

    telegram_handle.abort();
    let _ = scheduler_handle.await;
    info!("gateway shut down cleanly");
    Ok(())
}

/// Waits for SIGTERM (or Ctrl-C locally) and broadcasts it on `shutdown_tx`
/// so the scheduler's poll loops stop picking up new jobs and start their
/// grace-window drain.
async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sigterm) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            std::future::pending::<()>().await;
            return;
        };
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining");
    let _ = shutdown_tx.send(true);
}
