//! Listener binary: subscribes to the configured channel and runs until
//! Ctrl-C or until the feed closes.

use std::io;
use std::sync::Arc;

use tracing::{debug, info, warn};
use transfer_feed_domain::config::ListenerConfig;
use transfer_feed_domain::services::telemetry::{init_telemetry, TelemetryConfig};
use transfer_feed_domain::storage::ListenerStateStore;
use transfer_feed_listener::{
    DispatchSink, ListenerError, LogHandler, PgNotificationSource, StoreHandler, Supervisor,
    SupervisorConfig,
};
use transfer_feed_storage::SeaOrmStorage;

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[listener] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), ListenerError> {
    let config = ListenerConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("LISTENER");
    let telemetry = init_telemetry(&telemetry_config)?;

    let mut sink = DispatchSink::new();
    sink.register(Arc::new(LogHandler))?;
    if let Some(url) = config.store_database_url() {
        let storage = Arc::new(SeaOrmStorage::connect(url).await?);
        match storage.last_block_number().await? {
            Some(block) => info!(block, "resuming after stored block"),
            None => info!("transfer store is empty"),
        }
        sink.register(Arc::new(StoreHandler::new(storage)))?;
    }

    let source = PgNotificationSource::new(config.database_url());
    let handle = Supervisor::new(source, sink, SupervisorConfig::from(&config)).start();

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(ListenerError::Signal)?;
            info!("interrupt received");
        }
        _ = handle.closed() => warn!("notification feed closed"),
    }

    let report = handle.shutdown().await?;
    info!(
        outcome = ?report.outcome,
        dispatched = report.stats.dispatched,
        handler_failures = report.stats.handler_failures,
        reconnects = report.subscription.reconnects,
        "listener stopped"
    );
    debug!(metrics = %telemetry.render_metrics(), "final metrics snapshot");
    Ok(())
}
