use contour_xds::cache::ObjectCache;
use contour_xds::config::load_config_from_env;
use contour_xds::dag::BuilderConfig;
use contour_xds::events::EventHandler;
use contour_xds::status_writer::RecordingStatusSink;
use contour_xds::translator::TranslatorConfig;
use contour_xds::xds::cache::XdsCaches;
use contour_xds::{Result, APP_NAME, VERSION};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "contour_xds=info,tonic=info".into()),
        )
        .init();

    info!(app_name = APP_NAME, version = VERSION, "starting control plane");

    let config = load_config_from_env()?;
    info!(
        xds_bind_address = %config.xds.bind_address(),
        root_namespaces = ?config.root_namespaces,
        hold_down_ms = config.event_handler.hold_down_millis,
        "loaded configuration"
    );

    let (notify_tx, notify_rx) = tokio::sync::mpsc::channel(64);
    let object_cache = Arc::new(ObjectCache::new(notify_tx));
    let xds_caches = Arc::new(XdsCaches::default());

    // The Kubernetes status write-back client is out of scope for this
    // control plane; reconciliation runs against an in-memory sink so the
    // Event Handler's behavior is exercised without a cluster to write to.
    warn!("status reconciliation is running against an in-memory sink; no cluster write-back is configured");
    let status_sink = Arc::new(RecordingStatusSink::new());

    let (event_handler, _dag_handle) = EventHandler::new(
        object_cache.clone(),
        BuilderConfig { root_namespaces: config.root_namespaces.clone() },
        TranslatorConfig::default(),
        xds_caches.clone(),
        status_sink,
        config.event_handler.hold_down(),
    );

    let event_handler_task = tokio::spawn(event_handler.run(notify_rx));

    let shutdown_signal = async {
        signal::ctrl_c().await.expect("failed to install CTRL+C signal handler");
        info!("shutdown signal received");
    };

    if let Err(e) = contour_xds::xds::serve(config.xds, xds_caches, shutdown_signal).await {
        error!(error = %e, "xDS server failed");
        return Err(e);
    }

    event_handler_task.abort();
    info!("control plane shut down");
    Ok(())
}
