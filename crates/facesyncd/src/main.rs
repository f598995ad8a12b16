use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

mod api;
mod blobs;
mod config;
mod context;
mod dbus_interface;
mod enrollment;
mod events;
mod identity_store;
mod logbuf;
mod reconciler;
mod recognizer;
mod settings;
mod snapshots;
mod supervisor;
#[cfg(test)]
mod testutil;

use config::{BusKind, Config};
use dbus_interface::{FaceSyncService, BUS_NAME, OBJECT_PATH};
use events::TriggerBus;

/// What the GetLogs buffer records, independent of RUST_LOG.
const LOG_BUFFER_FILTER: &str = "info,zbus=warn";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    let logs = logbuf::LogBuffer::new(config.log_capacity);
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env()))
        .with(logs.layer().with_filter(EnvFilter::new(LOG_BUFFER_FILTER)))
        .init();

    let logs_path = config.logs_path();
    match logs.restore(&logs_path) {
        Ok(0) => {}
        Ok(n) => tracing::debug!(lines = n, "restored saved logs"),
        Err(e) => tracing::warn!(error = %e, path = %logs_path.display(), "cannot restore saved logs"),
    }

    tracing::info!(
        data_dir = %config.data_dir.display(),
        api_url = %config.api_url,
        bus = ?config.bus,
        "facesyncd starting"
    );

    let settings = Arc::new(
        settings::SettingsStore::open(config.settings_path())
            .await
            .context("opening settings store")?,
    );
    let store = identity_store::IdentityStore::new(
        Arc::clone(&settings),
        blobs::BlobStore::new(config.userdata_dir()),
    );
    let snapshots = snapshots::SnapshotRegistry::new(config.snapshot_ttl);
    let triggers = TriggerBus::new(64);

    let services = context::Services {
        store: store.clone(),
        snapshots: snapshots.clone(),
        triggers: triggers.clone(),
        legacy: reconciler::LegacyMigration::new(config.legacy_set_id.clone()),
        provider_factory: context::face_plus_plus(facesync_cloud::ClientOptions {
            base_url: config.api_url.clone(),
            timeout: config.request_timeout,
        }),
    };
    let supervisor = supervisor::Supervisor::new(
        Arc::clone(&settings),
        services,
        logs.clone(),
        Some(logs_path.clone()),
    )
    .spawn();

    // Initial context and startup sync.
    match supervisor.reload().await {
        Some(report) if !report.is_clean() => {
            tracing::warn!(failed = report.failed.len(), "startup face set sync incomplete")
        }
        Some(_) => {}
        None => tracing::info!("waiting for API credentials"),
    }

    let api = api::Api::new(
        supervisor,
        settings,
        store,
        snapshots,
        logs.clone(),
        Some(logs_path.clone()),
    );

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, FaceSyncService::new(api))?
        .build()
        .await
        .context("registering on D-Bus")?;

    tokio::spawn(forward_triggers(conn.clone(), triggers));

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "facesyncd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facesyncd shutting down");

    if let Err(e) = logs.save(&logs_path) {
        tracing::warn!(error = %e, "cannot save logs");
    }
    Ok(())
}

/// Re-emit every trigger event as a `FaceDetected` D-Bus signal.
async fn forward_triggers(conn: zbus::Connection, triggers: TriggerBus) {
    let mut rx = triggers.subscribe();
    let iface = match conn
        .object_server()
        .interface::<_, FaceSyncService>(OBJECT_PATH)
        .await
    {
        Ok(iface) => iface,
        Err(e) => {
            tracing::error!(error = %e, "cannot look up D-Bus interface; triggers will not be signalled");
            return;
        }
    };

    loop {
        match rx.recv().await {
            Ok(event) => {
                let payload = match serde_json::to_string(&event.payload) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "cannot encode trigger payload");
                        continue;
                    }
                };
                if let Err(e) = FaceSyncService::face_detected(iface.signal_emitter(), &payload).await {
                    tracing::warn!(error = %e, trigger = event.trigger, "cannot emit signal");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "trigger forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
