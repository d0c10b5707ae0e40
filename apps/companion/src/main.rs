//! printwatch companion entry point.
//!
//! One independent pipeline per configured printer: WebSocket transport into
//! the sync engine, snapshots into the orchestrator, one shared push client.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use printwatch_companion::{Companion, CompanionEvent, CompanionSettings};
use printwatch_fcm::PushClient;
use printwatch_notify::{NotifyConfig, RemoteConfig};
use printwatch_protocol::rpc::RpcFrame;
use printwatch_rpc::{ReconnectConfig, RpcConfig, TransportEvent, run_transport};
use printwatch_sync::{EngineEvent, StateSyncEngine};
use printwatch_webcam::WebcamManager;

use config::{AppConfig, PrinterConfig};

const RESYNC_RETRIES: u32 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting printwatch companion"
    );

    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = match AppConfig::load(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "no usable config file, using defaults");
            AppConfig::with_defaults()
        }
    };

    let notify = config.notify_config()?;
    let push = PushClient::new(&config.push.uri)?;
    let cancel = CancellationToken::new();

    let mut pipelines = Vec::new();
    for printer in config.printers.clone() {
        info!(
            printer = %printer.name,
            uri = %printer.moonraker_uri,
            "starting pipeline"
        );
        pipelines.push(tokio::spawn(run_printer(
            printer,
            config.general.include_snapshot,
            notify.clone(),
            push.clone(),
            cancel.clone(),
        )));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    cancel.cancel();
    for pipeline in pipelines {
        let _ = pipeline.await;
    }
    Ok(())
}

/// Runs one printer until cancelled: transport, sync engine, orchestrator.
async fn run_printer(
    printer: PrinterConfig,
    include_snapshot: bool,
    notify: NotifyConfig,
    push: PushClient,
    cancel: CancellationToken,
) {
    let (transport_tx, mut transport_rx) = mpsc::channel(16);
    let (engine_tx, engine_rx) = mpsc::channel(256);
    let (companion_tx, companion_rx) = mpsc::channel(16);

    let (engine, snapshots) = StateSyncEngine::new(&printer.name, RESYNC_RETRIES);

    let webcams = Arc::new(WebcamManager::new(&printer.moonraker_uri));
    let companion = Companion::new(
        &printer.name,
        notify,
        RemoteConfig::default(),
        push,
        webcams.clone(),
        CompanionSettings {
            exclude_sensors: printer.exclude_sensors.clone(),
            include_snapshot,
            snapshot_uri: printer.snapshot_uri.clone(),
            snapshot_rotation: printer.snapshot_rotation,
        },
    );

    // Server notifications feed the engine queue; a webcam config change
    // invalidates the cached snapshot clients.
    let notify_tx = engine_tx.clone();
    let notify_webcams = webcams.clone();
    let on_notify: Arc<dyn Fn(RpcFrame) + Send + Sync> = Arc::new(move |frame| {
        if frame.method.as_deref() == Some("notify_webcams_changed") {
            let webcams = notify_webcams.clone();
            tokio::spawn(async move { webcams.clear().await });
        }
        if notify_tx.try_send(EngineEvent::Notify(frame)).is_err() {
            warn!("engine queue full, dropping notification");
        }
    });

    // Connection lifecycle fans out to both consumers.
    let fan_engine = engine_tx;
    let fan_companion = companion_tx;
    let fanout = tokio::spawn(async move {
        while let Some(event) = transport_rx.recv().await {
            match event {
                TransportEvent::Connected(client) => {
                    let _ = fan_engine.send(EngineEvent::Connected(client.clone())).await;
                    let _ = fan_companion.send(CompanionEvent::Connected(client)).await;
                }
                TransportEvent::ConnectionLost => {
                    let _ = fan_engine.send(EngineEvent::ConnectionLost).await;
                    let _ = fan_companion.send(CompanionEvent::ConnectionLost).await;
                }
            }
        }
    });

    let engine_task = tokio::spawn(engine.run(engine_rx, cancel.clone()));
    let companion_task = tokio::spawn(companion.run(companion_rx, snapshots, cancel.clone()));

    run_transport(
        RpcConfig {
            uri: printer.moonraker_uri.clone(),
            api_key: printer.api_key.clone(),
        },
        ReconnectConfig::default(),
        transport_tx,
        on_notify,
        cancel,
    )
    .await;

    let _ = fanout.await;
    let _ = engine_task.await;
    let _ = companion_task.await;
    info!(printer = %printer.name, "pipeline stopped");
}
