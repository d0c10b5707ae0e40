//! Per-printer evaluation loop.
//!
//! One [`Companion`] consumes the sync engine's snapshot stream and, for
//! every snapshot that clears the cheap prefilter, runs a full evaluation
//! pass: fetch device records, run the rule engine per device, capture a
//! webcam still, write back markers and submit one batched push request.
//!
//! Passes are serialized through a lock so a slow webcam or relay cannot
//! interleave marker writes; snapshots arriving while a pass runs are
//! dropped after a timeout since a newer one will follow.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use printwatch_fcm::PushClient;
use printwatch_notify::evaluator::{GCODE_RESPONSE_PREFIX, M117_PREFIX};
use printwatch_notify::util::interval_reached;
use printwatch_notify::{EvaluationResult, NotificationEvaluator, NotifyConfig, RemoteConfig};
use printwatch_protocol::device::{
    DeviceNotificationConfig, MarkerUpdate, NotificationMarker, WebcamPref,
};
use printwatch_protocol::objects::EtaSource;
use printwatch_protocol::push::{DeviceRequest, NotificationPayload, PushRequest};
use printwatch_protocol::version::version_at_least;
use printwatch_sync::{PrinterApi, Snapshot};
use printwatch_webcam::{SnapshotClient, WebcamManager};

use crate::store::DeviceStore;

/// Upper bound for lock acquisition and for one full pass.
const EVAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Slack added to the time-based prefilter so it never races the
/// progress-bar interval it backs.
const THRESHOLD_SLACK_SECS: i64 = 5;

/// Cache key for the printer-level fallback camera.
const DEFAULT_WEBCAM_KEY: &str = "_default";

/// First app release that understands version 2 device requests.
const DEVICE_REQUEST_V2: &str = "2.6.10";

const ALL_ETA_SOURCES: [EtaSource; 3] =
    [EtaSource::File, EtaSource::Filament, EtaSource::Slicer];

/// Connection lifecycle, forwarded from the transport.
pub enum CompanionEvent<A: PrinterApi> {
    Connected(A),
    ConnectionLost,
}

/// Printer-level settings from the local config file.
#[derive(Debug, Clone)]
pub struct CompanionSettings {
    /// Sensors that never notify, unless a device overrides the list.
    pub exclude_sensors: Vec<String>,
    pub include_snapshot: bool,
    /// Fallback snapshot URL for devices without a webcam selection.
    pub snapshot_uri: Option<String>,
    pub snapshot_rotation: i32,
}

impl Default for CompanionSettings {
    fn default() -> Self {
        Self {
            exclude_sensors: Vec::new(),
            include_snapshot: true,
            snapshot_uri: None,
            snapshot_rotation: 0,
        }
    }
}

struct EvalState<A> {
    api: Option<A>,
    last_snapshot: Option<Snapshot>,
}

/// Orchestrates evaluation passes for one printer.
pub struct Companion<A: PrinterApi> {
    name: String,
    evaluator: NotificationEvaluator,
    remote: RemoteConfig,
    push: PushClient,
    webcams: Arc<WebcamManager>,
    settings: CompanionSettings,
    state: Mutex<EvalState<A>>,
    eval_lock: Mutex<()>,
}

impl<A: PrinterApi> Companion<A> {
    pub fn new(
        name: impl Into<String>,
        notify: NotifyConfig,
        remote: RemoteConfig,
        push: PushClient,
        webcams: Arc<WebcamManager>,
        settings: CompanionSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            evaluator: NotificationEvaluator::new(notify, remote.clone()),
            remote,
            push,
            webcams,
            settings,
            state: Mutex::new(EvalState {
                api: None,
                last_snapshot: None,
            }),
            eval_lock: Mutex::new(()),
        })
    }

    /// Main loop: tracks the connection and spawns one guarded pass per
    /// published snapshot. Returns when the token fires or both inputs
    /// close.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<CompanionEvent<A>>,
        mut snapshots: watch::Receiver<Snapshot>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(CompanionEvent::Connected(api)) => {
                        info!(printer = %self.name, "connected, announcing companion version");
                        self.state.lock().await.api = Some(api.clone());
                        let store = DeviceStore::new(api);
                        if let Err(e) = store.write_client_meta(env!("CARGO_PKG_VERSION")).await {
                            warn!(printer = %self.name, error = %e, "could not write companion meta");
                        }
                    }
                    Some(CompanionEvent::ConnectionLost) => {
                        self.state.lock().await.api = None;
                    }
                    None => break,
                },
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snap = snapshots.borrow_and_update().clone();
                    // The watch channel starts with a placeholder.
                    if snap.timestamp == DateTime::UNIX_EPOCH {
                        continue;
                    }
                    let companion = self.clone();
                    tokio::spawn(async move { companion.evaluate_guarded(snap).await });
                }
            }
        }
        info!(printer = %self.name, "orchestrator stopped");
    }

    async fn evaluate_guarded(self: Arc<Self>, snap: Snapshot) {
        let Ok(_guard) = timeout(EVAL_TIMEOUT, self.eval_lock.lock()).await else {
            warn!(printer = %self.name, "evaluation still running, dropping snapshot");
            return;
        };
        if timeout(EVAL_TIMEOUT, self.evaluate_pass(snap)).await.is_err() {
            warn!(printer = %self.name, "evaluation pass timed out");
        }
    }

    async fn evaluate_pass(&self, snap: Snapshot) {
        let now = Utc::now();
        let (api, last) = {
            let state = self.state.lock().await;
            (state.api.clone(), state.last_snapshot.clone())
        };
        let Some(api) = api else {
            return;
        };

        if !passes_threshold(
            last.as_ref(),
            &snap,
            &self.settings.exclude_sensors,
            &self.remote,
            now,
        ) {
            debug!(printer = %self.name, "snapshot below evaluation threshold");
            return;
        }
        self.state.lock().await.last_snapshot = Some(snap.clone());

        let store = DeviceStore::new(api.clone());
        let devices = store.fetch_devices().await;
        if devices.is_empty() {
            return;
        }

        // Images are fetched at most once per camera per pass.
        let mut image_cache: HashMap<String, Option<String>> = HashMap::new();
        let mut requests = Vec::new();

        for device in &devices {
            let exclude = device
                .settings
                .excluded_filament_sensors
                .clone()
                .unwrap_or_else(|| self.settings.exclude_sensors.clone());
            let result = self
                .evaluator
                .evaluate(device, &snap, last.as_ref(), &exclude, now);

            // A Live Activity that just ended will not come back; drop its
            // token record so the app can start a fresh one.
            if result.has_live_activity
                && !snap.print_state.is_active()
                && let Err(e) = store.delete_apns(&device.machine_id).await
            {
                warn!(
                    printer = %self.name,
                    device = %device.machine_id,
                    error = %e,
                    "could not clean up live activity record"
                );
            }

            let update = marker_update(&device.marker, &snap, &result, &exclude, now);
            let applied = device.marker.apply(update);
            if applied != device.marker
                && let Err(e) = store.write_marker(&device.machine_id, &applied).await
            {
                warn!(
                    printer = %self.name,
                    device = %device.machine_id,
                    error = %e,
                    "marker write failed"
                );
            }

            let mut notifications = result.notifications;
            if notifications.is_empty() {
                continue;
            }

            let wants_image = notifications
                .iter()
                .any(|n| matches!(n, NotificationPayload::Notification(_)));
            if wants_image
                && let Some(image) = self
                    .snapshot_for_device(&api, device, &mut image_cache)
                    .await
            {
                for payload in &mut notifications {
                    if let NotificationPayload::Notification(content) = payload {
                        content.image = Some(image.clone());
                    }
                }
            }

            let v2 = device
                .version
                .as_deref()
                .is_some_and(|v| version_at_least(v, DEVICE_REQUEST_V2));
            requests.push(DeviceRequest {
                version: if v2 { 2 } else { 1 },
                printer_id: device.machine_id.clone(),
                token: device.fcm_token.clone(),
                notifications,
            });
        }

        if requests.is_empty() {
            return;
        }
        info!(
            printer = %self.name,
            devices = requests.len(),
            "submitting evaluation results"
        );
        // Delivery is at-most-once; the next snapshot supersedes the payload.
        if let Err(e) = self.push.push(&PushRequest::new(requests)).await {
            warn!(printer = %self.name, error = %e, "push failed, payload dropped");
        }
    }

    /// Base64 still for one device, honoring its webcam preference and
    /// falling back to the printer-level snapshot URL.
    async fn snapshot_for_device(
        &self,
        api: &A,
        device: &DeviceNotificationConfig,
        cache: &mut HashMap<String, Option<String>>,
    ) -> Option<String> {
        if !self.settings.include_snapshot {
            return None;
        }
        let (key, client) = match &device.settings.snapshot_webcam {
            Some(WebcamPref::Disabled) => return None,
            Some(WebcamPref::Webcam(uid)) => {
                if let Some(cached) = cache.get(uid) {
                    return cached.clone();
                }
                (uid.clone(), self.webcams.client_for(api, uid).await)
            }
            None => {
                if let Some(cached) = cache.get(DEFAULT_WEBCAM_KEY) {
                    return cached.clone();
                }
                let client = self.settings.snapshot_uri.as_deref().and_then(|uri| {
                    SnapshotClient::from_uri(uri, self.settings.snapshot_rotation).ok()
                });
                (DEFAULT_WEBCAM_KEY.to_owned(), client)
            }
        };

        let image = match client {
            None => None,
            Some(client) => match client.capture_base64().await {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!(printer = %self.name, error = %e, "webcam capture failed");
                    None
                }
            },
        };
        cache.insert(key, image.clone());
        image
    }
}

fn sensor_excluded(key: &str, kind: &str, name: &str, exclude: &[String]) -> bool {
    let qualified = format!("{kind}#{name}");
    exclude.iter().any(|e| e == key || e == &qualified)
}

/// Cheap prefilter over two snapshots: only changes that could possibly
/// produce a notification are worth fetching device records for.
fn passes_threshold(
    last: Option<&Snapshot>,
    snap: &Snapshot,
    exclude_sensors: &[String],
    remote: &RemoteConfig,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last else {
        return true;
    };

    if last.print_state != snap.print_state && !snap.is_timelapse_pause() {
        return true;
    }
    if last.m117_hash != snap.m117_hash
        && snap.m117.as_deref().is_some_and(|m| m.starts_with(M117_PREFIX))
    {
        return true;
    }
    if last.gcode_response_hash != snap.gcode_response_hash
        && snap
            .gcode_response
            .as_deref()
            .is_some_and(|r| r.starts_with(GCODE_RESPONSE_PREFIX))
    {
        return true;
    }
    if !last.eta_available(&ALL_ETA_SOURCES) && snap.eta_available(&ALL_ETA_SOURCES) {
        return true;
    }

    let last_progress = last.progress();
    let progress = snap.progress();
    if last_progress != progress {
        match (last_progress, progress) {
            (Some(l), Some(c)) => {
                if interval_reached(l, c, remote.increments) {
                    return true;
                }
            }
            _ => return true,
        }
    }

    for (key, sensor) in &snap.filament_sensors {
        if sensor_excluded(key, sensor.kind.as_str(), &sensor.name, exclude_sensors) {
            continue;
        }
        match last.filament_sensors.get(key) {
            None => return true,
            Some(prev)
                if prev.filament_detected != sensor.filament_detected
                    || prev.enabled != sensor.enabled =>
            {
                return true;
            }
            Some(_) => {}
        }
    }

    (now - last.timestamp).num_seconds() >= remote.interval_secs + THRESHOLD_SLACK_SECS
}

/// Marker fields to advance after one pass. The bucket fields only move
/// when their rule actually fired, so a skipped notification stays due.
fn marker_update(
    marker: &NotificationMarker,
    snap: &Snapshot,
    result: &EvaluationResult,
    exclude_sensors: &[String],
    now: DateTime<Utc>,
) -> MarkerUpdate {
    let mut update = MarkerUpdate::default();

    if marker.state != Some(snap.print_state) && !snap.is_timelapse_pause() {
        update.state = Some(snap.print_state);
    }

    // Buckets restart at zero once the job leaves the active states.
    let bucket = if snap.print_state.is_active() {
        snap.progress().unwrap_or(0)
    } else {
        0
    };
    if result.has_progress {
        update.progress = Some(bucket);
        update.last_progress = Some(now);
    }
    if result.has_progressbar {
        update.progress_progressbar = Some(bucket);
        update.last_progress_progressbar = Some(now);
    }
    if result.has_live_activity {
        update.progress_live_activity = Some(bucket);
        update.last_progress_live_activity = Some(now);
    }

    if marker.m117 != snap.m117_hash {
        update.m117 = Some(snap.m117_hash.clone());
    }
    if !snap.gcode_response_hash.is_empty()
        && marker.gcode_response.as_deref() != Some(snap.gcode_response_hash.as_str())
    {
        update.gcode_response = Some(snap.gcode_response_hash.clone());
    }

    update.filament_sensors = Some(
        snap.filament_sensors
            .iter()
            .filter(|(key, sensor)| {
                !sensor.filament_detected
                    && !sensor_excluded(key, sensor.kind.as_str(), &sensor.name, exclude_sensors)
            })
            .map(|(key, _)| key.clone())
            .collect(),
    );

    update
}
