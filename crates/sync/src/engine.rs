//! Merges daemon status updates into tracked printer objects and publishes
//! snapshots.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use printwatch_protocol::objects::{ObjectKey, ObjectKind};
use printwatch_protocol::printer::{
    DisplayStatus, FilamentSensor, GcodeFileMeta, GcodeMove, PrintStats, SensorKind, ServerInfo,
    Toolhead, VirtualSdCard,
};
use printwatch_protocol::rpc::RpcFrame;
use printwatch_rpc::RpcError;

use crate::api::PrinterApi;
use crate::snapshot::Snapshot;

/// Objects tracked for updates when the printer exposes them. Entries
/// without a name match every instance of that kind; the macro entry must
/// match exactly.
const OBJECTS_OF_INTEREST: &[&str] = &[
    "print_stats",
    "display_status",
    "virtual_sdcard",
    "toolhead",
    "gcode_move",
    "gcode_macro TIMELAPSE_TAKE_FRAME",
    "filament_switch_sensor",
    "filament_motion_sensor",
];

const TIMELAPSE_MACRO: &str = "TIMELAPSE_TAKE_FRAME";

/// Cap for the firmware-ready backoff between resync attempts.
const RESYNC_MAX_BACKOFF_SECS: u64 = 5 * 60;

/// Input to the engine loop: connection lifecycle plus raw notifications.
pub enum EngineEvent<A> {
    /// A fresh connection; the engine resynchronises from scratch.
    Connected(A),
    ConnectionLost,
    /// An unsolicited server notification frame.
    Notify(RpcFrame),
}

/// Stateful sync engine for one printer.
///
/// Consumes [`EngineEvent`]s, keeps the merged object state, and publishes a
/// fresh [`Snapshot`] through the watch channel after every change. Slow
/// consumers only ever observe the most recent snapshot.
pub struct StateSyncEngine<A: PrinterApi> {
    name: String,
    api: Option<A>,
    resync_retries: u32,
    /// Set once a subscribe succeeded for the current connection.
    queried_for_session: bool,
    klippy_ready: bool,
    server_info: ServerInfo,
    print_stats: PrintStats,
    display_status: DisplayStatus,
    virtual_sdcard: VirtualSdCard,
    toolhead: Toolhead,
    gcode_move: GcodeMove,
    current_file: Option<GcodeFileMeta>,
    gcode_response: Option<String>,
    timelapse_pause: Option<bool>,
    /// Deferred clear: the macro finished, but the pause flag must survive
    /// until the print state actually leaves `paused`.
    reset_timelapse_pause: bool,
    filament_sensors: BTreeMap<String, FilamentSensor>,
    /// Objects from the last `printer.objects.list` that we track, as the
    /// subscription parameter map (`object -> null`).
    subscription: Map<String, Value>,
    snapshot_tx: watch::Sender<Snapshot>,
    /// Shutdown token from [`StateSyncEngine::run`]; also aborts the resync
    /// backoff so a not-ready printer cannot delay shutdown.
    cancel: CancellationToken,
}

impl<A: PrinterApi> StateSyncEngine<A> {
    /// Creates an engine plus the receiver for its published snapshots.
    pub fn new(name: impl Into<String>, resync_retries: u32) -> (Self, watch::Receiver<Snapshot>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let engine = Self {
            name: name.into(),
            api: None,
            resync_retries,
            queried_for_session: false,
            klippy_ready: false,
            server_info: ServerInfo::default(),
            print_stats: PrintStats::default(),
            display_status: DisplayStatus::default(),
            virtual_sdcard: VirtualSdCard::default(),
            toolhead: Toolhead::default(),
            gcode_move: GcodeMove::default(),
            current_file: None,
            gcode_response: None,
            timelapse_pause: None,
            reset_timelapse_pause: false,
            filament_sensors: BTreeMap::new(),
            subscription: Map::new(),
            snapshot_tx,
            cancel: CancellationToken::new(),
        };
        (engine, snapshot_rx)
    }

    /// Runs the engine until the event source closes or `cancel` fires.
    pub async fn run(mut self, mut events: mpsc::Receiver<EngineEvent<A>>, cancel: CancellationToken) {
        self.cancel = cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => match event {
                    None => return,
                    Some(EngineEvent::Connected(api)) => {
                        self.api = Some(api);
                        self.queried_for_session = false;
                        self.resync().await;
                    }
                    Some(EngineEvent::ConnectionLost) => {
                        info!(printer = %self.name, "connection lost, state is stale");
                        self.api = None;
                        self.klippy_ready = false;
                        self.queried_for_session = false;
                        self.publish();
                    }
                    Some(EngineEvent::Notify(frame)) => self.handle_notify(frame).await,
                }
            }
        }
    }

    async fn handle_notify(&mut self, frame: RpcFrame) {
        let Some(method) = frame.method.as_deref() else {
            return;
        };
        match method {
            "notify_status_update" => {
                if let Some(status) = frame.first_param().cloned() {
                    self.apply_status(&status).await;
                }
            }
            "notify_klippy_ready" => {
                info!(printer = %self.name, "firmware reported ready");
                self.resync().await;
            }
            "notify_klippy_shutdown" => {
                info!(printer = %self.name, "firmware reported shutdown");
                self.klippy_ready = false;
                self.queried_for_session = false;
                self.publish();
            }
            "notify_klippy_disconnected" => {
                info!(printer = %self.name, "daemon lost its firmware connection");
                self.klippy_ready = false;
                self.queried_for_session = false;
                self.publish();
            }
            "notify_gcode_response" => {
                if let Some(line) = frame.first_param().and_then(Value::as_str) {
                    // Console responses carry a `// ` comment prefix.
                    let line = line.strip_prefix("// ").unwrap_or(line);
                    debug!(printer = %self.name, line, "gcode response");
                    self.gcode_response = Some(line.to_owned());
                    self.publish();
                }
            }
            other => {
                debug!(printer = %self.name, method = other, "ignoring notification");
            }
        }
    }

    /// Merges a batch of partial status objects, then publishes. Fields the
    /// batch does not mention keep their previous values.
    async fn apply_status(&mut self, status: &Value) {
        let Some(objects) = status.as_object() else {
            return;
        };

        let mut fetch_meta = false;
        for (raw_key, data) in objects {
            let key = ObjectKey::parse(raw_key);
            match key.kind {
                ObjectKind::PrintStats => {
                    self.print_stats = self.print_stats.update_with(data);
                    // The macro finished earlier; clear the mask now that the
                    // job has moved on from paused.
                    if self.print_stats.state != printwatch_protocol::PrintState::Paused
                        && self.reset_timelapse_pause
                    {
                        self.timelapse_pause = Some(false);
                        self.reset_timelapse_pause = false;
                        info!(printer = %self.name, "print resumed after timelapse frame");
                    }
                    fetch_meta = true;
                }
                ObjectKind::DisplayStatus => {
                    self.display_status = self.display_status.update_with(data);
                }
                ObjectKind::VirtualSdcard => {
                    self.virtual_sdcard = self.virtual_sdcard.update_with(data);
                }
                ObjectKind::Toolhead => {
                    self.toolhead = self.toolhead.update_with(data);
                }
                ObjectKind::GcodeMove => {
                    self.gcode_move = self.gcode_move.update_with(data);
                }
                ObjectKind::FilamentSwitchSensor | ObjectKind::FilamentMotionSensor => {
                    let Some(name) = key.name.as_deref() else {
                        warn!(printer = %self.name, "filament sensor without a name, skipping");
                        continue;
                    };
                    let kind = SensorKind::from_object_kind(key.kind)
                        .unwrap_or(SensorKind::FilamentSwitchSensor);
                    let sensor = self
                        .filament_sensors
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| FilamentSensor::new(name, kind));
                    self.filament_sensors
                        .insert(name.to_owned(), sensor.update_with(data));
                }
                ObjectKind::GcodeMacro if key.name.as_deref() == Some(TIMELAPSE_MACRO) => {
                    self.apply_timelapse_macro(data);
                }
                _ => {
                    debug!(printer = %self.name, object = raw_key, "ignoring object update");
                }
            }
        }

        if fetch_meta {
            self.sync_current_file().await;
        } else {
            self.publish();
        }
    }

    fn apply_timelapse_macro(&mut self, data: &Value) {
        match data.get("is_paused").and_then(Value::as_bool) {
            Some(true) => {
                // The pause that follows belongs to the plugin, not the user.
                self.timelapse_pause = Some(true);
                self.reset_timelapse_pause = false;
                info!(printer = %self.name, "timelapse plugin paused the printer");
            }
            Some(false) if !self.reset_timelapse_pause => {
                // The state change back to printing can arrive in a later
                // notification, so the mask is cleared lazily on the next
                // print_stats update instead of right here.
                self.reset_timelapse_pause = true;
                info!(printer = %self.name, "timelapse frame taken, clearing mask on next state change");
            }
            _ => {}
        }
    }

    /// Full resynchronisation: drop all state, wait for the firmware to be
    /// ready (with backoff), query everything, subscribe once per session.
    pub async fn resync(&mut self) {
        info!(printer = %self.name, "resyncing");
        self.server_info = ServerInfo::default();
        self.print_stats = PrintStats::default();
        self.display_status = DisplayStatus::default();
        self.virtual_sdcard = VirtualSdCard::default();
        self.toolhead = Toolhead::default();
        self.gcode_move = GcodeMove::default();
        self.current_file = None;
        self.gcode_response = None;
        self.timelapse_pause = None;
        self.reset_timelapse_pause = false;
        self.filament_sensors.clear();
        self.klippy_ready = false;

        for attempt in 0..self.resync_retries {
            self.sync_klippy_state().await;
            if self.klippy_ready {
                self.sync_printer_objects().await;
                break;
            }
            let wait_for = 2u64
                .saturating_pow(attempt.saturating_add(1).min(32))
                .min(RESYNC_MAX_BACKOFF_SECS);
            warn!(
                printer = %self.name,
                attempt,
                wait_secs = wait_for,
                "firmware not ready, retrying resync"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(printer = %self.name, "shutdown during resync backoff");
                    return;
                }
                _ = tokio::time::sleep(std::time::Duration::from_secs(wait_for)) => {}
            }
        }

        if !self.klippy_ready {
            warn!(
                printer = %self.name,
                retries = self.resync_retries,
                "giving up on resync, firmware never became ready"
            );
            self.publish();
            return;
        }

        if !self.queried_for_session {
            self.queried_for_session = true;
            if let Err(e) = self.subscribe_for_updates().await {
                warn!(printer = %self.name, error = %e, "subscribe failed");
                self.queried_for_session = false;
            }
        }
        info!(printer = %self.name, "resync complete");
    }

    async fn sync_klippy_state(&mut self) {
        let Some(api) = self.api.clone() else {
            return;
        };
        match api.send("server.info", None).await {
            Ok(info) => {
                self.server_info = self.server_info.update_with(&info);
                self.klippy_ready = self.server_info.klippy_state.is_ready();
            }
            Err(e) => {
                warn!(printer = %self.name, error = %e, "server.info failed");
            }
        }
    }

    async fn sync_printer_objects(&mut self) {
        let Some(api) = self.api.clone() else {
            return;
        };

        let list = match api.send("printer.objects.list", None).await {
            Ok(response) => response,
            Err(e) => {
                warn!(printer = %self.name, error = %e, "printer.objects.list failed");
                return;
            }
        };

        self.subscription = Map::new();
        if let Some(objects) = list.get("objects").and_then(Value::as_array) {
            for raw in objects.iter().filter_map(Value::as_str) {
                let kind = ObjectKey::parse(raw).kind.as_str();
                if OBJECTS_OF_INTEREST.contains(&kind) || OBJECTS_OF_INTEREST.contains(&raw) {
                    self.subscription.insert(raw.to_owned(), Value::Null);
                }
            }
        }
        info!(
            printer = %self.name,
            objects = ?self.subscription.keys().collect::<Vec<_>>(),
            "tracking printer objects"
        );

        let params = json!({"objects": Value::Object(self.subscription.clone())});
        match api.send("printer.objects.query", Some(params)).await {
            Ok(response) => {
                if let Some(status) = response.get("status") {
                    Box::pin(self.apply_status(status)).await;
                }
            }
            Err(e) => {
                warn!(printer = %self.name, error = %e, "printer.objects.query failed");
            }
        }
    }

    async fn subscribe_for_updates(&mut self) -> Result<(), RpcError> {
        let Some(api) = self.api.clone() else {
            return Err(RpcError::Closed);
        };
        let params = json!({"objects": Value::Object(self.subscription.clone())});
        api.send("printer.objects.subscribe", Some(params)).await?;
        info!(printer = %self.name, "subscribed to printer objects");
        Ok(())
    }

    /// Keeps the metadata cache in step with the loaded file, then publishes.
    async fn sync_current_file(&mut self) {
        let loaded = self.print_stats.filename.clone();
        match loaded {
            Some(filename) => {
                let cached = self
                    .current_file
                    .as_ref()
                    .is_some_and(|f| f.filename == filename);
                if !cached {
                    self.current_file = self.fetch_gcode_meta(&filename).await;
                }
            }
            None => {
                self.current_file = None;
            }
        }
        self.publish();
    }

    async fn fetch_gcode_meta(&self, filename: &str) -> Option<GcodeFileMeta> {
        let api = self.api.clone()?;
        info!(printer = %self.name, filename, "fetching gcode metadata");
        let params = json!({"filename": filename});
        match api.send("server.files.metadata", Some(params)).await {
            Ok(meta) => match serde_json::from_value(meta) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    warn!(printer = %self.name, filename, error = %e, "unparseable metadata");
                    None
                }
            },
            // A known-missing file gets a placeholder so the lookup is not
            // retried on every status update.
            Err(RpcError::Server { message, .. })
                if message.contains("Metadata not availab") =>
            {
                warn!(printer = %self.name, filename, "no metadata available");
                Some(GcodeFileMeta::placeholder(filename))
            }
            Err(e) => {
                warn!(printer = %self.name, filename, error = %e, "metadata fetch failed");
                None
            }
        }
    }

    /// Builds a snapshot of the current state and pushes it to the watch
    /// channel.
    fn publish(&self) {
        self.snapshot_tx.send_replace(self.build_snapshot());
    }

    fn build_snapshot(&self) -> Snapshot {
        let m117 = self.display_status.message.clone();
        let m117_hash = m117.as_deref().map(sha256_hex).unwrap_or_default();
        let gcode_response_hash = self
            .gcode_response
            .as_deref()
            .map(sha256_hex)
            .unwrap_or_default();
        Snapshot {
            timestamp: Utc::now(),
            klippy_ready: self.klippy_ready,
            print_state: if self.klippy_ready {
                self.print_stats.state
            } else {
                printwatch_protocol::PrintState::Error
            },
            m117,
            m117_hash,
            print_stats: self.print_stats.clone(),
            virtual_sdcard: self.virtual_sdcard.clone(),
            toolhead: self.toolhead.clone(),
            gcode_move: self.gcode_move.clone(),
            current_file: self.current_file.clone(),
            gcode_response: self.gcode_response.clone(),
            gcode_response_hash,
            timelapse_pause: self.timelapse_pause,
            filament_sensors: self.filament_sensors.clone(),
        }
    }
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use printwatch_protocol::PrintState;

    use super::*;

    /// Scripted API: canned responses per method, records every call.
    #[derive(Clone, Default)]
    struct ScriptedApi {
        responses: Arc<Mutex<HashMap<String, Vec<Result<Value, String>>>>>,
        calls: Arc<Mutex<Vec<(String, Option<Value>)>>>,
    }

    impl ScriptedApi {
        fn respond(&self, method: &str, response: Value) {
            self.responses
                .lock()
                .unwrap()
                .entry(method.to_owned())
                .or_default()
                .push(Ok(response));
        }

        fn fail(&self, method: &str, message: &str) {
            self.responses
                .lock()
                .unwrap()
                .entry(method.to_owned())
                .or_default()
                .push(Err(message.to_owned()));
        }

        fn calls(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(m, _)| m.clone())
                .collect()
        }
    }

    impl PrinterApi for ScriptedApi {
        async fn send(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_owned(), params));
            let mut responses = self.responses.lock().unwrap();
            let queue = responses.get_mut(method);
            match queue.and_then(|q| if q.is_empty() { None } else { Some(q.remove(0)) }) {
                Some(Ok(v)) => Ok(v),
                Some(Err(message)) => Err(RpcError::Server {
                    code: None,
                    message,
                }),
                None => panic!("unscripted method: {method}"),
            }
        }
    }

    fn ready_api() -> ScriptedApi {
        let api = ScriptedApi::default();
        api.respond("server.info", json!({"klippy_state": "ready"}));
        api.respond(
            "printer.objects.list",
            json!({"objects": [
                "print_stats", "display_status", "virtual_sdcard", "toolhead",
                "gcode_move", "gcode_macro TIMELAPSE_TAKE_FRAME",
                "filament_switch_sensor runout", "extruder", "heater_bed",
                "gcode_macro START_PRINT"
            ]}),
        );
        api.respond(
            "printer.objects.query",
            json!({"status": {
                "print_stats": {"state": "standby", "filename": ""},
                "display_status": {"message": null, "progress": 0.0},
                "filament_switch_sensor runout": {"enabled": true, "filament_detected": true}
            }}),
        );
        api.respond("printer.objects.subscribe", json!({}));
        api
    }

    fn engine() -> (StateSyncEngine<ScriptedApi>, watch::Receiver<Snapshot>) {
        StateSyncEngine::new("test_printer", 3)
    }

    #[tokio::test]
    async fn resync_queries_and_subscribes_interest_list() {
        let (mut engine, rx) = engine();
        let api = ready_api();
        engine.api = Some(api.clone());
        engine.resync().await;

        assert_eq!(
            api.calls(),
            vec![
                "server.info",
                "printer.objects.list",
                "printer.objects.query",
                "printer.objects.subscribe",
            ]
        );

        // Only objects on the interest list are tracked; extruder and
        // unrelated macros are left out.
        let tracked: Vec<&String> = engine.subscription.keys().collect();
        assert!(tracked.iter().any(|k| *k == "print_stats"));
        assert!(tracked.iter().any(|k| *k == "gcode_macro TIMELAPSE_TAKE_FRAME"));
        assert!(tracked.iter().any(|k| *k == "filament_switch_sensor runout"));
        assert!(!tracked.iter().any(|k| *k == "extruder"));
        assert!(!tracked.iter().any(|k| *k == "gcode_macro START_PRINT"));

        let snap = rx.borrow().clone();
        assert!(snap.klippy_ready);
        assert_eq!(snap.print_state, PrintState::Standby);
        assert!(snap.filament_sensors.contains_key("runout"));
    }

    #[tokio::test]
    async fn resync_backs_off_until_firmware_ready() {
        tokio::time::pause();
        let (mut engine, _rx) = engine();
        let api = ScriptedApi::default();
        api.respond("server.info", json!({"klippy_state": "startup"}));
        api.respond("server.info", json!({"klippy_state": "ready"}));
        api.respond("printer.objects.list", json!({"objects": ["print_stats"]}));
        api.respond(
            "printer.objects.query",
            json!({"status": {"print_stats": {"state": "standby"}}}),
        );
        api.respond("printer.objects.subscribe", json!({}));
        engine.api = Some(api.clone());

        engine.resync().await;

        assert!(engine.klippy_ready);
        assert_eq!(
            api.calls()
                .iter()
                .filter(|m| m.as_str() == "server.info")
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn resync_gives_up_after_retries_and_publishes_error_state() {
        tokio::time::pause();
        let (mut engine, rx) = engine();
        let api = ScriptedApi::default();
        for _ in 0..3 {
            api.respond("server.info", json!({"klippy_state": "shutdown"}));
        }
        engine.api = Some(api.clone());

        engine.resync().await;

        assert!(!engine.klippy_ready);
        let snap = rx.borrow().clone();
        assert_eq!(snap.print_state, PrintState::Error);
    }

    #[tokio::test]
    async fn resync_backoff_stops_on_shutdown() {
        tokio::time::pause();
        let (mut engine, _rx) = engine();
        let api = ScriptedApi::default();
        for _ in 0..3 {
            api.respond("server.info", json!({"klippy_state": "startup"}));
        }
        engine.api = Some(api.clone());
        engine.cancel.cancel();

        engine.resync().await;

        // Cancelled before the first backoff elapsed, so no retry happened.
        assert!(!engine.klippy_ready);
        assert_eq!(
            api.calls()
                .iter()
                .filter(|m| m.as_str() == "server.info")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn status_updates_merge_preserving_prior_fields() {
        let (mut engine, rx) = engine();
        let api = ScriptedApi::default();
        api.respond(
            "server.files.metadata",
            json!({"filename": "benchy.gcode", "estimated_time": 3600.0}),
        );
        engine.api = Some(api.clone());
        engine.klippy_ready = true;

        engine
            .apply_status(&json!({
                "print_stats": {"state": "printing", "filename": "benchy.gcode"},
                "virtual_sdcard": {"progress": 0.1, "file_position": 1000}
            }))
            .await;
        engine
            .apply_status(&json!({
                "display_status": {"message": "warming up"}
            }))
            .await;

        let snap = rx.borrow().clone();
        // Earlier fields survive updates that do not mention them.
        assert_eq!(snap.print_state, PrintState::Printing);
        assert_eq!(snap.virtual_sdcard.progress, 0.1);
        assert_eq!(snap.m117.as_deref(), Some("warming up"));
        assert_eq!(
            snap.current_file.as_ref().map(|f| f.filename.as_str()),
            Some("benchy.gcode")
        );
        // Metadata fetched exactly once for the new filename.
        assert_eq!(api.calls(), vec!["server.files.metadata"]);
    }

    #[tokio::test]
    async fn metadata_not_fetched_again_for_same_file() {
        let (mut engine, _rx) = engine();
        let api = ScriptedApi::default();
        api.respond("server.files.metadata", json!({"filename": "a.gcode"}));
        engine.api = Some(api.clone());
        engine.klippy_ready = true;

        let update = json!({"print_stats": {"state": "printing", "filename": "a.gcode"}});
        engine.apply_status(&update).await;
        engine.apply_status(&update).await;

        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn missing_metadata_gets_placeholder() {
        let (mut engine, _rx) = engine();
        let api = ScriptedApi::default();
        api.fail("server.files.metadata", "Metadata not availabe for file x");
        engine.api = Some(api.clone());
        engine.klippy_ready = true;

        engine
            .apply_status(&json!({"print_stats": {"filename": "x.gcode", "state": "printing"}}))
            .await;

        let file = engine.current_file.as_ref().unwrap();
        assert_eq!(file.filename, "x.gcode");
        assert_eq!(file.estimated_time, None);

        // The placeholder prevents a refetch.
        engine
            .apply_status(&json!({"print_stats": {"filename": "x.gcode"}}))
            .await;
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn cleared_filename_drops_metadata() {
        let (mut engine, _rx) = engine();
        let api = ScriptedApi::default();
        api.respond("server.files.metadata", json!({"filename": "a.gcode"}));
        engine.api = Some(api.clone());
        engine.klippy_ready = true;

        engine
            .apply_status(&json!({"print_stats": {"filename": "a.gcode", "state": "printing"}}))
            .await;
        assert!(engine.current_file.is_some());

        engine
            .apply_status(&json!({"print_stats": {"filename": null, "state": "standby"}}))
            .await;
        assert!(engine.current_file.is_none());
    }

    #[tokio::test]
    async fn timelapse_pause_masks_until_state_leaves_paused() {
        let (mut engine, rx) = engine();
        engine.klippy_ready = true;

        // Plugin announces it paused the printer.
        engine
            .apply_status(&json!({
                "gcode_macro TIMELAPSE_TAKE_FRAME": {"is_paused": true}
            }))
            .await;
        engine
            .apply_status(&json!({"print_stats": {"state": "paused"}}))
            .await;
        assert!(rx.borrow().is_timelapse_pause());

        // Frame taken: flag must survive while the state is still paused.
        engine
            .apply_status(&json!({
                "gcode_macro TIMELAPSE_TAKE_FRAME": {"is_paused": false}
            }))
            .await;
        assert!(rx.borrow().is_timelapse_pause());

        // Only the transition back to printing clears the mask.
        engine
            .apply_status(&json!({"print_stats": {"state": "printing"}}))
            .await;
        let snap = rx.borrow().clone();
        assert_eq!(snap.timelapse_pause, Some(false));
        assert!(!snap.is_timelapse_pause());
    }

    #[tokio::test]
    async fn gcode_response_strips_comment_prefix_and_hashes() {
        let (mut engine, rx) = engine();
        engine.klippy_ready = true;

        let frame: RpcFrame = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "method": "notify_gcode_response",
            "params": ["// MR_NOTIFY:Door|Open"]
        }))
        .unwrap();
        engine.handle_notify(frame).await;

        let snap = rx.borrow().clone();
        assert_eq!(snap.gcode_response.as_deref(), Some("MR_NOTIFY:Door|Open"));
        assert_eq!(snap.gcode_response_hash, sha256_hex("MR_NOTIFY:Door|Open"));
    }

    #[tokio::test]
    async fn klippy_shutdown_publishes_error_state() {
        let (mut engine, rx) = engine();
        engine.klippy_ready = true;
        engine
            .apply_status(&json!({"print_stats": {"state": "printing"}}))
            .await;
        assert_eq!(rx.borrow().print_state, PrintState::Printing);

        let frame: RpcFrame = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "method": "notify_klippy_shutdown",
            "params": []
        }))
        .unwrap();
        engine.handle_notify(frame).await;

        let snap = rx.borrow().clone();
        assert!(!snap.klippy_ready);
        assert_eq!(snap.print_state, PrintState::Error);
    }

    #[tokio::test]
    async fn m117_hash_tracks_message() {
        let (mut engine, rx) = engine();
        engine.klippy_ready = true;

        engine
            .apply_status(&json!({"display_status": {"message": "$MR$:hello"}}))
            .await;
        let first = rx.borrow().m117_hash.clone();
        assert_eq!(first, sha256_hex("$MR$:hello"));

        engine
            .apply_status(&json!({"display_status": {"message": ""}}))
            .await;
        let snap = rx.borrow().clone();
        assert_eq!(snap.m117, None);
        assert_eq!(snap.m117_hash, "");
    }
}
