//! Printer sub-object state with partial-merge updates.
//!
//! Every sub-object follows the same rule: `update_with` produces a new value
//! in which only the fields present in the incoming payload are overwritten,
//! everything else keeps its prior value. An empty payload is a no-op.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::objects::{KlippyState, ObjectKind, PrintState};

fn opt_string(v: &Value) -> Option<String> {
    v.as_str().map(str::to_owned)
}

fn vec_f64(v: &Value) -> Option<Vec<f64>> {
    v.as_array()
        .map(|arr| arr.iter().filter_map(Value::as_f64).collect())
}

/// Klippy readiness as reported by the server-info query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerInfo {
    pub klippy_state: KlippyState,
    pub message: Option<String>,
}

impl ServerInfo {
    pub fn update_with(&self, data: &Value) -> Self {
        let mut n = self.clone();
        if let Some(v) = data.get("klippy_state").and_then(Value::as_str) {
            n.klippy_state = KlippyState::from_wire(v);
        }
        if let Some(v) = data.get("state_message") {
            n.message = opt_string(v);
        }
        n
    }
}

/// Print job statistics (`print_stats`).
#[derive(Debug, Clone, PartialEq)]
pub struct PrintStats {
    pub filename: Option<String>,
    pub total_duration: f64,
    pub print_duration: f64,
    pub filament_used: f64,
    pub total_layer: Option<u32>,
    pub current_layer: Option<u32>,
    pub state: PrintState,
    pub message: Option<String>,
}

impl Default for PrintStats {
    fn default() -> Self {
        Self {
            filename: None,
            total_duration: 0.0,
            print_duration: 0.0,
            filament_used: 0.0,
            total_layer: None,
            current_layer: None,
            state: PrintState::Error,
            message: None,
        }
    }
}

impl PrintStats {
    pub fn update_with(&self, data: &Value) -> Self {
        let mut n = self.clone();
        if let Some(v) = data.get("filename") {
            n.filename = opt_string(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = data.get("total_duration").and_then(Value::as_f64) {
            n.total_duration = v;
        }
        if let Some(v) = data.get("print_duration").and_then(Value::as_f64) {
            n.print_duration = v;
        }
        if let Some(v) = data.get("filament_used").and_then(Value::as_f64) {
            n.filament_used = v;
        }
        if let Some(v) = data.get("state").and_then(Value::as_str) {
            n.state = PrintState::from_wire(v);
        }
        if let Some(v) = data.get("message") {
            n.message = opt_string(v);
        }
        // Layer counters live in a nested `info` block. The block is only
        // patched when present so that an unrelated partial update does not
        // wipe previously reported layers.
        if let Some(info) = data.get("info").and_then(Value::as_object) {
            n.total_layer = info.get("total_layer").and_then(Value::as_u64).map(|v| v as u32);
            n.current_layer = info
                .get("current_layer")
                .and_then(Value::as_u64)
                .map(|v| v as u32);
        }
        n
    }
}

/// M117 message and display progress (`display_status`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DisplayStatus {
    pub message: Option<String>,
    pub progress: f64,
}

impl DisplayStatus {
    pub fn update_with(&self, data: &Value) -> Self {
        let mut n = self.clone();
        if let Some(v) = data.get("message") {
            n.message = v.as_str().map(|s| s.trim().to_owned()).filter(|s| !s.is_empty());
        }
        if let Some(v) = data.get("progress").and_then(Value::as_f64) {
            n.progress = v;
        }
        n
    }
}

/// Byte position and fractional progress of the active file (`virtual_sdcard`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VirtualSdCard {
    pub file_position: u64,
    pub progress: f64,
}

impl VirtualSdCard {
    pub fn update_with(&self, data: &Value) -> Self {
        let mut n = self.clone();
        if let Some(v) = data.get("file_position").and_then(Value::as_u64) {
            n.file_position = v;
        }
        if let Some(v) = data.get("progress").and_then(Value::as_f64) {
            n.progress = v;
        }
        n
    }
}

/// Toolhead position, timers, and kinematic limits.
#[derive(Debug, Clone, PartialEq)]
pub struct Toolhead {
    pub position: Vec<f64>,
    pub active_extruder: String,
    pub print_time: Option<f64>,
    pub estimated_print_time: Option<f64>,
    pub max_velocity: f64,
    pub max_accel: f64,
    pub max_accel_to_decel: f64,
    pub square_corner_velocity: f64,
}

impl Default for Toolhead {
    fn default() -> Self {
        Self {
            position: vec![0.0, 0.0, 0.0],
            active_extruder: "extruder".into(),
            print_time: None,
            estimated_print_time: None,
            max_velocity: 500.0,
            max_accel: 3000.0,
            max_accel_to_decel: 3000.0,
            square_corner_velocity: 1500.0,
        }
    }
}

impl Toolhead {
    pub fn update_with(&self, data: &Value) -> Self {
        let mut n = self.clone();
        if let Some(v) = data.get("position").and_then(vec_f64) {
            n.position = v;
        }
        if let Some(v) = data.get("extruder").and_then(Value::as_str) {
            n.active_extruder = v.to_owned();
        }
        if let Some(v) = data.get("print_time").and_then(Value::as_f64) {
            n.print_time = Some(v);
        }
        if let Some(v) = data.get("estimated_print_time").and_then(Value::as_f64) {
            n.estimated_print_time = Some(v);
        }
        if let Some(v) = data.get("max_velocity").and_then(Value::as_f64) {
            n.max_velocity = v;
        }
        if let Some(v) = data.get("max_accel").and_then(Value::as_f64) {
            n.max_accel = v;
        }
        if let Some(v) = data.get("max_accel_to_decel").and_then(Value::as_f64) {
            n.max_accel_to_decel = v;
        }
        if let Some(v) = data.get("square_corner_velocity").and_then(Value::as_f64) {
            n.square_corner_velocity = v;
        }
        n
    }
}

/// Logical and gcode-space position (4th component is the extruder axis).
#[derive(Debug, Clone, PartialEq)]
pub struct GcodeMove {
    pub position: Vec<f64>,
    pub gcode_position: Vec<f64>,
}

impl Default for GcodeMove {
    fn default() -> Self {
        Self {
            position: vec![0.0; 4],
            gcode_position: vec![0.0; 4],
        }
    }
}

impl GcodeMove {
    pub fn update_with(&self, data: &Value) -> Self {
        let mut n = self.clone();
        if let Some(v) = data.get("position").and_then(vec_f64) {
            n.position = v;
        }
        if let Some(v) = data.get("gcode_position").and_then(vec_f64) {
            n.gcode_position = v;
        }
        n
    }

    /// Z coordinate of the gcode-space position.
    pub fn gcode_z(&self) -> f64 {
        self.gcode_position.get(2).copied().unwrap_or(0.0)
    }
}

/// Kind of filament sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    FilamentSwitchSensor,
    FilamentMotionSensor,
}

impl SensorKind {
    pub fn from_object_kind(kind: ObjectKind) -> Option<Self> {
        match kind {
            ObjectKind::FilamentSwitchSensor => Some(Self::FilamentSwitchSensor),
            ObjectKind::FilamentMotionSensor => Some(Self::FilamentMotionSensor),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FilamentSwitchSensor => "filament_switch_sensor",
            Self::FilamentMotionSensor => "filament_motion_sensor",
        }
    }
}

/// One filament sensor, keyed by its name in the engine's sensor map.
#[derive(Debug, Clone, PartialEq)]
pub struct FilamentSensor {
    pub name: String,
    pub kind: SensorKind,
    pub enabled: bool,
    pub filament_detected: bool,
}

impl FilamentSensor {
    pub fn new(name: impl Into<String>, kind: SensorKind) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: false,
            filament_detected: true,
        }
    }

    pub fn update_with(&self, data: &Value) -> Self {
        let mut n = self.clone();
        if let Some(v) = data.get("enabled").and_then(Value::as_bool) {
            n.enabled = v;
        }
        if let Some(v) = data.get("filament_detected").and_then(Value::as_bool) {
            n.filament_detected = v;
        }
        n
    }
}

/// Gcode file metadata fetched lazily per filename.
///
/// Fetched as a whole (not merged), so it derives `Deserialize` directly.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GcodeFileMeta {
    pub filename: String,
    pub size: Option<u64>,
    pub modified: Option<f64>,
    pub slicer: Option<String>,
    pub gcode_start_byte: Option<u64>,
    pub gcode_end_byte: Option<u64>,
    pub layer_count: Option<u32>,
    pub object_height: Option<f64>,
    pub estimated_time: Option<f64>,
    pub layer_height: Option<f64>,
    pub first_layer_height: Option<f64>,
    pub filament_total: Option<f64>,
    pub filament_weight_total: Option<f64>,
}

impl GcodeFileMeta {
    /// Placeholder for files the daemon has no metadata for, so the lookup
    /// is not retried on every update.
    pub fn placeholder(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }
}
