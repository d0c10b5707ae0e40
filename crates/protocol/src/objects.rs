//! Printer object identifiers and shared state enums.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind component of a printer object identifier.
///
/// Closed set of the objects this companion tracks; anything else maps to
/// [`ObjectKind::Unknown`] and is logged and ignored by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    PrintStats,
    DisplayStatus,
    VirtualSdcard,
    Toolhead,
    GcodeMove,
    GcodeMacro,
    FilamentSwitchSensor,
    FilamentMotionSensor,
    Unknown,
}

impl ObjectKind {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "print_stats" => Self::PrintStats,
            "display_status" => Self::DisplayStatus,
            "virtual_sdcard" => Self::VirtualSdcard,
            "toolhead" => Self::Toolhead,
            "gcode_move" => Self::GcodeMove,
            "gcode_macro" => Self::GcodeMacro,
            "filament_switch_sensor" => Self::FilamentSwitchSensor,
            "filament_motion_sensor" => Self::FilamentMotionSensor,
            _ => Self::Unknown,
        }
    }

    pub fn is_filament_sensor(self) -> bool {
        matches!(self, Self::FilamentSwitchSensor | Self::FilamentMotionSensor)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrintStats => "print_stats",
            Self::DisplayStatus => "display_status",
            Self::VirtualSdcard => "virtual_sdcard",
            Self::Toolhead => "toolhead",
            Self::GcodeMove => "gcode_move",
            Self::GcodeMacro => "gcode_macro",
            Self::FilamentSwitchSensor => "filament_switch_sensor",
            Self::FilamentMotionSensor => "filament_motion_sensor",
            Self::Unknown => "unknown",
        }
    }
}

/// Parsed printer object identifier: kind plus optional secondary name,
/// e.g. `"filament_switch_sensor runout"` → (`FilamentSwitchSensor`, `"runout"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub name: Option<String>,
}

impl ObjectKey {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.split_once(' ') {
            Some((kind, name)) => Self {
                kind: ObjectKind::from_wire(kind),
                name: Some(name.trim().to_owned()),
            },
            None => Self {
                kind: ObjectKind::from_wire(raw),
                name: None,
            },
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} {name}", self.kind.as_str()),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

/// Klippy readiness as reported by the daemon's server-info query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KlippyState {
    Ready,
    Error,
    Shutdown,
    Startup,
    Disconnected,
    #[serde(other)]
    #[default]
    Unknown,
}

impl KlippyState {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "ready" => Self::Ready,
            "error" => Self::Error,
            "shutdown" => Self::Shutdown,
            "startup" => Self::Startup,
            "disconnected" => Self::Disconnected,
            _ => Self::Unknown,
        }
    }

    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

/// Print job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintState {
    Standby,
    Printing,
    Paused,
    Complete,
    Cancelled,
    Error,
}

impl PrintState {
    /// Unknown wire values collapse to `Error`, matching how the companion
    /// treats a printer it cannot interpret.
    pub fn from_wire(s: &str) -> Self {
        Self::try_from_wire(s).unwrap_or(Self::Error)
    }

    /// Strict variant used when parsing user configuration, where an unknown
    /// name must be skipped instead of collapsing to `error`.
    pub fn try_from_wire(s: &str) -> Option<Self> {
        match s {
            "standby" => Some(Self::Standby),
            "printing" => Some(Self::Printing),
            "paused" => Some(Self::Paused),
            "complete" => Some(Self::Complete),
            "cancelled" => Some(Self::Cancelled),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standby => "standby",
            Self::Printing => "printing",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }

    /// A job is active while printing or paused.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Printing | Self::Paused)
    }
}

impl fmt::Display for PrintState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source for a remaining-time estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EtaSource {
    File,
    Filament,
    Slicer,
}

impl EtaSource {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "filament" => Some(Self::Filament),
            "slicer" => Some(Self::Slicer),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Filament => "filament",
            Self::Slicer => "slicer",
        }
    }
}
