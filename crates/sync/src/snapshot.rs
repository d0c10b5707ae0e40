//! Immutable view of the printer state with derived print metrics.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use printwatch_protocol::objects::{EtaSource, PrintState};
use printwatch_protocol::printer::{
    FilamentSensor, GcodeFileMeta, GcodeMove, PrintStats, Toolhead, VirtualSdCard,
};

/// One consistent view of the printer, captured after a batch of status
/// updates was merged. Everything derived (progress, remaining time, layers)
/// is computed on demand from the raw objects.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// When this snapshot was captured.
    pub timestamp: DateTime<Utc>,
    pub klippy_ready: bool,
    /// `error` whenever the firmware is not ready, regardless of the job.
    pub print_state: PrintState,
    /// Current M117 display message, `None` when cleared.
    pub m117: Option<String>,
    /// SHA-256 of the M117 message; empty when there is none. Stored in the
    /// per-device marker instead of the raw text.
    pub m117_hash: String,
    pub print_stats: PrintStats,
    pub virtual_sdcard: VirtualSdCard,
    pub toolhead: Toolhead,
    pub gcode_move: GcodeMove,
    pub current_file: Option<GcodeFileMeta>,
    /// Last G-code console response line, comment prefix stripped.
    pub gcode_response: Option<String>,
    pub gcode_response_hash: String,
    /// `Some(true)` while the timelapse plugin holds the printer paused.
    pub timelapse_pause: Option<bool>,
    /// Keyed by sensor name.
    pub filament_sensors: BTreeMap<String, FilamentSensor>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            timestamp: DateTime::UNIX_EPOCH,
            klippy_ready: false,
            print_state: PrintState::Error,
            m117: None,
            m117_hash: String::new(),
            print_stats: PrintStats::default(),
            virtual_sdcard: VirtualSdCard::default(),
            toolhead: Toolhead::default(),
            gcode_move: GcodeMove::default(),
            current_file: None,
            gcode_response: None,
            gcode_response_hash: String::new(),
            timelapse_pause: None,
            filament_sensors: BTreeMap::new(),
        }
    }
}

impl Snapshot {
    /// Filename of the loaded G-code file, from its metadata record.
    pub fn filename(&self) -> Option<&str> {
        self.current_file.as_ref().map(|f| f.filename.as_str())
    }

    /// A pause caused by the timelapse plugin taking a frame, not the user.
    pub fn is_timelapse_pause(&self) -> bool {
        self.print_state == PrintState::Paused && self.timelapse_pause == Some(true)
    }

    /// Remaining print time in seconds estimated from one source.
    pub fn remaining_time(&self, source: EtaSource) -> Option<i64> {
        let duration = self.print_stats.print_duration;
        match source {
            EtaSource::File => {
                let progress = self.virtual_sdcard.progress;
                if duration <= 0.0 || progress <= 0.0 {
                    return None;
                }
                Some((duration / progress - duration) as i64)
            }
            EtaSource::Filament => {
                let used = self.print_stats.filament_used;
                let total = self.current_file.as_ref()?.filament_total?;
                if duration <= 0.0 || total <= used {
                    return None;
                }
                Some((duration / (used / total) - duration) as i64)
            }
            EtaSource::Slicer => {
                let estimate = self.current_file.as_ref()?.estimated_time?;
                if duration <= 0.0 || estimate <= 0.0 {
                    return None;
                }
                Some((estimate - duration) as i64)
            }
        }
    }

    /// Average of the remaining-time estimates from the given sources,
    /// ignoring sources that cannot produce a positive estimate.
    pub fn remaining_time_avg(&self, sources: &[EtaSource]) -> Option<i64> {
        let mut sum = 0i64;
        let mut cnt = 0i64;
        for source in sources {
            if let Some(remaining) = self.remaining_time(*source)
                && remaining > 0
            {
                sum += remaining;
                cnt += 1;
            }
        }
        if cnt == 0 { None } else { Some(sum / cnt) }
    }

    /// Whether any configured source can estimate a completion time.
    pub fn eta_available(&self, sources: &[EtaSource]) -> bool {
        self.remaining_time_avg(sources).is_some()
    }

    /// Estimated completion time, anchored at `now`.
    pub fn eta(&self, now: DateTime<Utc>, sources: &[EtaSource]) -> Option<DateTime<Utc>> {
        let remaining = self.remaining_time_avg(sources)?;
        if remaining <= 0 {
            return None;
        }
        Some(now + Duration::seconds(remaining))
    }

    /// Estimated completion time as a UTC unix timestamp.
    pub fn eta_seconds_utc(&self, now: DateTime<Utc>, sources: &[EtaSource]) -> Option<i64> {
        self.eta(now, sources).map(|eta| eta.timestamp())
    }

    /// Remaining time formatted as `H:MM`.
    pub fn remaining_time_formatted(&self, sources: &[EtaSource]) -> Option<String> {
        let secs = self.remaining_time_avg(sources)?;
        if secs <= 0 {
            return None;
        }
        Some(format!("{}:{:02}", secs / 3600, (secs % 3600) / 60))
    }

    /// Slicer's total estimate in minutes. Used to widen the live-activity
    /// ETA threshold for long prints.
    pub fn eta_window(&self) -> Option<i64> {
        let estimate = self.current_file.as_ref()?.estimated_time?;
        if estimate <= 0.0 {
            return None;
        }
        Some((estimate / 60.0) as i64)
    }

    /// Print progress as a fraction, preferring the byte range of the actual
    /// G-code body over the whole-file position.
    ///
    /// The byte-range variant is only trusted when the loaded metadata
    /// belongs to the file the job reports; otherwise it falls back to the
    /// daemon's own file progress.
    pub fn progress_relative(&self) -> Option<f64> {
        if let Some(file) = &self.current_file
            && let (Some(start), Some(end)) = (file.gcode_start_byte, file.gcode_end_byte)
            && Some(file.filename.as_str()) == self.print_stats.filename.as_deref()
        {
            let position = self.virtual_sdcard.file_position;
            if position <= start {
                return Some(0.0);
            }
            if position >= end {
                return Some(1.0);
            }
            let current = position - start;
            let max = end - start;
            if current > 0 && max > 0 {
                return Some(current as f64 / max as f64);
            }
        }
        Some(self.virtual_sdcard.progress)
    }

    /// Progress in whole percent; `None` until the job has moved past zero.
    pub fn progress(&self) -> Option<i32> {
        let relative = self.progress_relative()?;
        if relative <= 0.0 {
            return None;
        }
        Some((relative * 100.0) as i32)
    }

    /// Total layer count: explicit counter, else file metadata, else derived
    /// from object height and layer heights.
    pub fn max_layer(&self) -> u32 {
        if let Some(total) = self.print_stats.total_layer
            && total > 0
        {
            return total;
        }
        let Some(file) = &self.current_file else {
            return 0;
        };
        if let Some(count) = file.layer_count {
            return count;
        }
        let (Some(height), Some(first), Some(layer)) =
            (file.object_height, file.first_layer_height, file.layer_height)
        else {
            return 0;
        };
        ((height - first) / layer + 1.0).ceil().max(0.0) as u32
    }

    /// Current layer: explicit counter, else derived from the commanded Z
    /// position, clamped to `[0, max_layer]`.
    pub fn current_layer(&self) -> u32 {
        if let Some(current) = self.print_stats.current_layer
            && current > 0
        {
            return current;
        }
        let Some(file) = &self.current_file else {
            return 0;
        };
        let (Some(first), Some(layer)) = (file.first_layer_height, file.layer_height) else {
            return 0;
        };
        if self.print_stats.print_duration <= 0.0 {
            return 0;
        }
        let z = self.gcode_move.gcode_z();
        let derived = ((z - first) / layer + 1.0).ceil().max(0.0) as u32;
        derived.min(self.max_layer())
    }
}
