//! Placeholder substitution for notification texts.
//!
//! Templates use `$name` placeholders. Values that are unavailable render
//! as an empty string (`$progress` outside of printing) or an explicit
//! dash marker (`$eta`, `$remaining_*`).

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Utc};

use printwatch_protocol::PrintState;
use printwatch_protocol::device::DeviceNotificationConfig;
use printwatch_protocol::objects::EtaSource;
use printwatch_sync::Snapshot;

use crate::NotifyConfig;

/// Used when no format is configured or the configured one fails to parse.
pub const FALLBACK_ETA_FORMAT: &str = "%d.%m.%Y, %H:%M:%S";

/// Replaces every known placeholder in `template`. `extra` carries ad-hoc
/// pairs like `("sensor", name)` and is applied after the standard set.
pub fn replace_placeholders(
    template: &str,
    device: &DeviceNotificationConfig,
    snap: &Snapshot,
    config: &NotifyConfig,
    now: DateTime<Utc>,
    extra: &[(&str, String)],
) -> String {
    let sources = &device.settings.eta_sources;
    let eta = snap
        .eta(now, sources)
        .map(|eta| eta.with_timezone(&config.timezone));
    let progress = if snap.print_state == PrintState::Printing {
        snap.progress_relative()
    } else {
        None
    };

    let values = [
        ("printer_name", device.machine_name.clone()),
        (
            "progress",
            progress
                .map(|p| format!("{:.0}%", p * 100.0))
                .unwrap_or_default(),
        ),
        ("file", snap.filename().unwrap_or("UNKNOWN").to_owned()),
        ("eta", eta_formatted(eta.as_ref(), &config.eta_format)),
        (
            "a_eta",
            adaptive_eta_formatted(
                eta.as_ref(),
                &config.eta_format,
                now.with_timezone(&config.timezone),
            ),
        ),
        ("remaining_avg", remaining(snap, sources)),
        ("remaining_file", remaining(snap, &[EtaSource::File])),
        ("remaining_filament", remaining(snap, &[EtaSource::Filament])),
        ("remaining_slicer", remaining(snap, &[EtaSource::Slicer])),
        ("cur_layer", snap.current_layer().to_string()),
        ("max_layer", snap.max_layer().to_string()),
    ];

    let mut out = template.to_owned();
    let pairs = values
        .iter()
        .map(|(name, value)| (*name, value.as_str()))
        .chain(extra.iter().map(|(name, value)| (*name, value.as_str())));
    for (name, value) in pairs {
        out = out.replace(&format!("${name}"), value);
    }
    out
}

fn remaining(snap: &Snapshot, sources: &[EtaSource]) -> String {
    snap.remaining_time_formatted(sources)
        .unwrap_or_else(|| "--:--".into())
}

fn eta_formatted(eta: Option<&DateTime<FixedOffset>>, format: &str) -> String {
    match eta {
        None => "--".into(),
        Some(eta) => format_time(eta, format),
    }
}

/// Like [`eta_formatted`], but an ETA landing today renders as time-only.
fn adaptive_eta_formatted(
    eta: Option<&DateTime<FixedOffset>>,
    format: &str,
    today: DateTime<FixedOffset>,
) -> String {
    match eta {
        None => "--".into(),
        Some(eta) if eta.date_naive() <= today.date_naive() => format_time(eta, "%H:%M:%S"),
        Some(eta) => format_time(eta, format),
    }
}

/// strftime with a parse check: chrono panics when asked to display an
/// invalid pattern, and the pattern here comes from user config.
fn format_time(value: &DateTime<FixedOffset>, format: &str) -> String {
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.contains(&Item::Error) {
        return value.format(FALLBACK_ETA_FORMAT).to_string();
    }
    value.format_with_items(items.into_iter()).to_string()
}
