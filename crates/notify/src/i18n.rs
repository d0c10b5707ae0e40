//! Built-in notification texts.
//!
//! The language is configured installation-wide, not per device. Missing
//! entries fall back to English; a missing English entry falls back to the
//! key itself so a typo never drops a notification.

fn en(key: &str) -> Option<&'static str> {
    Some(match key {
        "print_progress_title" => "Print progress of $printer_name",
        "print_progress_body" => "$progress, ETA: $a_eta, Layer: $cur_layer/$max_layer",
        "state_title" => "State of $printer_name changed",
        "state_printing_body" => "Started to print file: \"$file\"",
        "state_resumed_body" => "Resumed printing file: \"$file\"",
        "state_paused_body" => "Paused while printing file: \"$file\"",
        "state_completed_body" => "Finished printing: \"$file\"",
        "state_cancelled_body" => "Cancelled printing of file: \"$file\"",
        "state_error_body" => "Error while printing file: \"$file\"",
        "state_standby_body" => "Printer is in Standby",
        "m117_custom_title" => "User Notification",
        "filament_sensor_triggered_title" => "Filament sensor triggered",
        "filament_sensor_triggered_body" => "$sensor on $printer_name detected no filament",
        _ => return None,
    })
}

fn de(key: &str) -> Option<&'static str> {
    Some(match key {
        "print_progress_title" => "Druck-Fortschritt von $printer_name",
        "print_progress_body" => "$progress, ETA: $a_eta",
        "state_title" => "Status von $printer_name geändert",
        "state_printing_body" => "Starte Druck der Datei: \"$file\"",
        "state_resumed_body" => "Druck der Datei fortgesetzt: \"$file\"",
        "state_paused_body" => "Druck der Datei pausiert: \"$file\"",
        "state_completed_body" => "Druck abgeschlossen: \"$file\"",
        "state_cancelled_body" => "Druck abgebrochen: \"$file\"",
        "state_error_body" => "Fehler beim Drucken der Datei: \"$file\"",
        "state_standby_body" => "Drucker im Standby",
        "m117_custom_title" => "Nutzer-Benachrichtigung",
        "filament_sensor_triggered_title" => "Filament-Sensor ausgelöst",
        "filament_sensor_triggered_body" => "$sensor an $printer_name meldet kein Filament",
        _ => return None,
    })
}

/// Looks up `key` in the table for `language`, falling back to English.
pub fn translate<'a>(language: &str, key: &'a str) -> &'a str {
    let localized = match language {
        "de" => de(key),
        _ => None,
    };
    localized.or_else(|| en(key)).unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_lookup() {
        assert_eq!(translate("en", "state_standby_body"), "Printer is in Standby");
    }

    #[test]
    fn german_lookup() {
        assert_eq!(translate("de", "state_standby_body"), "Drucker im Standby");
    }

    #[test]
    fn unknown_language_falls_back_to_english() {
        assert_eq!(translate("fr", "m117_custom_title"), "User Notification");
    }

    #[test]
    fn unknown_key_falls_back_to_key() {
        assert_eq!(translate("en", "no_such_key"), "no_such_key");
    }

    #[test]
    fn every_english_key_has_a_german_entry() {
        for key in [
            "print_progress_title",
            "print_progress_body",
            "state_title",
            "state_printing_body",
            "state_resumed_body",
            "state_paused_body",
            "state_completed_body",
            "state_cancelled_body",
            "state_error_body",
            "state_standby_body",
            "m117_custom_title",
            "filament_sensor_triggered_title",
            "filament_sensor_triggered_body",
        ] {
            assert!(de(key).is_some(), "missing de entry for {key}");
        }
    }
}
