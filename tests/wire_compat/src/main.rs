fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use serde_json::Value;

    use printwatch_protocol::device::{DeviceNotificationConfig, NotificationMarker, WebcamPref};
    use printwatch_protocol::objects::PrintState;
    use printwatch_protocol::printer::{PrintStats, VirtualSdCard};
    use printwatch_protocol::push::{NotificationPayload, PushRequest};
    use printwatch_protocol::rpc::RpcFrame;

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Normalizes JSON values so that integer-valued floats compare equal.
    ///
    /// The app and the reference companion serialize `25` where we write
    /// `25.0`; both are semantically identical on the wire.
    fn normalize_value(v: &Value) -> Value {
        match v {
            Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    serde_json::json!(f)
                } else {
                    v.clone()
                }
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect(),
            ),
            Value::Array(arr) => Value::Array(arr.iter().map(normalize_value).collect()),
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture into a serde type, re-serializes it, and
    /// compares the JSON values (order-independent, float-normalized).
    fn roundtrip_test<T>(name: &str)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        let norm_fixture = normalize_value(&fixture);
        let norm_reserialized = normalize_value(&reserialized);
        assert_eq!(
            norm_fixture, norm_reserialized,
            "roundtrip mismatch for {name}:\n  app:  {fixture}\n  ours: {reserialized}"
        );
    }

    // --- Persisted device record (app-written, hand-parsed) ---

    #[test]
    fn fixture_device_record() {
        let fixture = load_fixture("device_record.json");
        let cfg =
            DeviceNotificationConfig::from_json("3f8a5f6e-8c5e-4cde-b9a1-2d9d63f2a111", &fixture)
                .unwrap();

        assert!(cfg.is_android());
        assert_eq!(cfg.settings.progress, 5);
        assert_eq!(
            cfg.settings.snapshot_webcam,
            Some(WebcamPref::Webcam(
                "34708da9-8b3e-44b5-b4c1-5e9a5e2a5f0c".into()
            ))
        );
        assert_eq!(cfg.marker.progress, 25);
        assert_eq!(cfg.marker.progress_progressbar, 30);
        assert_eq!(cfg.marker.state, Some(PrintState::Printing));
        assert_eq!(cfg.marker.filament_sensors, vec!["runout".to_owned()]);
        assert_eq!(
            cfg.apns.as_ref().unwrap().live_activity,
            "80b1c3f09a714c9ab2e8e1f0"
        );

        let reserialized = cfg.to_json();
        assert_eq!(
            normalize_value(&reserialized),
            normalize_value(&fixture),
            "device record roundtrip mismatch"
        );
    }

    // --- Marker write (companion-written, hand-parsed) ---

    #[test]
    fn fixture_marker_write() {
        let fixture = load_fixture("marker_write.json");
        let marker = NotificationMarker::from_json(&fixture);

        assert_eq!(marker.progress, 35);
        assert_eq!(marker.state, Some(PrintState::Printing));
        assert!(marker.filament_sensors.is_empty());
        assert_eq!(
            marker.last_progress.to_rfc3339(),
            "2023-05-01T11:00:00+00:00"
        );

        assert_eq!(
            normalize_value(&marker.to_json()),
            normalize_value(&fixture),
            "marker roundtrip mismatch"
        );
    }

    // --- Push relay request body (serde-derived) ---

    #[test]
    fn fixture_push_request() {
        roundtrip_test::<PushRequest>("push_request.json");
    }

    #[test]
    fn fixture_push_request_payload_variants() {
        let fixture = load_fixture("push_request.json");
        let request: PushRequest = serde_json::from_value(fixture).unwrap();
        let payloads = &request.device_requests[0].notifications;
        assert!(matches!(payloads[0], NotificationPayload::Notification(_)));
        assert!(matches!(payloads[1], NotificationPayload::ProgressBar(_)));
        assert!(matches!(payloads[2], NotificationPayload::LiveActivity(_)));
    }

    // --- Daemon notification frame ---

    #[test]
    fn fixture_status_update_frame() {
        let fixture = load_fixture("status_update_frame.json");
        let frame: RpcFrame = serde_json::from_value(fixture).unwrap();
        assert_eq!(frame.method.as_deref(), Some("notify_status_update"));

        let payload = frame.first_param().expect("status payload");
        let stats = PrintStats::default().update_with(&payload["print_stats"]);
        assert_eq!(stats.filename.as_deref(), Some("benchy.gcode"));
        assert_eq!(stats.state, PrintState::Printing);
        assert_eq!(stats.print_duration, 621.5);

        let sdcard = VirtualSdCard::default().update_with(&payload["virtual_sdcard"]);
        assert_eq!(sdcard.progress, 0.35);
        assert_eq!(sdcard.file_position, 32_768);
    }
}
