//! Webcam records returned by the daemon's webcam list endpoint.

use serde::Deserialize;

/// A configured webcam as reported by `server.webcams.list`.
///
/// Only the fields the snapshot pipeline needs are modelled; everything else
/// in the record is ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebcamInfo {
    pub name: String,
    pub snapshot_url: String,
    pub rotation: i32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub uid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_webcam_record_with_extra_fields() {
        let cam: WebcamInfo = serde_json::from_str(
            r#"{
                "name": "printhead",
                "location": "printer",
                "service": "mjpegstreamer",
                "snapshot_url": "http://127.0.0.1/webcam/?action=snapshot",
                "stream_url": "http://127.0.0.1/webcam/?action=stream",
                "rotation": 180,
                "flip_horizontal": true,
                "flip_vertical": false,
                "uid": "34708da9-8b3e-44b5-b4c1-5e9a5e2a5f0c"
            }"#,
        )
        .unwrap();
        assert_eq!(cam.name, "printhead");
        assert_eq!(cam.rotation, 180);
        assert!(cam.flip_horizontal);
        assert_eq!(cam.uid, "34708da9-8b3e-44b5-b4c1-5e9a5e2a5f0c");
    }

    #[test]
    fn missing_fields_default() {
        let cam: WebcamInfo = serde_json::from_str(r#"{"name": "bare"}"#).unwrap();
        assert_eq!(cam.snapshot_url, "");
        assert_eq!(cam.rotation, 0);
        assert!(!cam.flip_vertical);
    }
}
