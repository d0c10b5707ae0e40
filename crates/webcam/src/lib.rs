//! Webcam snapshot capture.
//!
//! Cameras are configured in the daemon; [`WebcamManager`] resolves a camera
//! uid to its snapshot URL once and caches the resulting client until the
//! daemon reports a webcam configuration change. Images are attached to
//! notifications as base64, untransformed.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use printwatch_protocol::webcam::WebcamInfo;
use printwatch_sync::PrinterApi;

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from a snapshot capture.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webcam returned status {0}")]
    Status(u16),
}

/// Captures stills from one camera's snapshot endpoint.
#[derive(Debug, Clone)]
pub struct SnapshotClient {
    http: reqwest::Client,
    uri: String,
    /// Orientation hints from the daemon's webcam record; carried along so
    /// the apps can correct the image, the companion does not transform it.
    pub rotation: i32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub name: String,
}

impl SnapshotClient {
    pub fn new(info: &WebcamInfo, base_url: &str) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(CAPTURE_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            uri: normalize_uri(&info.snapshot_url, base_url),
            rotation: info.rotation,
            flip_horizontal: info.flip_horizontal,
            flip_vertical: info.flip_vertical,
            name: info.name.clone(),
        })
    }

    /// Client for a directly configured snapshot URL, outside the daemon's
    /// webcam registry. Used for the legacy per-printer `snapshot_uri`.
    pub fn from_uri(uri: &str, rotation: i32) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(CAPTURE_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            uri: uri.to_owned(),
            rotation,
            flip_horizontal: false,
            flip_vertical: false,
            name: "default".into(),
        })
    }

    /// Fetches one still frame.
    pub async fn capture(&self) -> Result<Vec<u8>, Error> {
        let resp = self.http.get(&self.uri).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status(status.as_u16()));
        }
        Ok(resp.bytes().await?.to_vec())
    }

    /// Fetches one still frame encoded for the push payload.
    pub async fn capture_base64(&self) -> Result<String, Error> {
        let bytes = self.capture().await?;
        Ok(BASE64.encode(bytes))
    }
}

/// Daemon webcam records use relative snapshot paths when the camera is
/// served from the same host.
fn normalize_uri(uri: &str, base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if uri.is_empty() || uri.starts_with("http://") || uri.starts_with("https://") {
        return uri.to_owned();
    }
    if uri.starts_with('/') {
        format!("{base}{uri}")
    } else {
        format!("{base}/{uri}")
    }
}

/// HTTP base for relative snapshot paths, derived from the daemon's
/// WebSocket uri. Cameras are plain HTTP even when the daemon is TLS.
pub fn base_url_from_ws(ws_uri: &str) -> String {
    let rest = ws_uri
        .strip_prefix("ws://")
        .or_else(|| ws_uri.strip_prefix("wss://"))
        .unwrap_or(ws_uri);
    let authority = rest.split('/').next().unwrap_or(rest);
    let host = authority.split(':').next().unwrap_or(authority);
    format!("http://{host}")
}

/// Resolves camera uids to snapshot clients, with a cache that lives until
/// the daemon announces a webcam configuration change.
pub struct WebcamManager {
    base_url: String,
    cache: Mutex<HashMap<String, SnapshotClient>>,
}

impl WebcamManager {
    pub fn new(moonraker_uri: &str) -> Self {
        Self {
            base_url: base_url_from_ws(moonraker_uri),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the snapshot client for `uid`, fetching the webcam record
    /// from the daemon on a cache miss. `None` when the camera is unknown
    /// or its record cannot be read.
    pub async fn client_for<A: PrinterApi>(&self, api: &A, uid: &str) -> Option<SnapshotClient> {
        let mut cache = self.cache.lock().await;
        if let Some(client) = cache.get(uid) {
            return Some(client.clone());
        }

        info!(uid, "fetching webcam record");
        let response = match api
            .send("server.webcams.get_item", Some(json!({"uid": uid})))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(uid, error = %e, "webcam record fetch failed");
                return None;
            }
        };
        let info: WebcamInfo = match response
            .get("webcam")
            .map(|raw| serde_json::from_value(raw.clone()))
        {
            Some(Ok(info)) => info,
            _ => {
                warn!(uid, "unparseable webcam record");
                return None;
            }
        };

        match SnapshotClient::new(&info, &self.base_url) {
            Ok(client) => {
                cache.insert(uid.to_owned(), client.clone());
                Some(client)
            }
            Err(e) => {
                warn!(uid, error = %e, "webcam client setup failed");
                None
            }
        }
    }

    /// Drops all cached clients; call on `notify_webcams_changed`.
    pub async fn clear(&self) {
        self.cache.lock().await.clear();
        info!("webcam client cache cleared");
    }
}
