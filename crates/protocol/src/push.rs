//! Request bodies for the push relay.
//!
//! One HTTP POST per evaluation pass carries every device's pending
//! notifications. The relay fans the payloads out to FCM / APNs; the
//! companion never talks to those services directly.

use serde::{Deserialize, Serialize};

/// Protocol version of the relay request body.
pub const PUSH_REQUEST_VERSION: u8 = 1;

/// A plain banner notification targeting one notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationContent {
    pub id: i64,
    pub channel: String,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Android-only silent update that redraws the sticky progress bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressBarContent {
    pub progress: i32,
    pub id: i64,
    pub channel: String,
    pub title: String,
    pub body: String,
}

/// iOS Live Activity update addressed by its push token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveActivityContent {
    /// `"update"` while the job runs, `"end"` when it leaves the active states.
    #[serde(rename = "type")]
    pub event: String,
    pub token: String,
    pub progress: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<i64>,
    #[serde(rename = "printState")]
    pub print_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Any payload the relay accepts. Untagged: the shapes are disjoint enough
/// for the relay (and our fixtures) to discriminate structurally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationPayload {
    LiveActivity(LiveActivityContent),
    ProgressBar(ProgressBarContent),
    Notification(NotificationContent),
}

/// All payloads bound for a single device token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRequest {
    pub version: u8,
    #[serde(rename = "printerIdentifier")]
    pub printer_id: String,
    pub token: String,
    pub notifications: Vec<NotificationPayload>,
}

/// Top-level relay request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub version: u8,
    #[serde(rename = "deviceRequests")]
    pub device_requests: Vec<DeviceRequest>,
}

impl PushRequest {
    pub fn new(device_requests: Vec<DeviceRequest>) -> Self {
        Self {
            version: PUSH_REQUEST_VERSION,
            device_requests,
        }
    }
}
