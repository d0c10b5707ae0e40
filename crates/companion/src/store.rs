//! Device record access in the daemon's key-value database.
//!
//! All registered devices live under the `mobileraker.fcm` namespace key.
//! The store reads the whole map per evaluation pass and writes back only
//! the per-device marker (`fcm.{id}.snap`).

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use printwatch_protocol::device::{DeviceNotificationConfig, NotificationMarker};
use printwatch_rpc::RpcError;
use printwatch_sync::PrinterApi;

const NAMESPACE: &str = "mobileraker";

pub struct DeviceStore<A: PrinterApi> {
    api: A,
}

impl<A: PrinterApi> DeviceStore<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    /// Fetches every usable device record. Entries without a push token are
    /// dead weight from uninstalled apps and get deleted; entries that fail
    /// to parse are skipped.
    pub async fn fetch_devices(&self) -> Vec<DeviceNotificationConfig> {
        let response = match self
            .api
            .send(
                "server.database.get_item",
                Some(json!({"namespace": NAMESPACE, "key": "fcm"})),
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "could not fetch device records");
                return Vec::new();
            }
        };

        let Some(entries) = response.get("value").and_then(Value::as_object) else {
            return Vec::new();
        };

        let mut devices = Vec::new();
        for (machine_id, raw) in entries {
            // Non-UUID keys are companion-owned records (client meta etc.).
            if Uuid::try_parse(machine_id).is_err() {
                continue;
            }
            if raw.get("fcmToken").is_none() {
                self.delete_stale_record(machine_id).await;
                continue;
            }
            match DeviceNotificationConfig::from_json(machine_id, raw) {
                Ok(cfg) => devices.push(cfg),
                Err(e) => {
                    warn!(machine_id, error = %e, "skipping unreadable device record");
                }
            }
        }
        info!(count = devices.len(), "fetched device records");
        devices
    }

    async fn delete_stale_record(&self, machine_id: &str) {
        info!(machine_id, "deleting device record without push token");
        if let Err(e) = self
            .api
            .send(
                "server.database.delete_item",
                Some(json!({"namespace": NAMESPACE, "key": format!("fcm.{machine_id}")})),
            )
            .await
        {
            warn!(machine_id, error = %e, "could not delete stale device record");
        }
    }

    /// Writes one device's dedupe marker back.
    pub async fn write_marker(
        &self,
        machine_id: &str,
        marker: &NotificationMarker,
    ) -> Result<(), RpcError> {
        self.api
            .send(
                "server.database.post_item",
                Some(json!({
                    "namespace": NAMESPACE,
                    "key": format!("fcm.{machine_id}.snap"),
                    "value": marker.to_json(),
                })),
            )
            .await?;
        Ok(())
    }

    /// Deletes a device's Live Activity token record.
    pub async fn delete_apns(&self, machine_id: &str) -> Result<(), RpcError> {
        self.api
            .send(
                "server.database.delete_item",
                Some(json!({"namespace": NAMESPACE, "key": format!("fcm.{machine_id}.apns")})),
            )
            .await?;
        Ok(())
    }

    /// Publishes the companion's own version so apps can detect an outdated
    /// installation.
    pub async fn write_client_meta(&self, version: &str) -> Result<(), RpcError> {
        self.api
            .send(
                "server.database.post_item",
                Some(json!({
                    "namespace": NAMESPACE,
                    "key": "fcm.client",
                    "value": {
                        "version": version,
                        "lastSeen": Utc::now().to_rfc3339(),
                    },
                })),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct ScriptedApi {
        responses: Arc<Mutex<HashMap<String, Value>>>,
        calls: Arc<Mutex<Vec<(String, Option<Value>)>>>,
    }

    impl ScriptedApi {
        fn respond(&self, method: &str, value: Value) {
            self.responses
                .lock()
                .unwrap()
                .insert(method.to_owned(), value);
        }

        fn calls_for(&self, method: &str) -> Vec<Option<Value>> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(m, _)| m == method)
                .map(|(_, p)| p.clone())
                .collect()
        }
    }

    impl PrinterApi for ScriptedApi {
        async fn send(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_owned(), params));
            self.responses
                .lock()
                .unwrap()
                .get(method)
                .cloned()
                .ok_or(RpcError::Server {
                    code: None,
                    message: "not scripted".into(),
                })
        }
    }

    fn device_json() -> Value {
        json!({
            "created": "2022-11-25T23:03:47",
            "lastModified": "2022-11-25T23:03:47",
            "fcmToken": "tok",
            "machineName": "Voron",
            "language": "en",
            "settings": {
                "created": "", "lastModified": "",
                "progress": 0.25,
                "states": ["printing"]
            },
            "snap": null
        })
    }

    #[tokio::test]
    async fn fetch_skips_non_uuid_and_deletes_tokenless() {
        let api = ScriptedApi::default();
        api.respond(
            "server.database.get_item",
            json!({"namespace": "mobileraker", "key": "fcm", "value": {
                "3f8a5f6e-8c5e-4cde-b9a1-2d9d63f2a111": device_json(),
                "client": {"version": "1.0.0"},
                "11111111-2222-3333-4444-555555555555": {"machineName": "ghost"}
            }}),
        );
        api.respond("server.database.delete_item", json!({}));

        let store = DeviceStore::new(api.clone());
        let devices = store.fetch_devices().await;

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].machine_id, "3f8a5f6e-8c5e-4cde-b9a1-2d9d63f2a111");

        let deletes = api.calls_for("server.database.delete_item");
        assert_eq!(deletes.len(), 1);
        assert_eq!(
            deletes[0].as_ref().unwrap()["key"],
            "fcm.11111111-2222-3333-4444-555555555555"
        );
    }

    #[tokio::test]
    async fn fetch_survives_daemon_errors() {
        let api = ScriptedApi::default();
        let store = DeviceStore::new(api);
        assert!(store.fetch_devices().await.is_empty());
    }

    #[tokio::test]
    async fn marker_write_targets_the_device_key() {
        let api = ScriptedApi::default();
        api.respond("server.database.post_item", json!({}));
        let store = DeviceStore::new(api.clone());

        let marker = NotificationMarker::default();
        store.write_marker("machine-1", &marker).await.unwrap();

        let writes = api.calls_for("server.database.post_item");
        let params = writes[0].as_ref().unwrap();
        assert_eq!(params["key"], "fcm.machine-1.snap");
        assert_eq!(params["value"]["state"], "standby");
    }

    #[tokio::test]
    async fn client_meta_and_apns_keys() {
        let api = ScriptedApi::default();
        api.respond("server.database.post_item", json!({}));
        api.respond("server.database.delete_item", json!({}));
        let store = DeviceStore::new(api.clone());

        store.write_client_meta("0.1.0").await.unwrap();
        store.delete_apns("machine-1").await.unwrap();

        let meta = api.calls_for("server.database.post_item");
        assert_eq!(meta[0].as_ref().unwrap()["key"], "fcm.client");
        assert_eq!(meta[0].as_ref().unwrap()["value"]["version"], "0.1.0");
        assert!(meta[0].as_ref().unwrap()["value"]["lastSeen"].is_string());
        let deletes = api.calls_for("server.database.delete_item");
        assert_eq!(deletes[0].as_ref().unwrap()["key"], "fcm.machine-1.apns");
    }
}
