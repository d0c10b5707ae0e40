//! Connection supervisor: reconnects with exponential backoff for the life
//! of the process.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use printwatch_protocol::rpc::RpcFrame;

use crate::client::RpcClient;

/// Where and how to reach one printer daemon.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// WebSocket endpoint, e.g. `ws://mainsail.local:7125/websocket`.
    pub uri: String,
    /// Optional daemon API key, sent as `X-Api-Key`.
    pub api_key: Option<String>,
}

/// Exponential backoff parameters for reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay for a given attempt number (1-based), with ±25% jitter so a
    /// fleet of companions does not hammer a rebooting host in lockstep.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25;
        let offset = rand::random::<f64>() * 2.0 - 1.0; // [-1.0, 1.0)
        let with_jitter = (capped + jitter * offset).max(0.05);
        Duration::from_secs_f64(with_jitter)
    }
}

/// Connection lifecycle events for the consumer of the transport.
pub enum TransportEvent {
    /// A fresh connection is up; the client is valid until the next
    /// [`TransportEvent::ConnectionLost`].
    Connected(Arc<RpcClient>),
    ConnectionLost,
}

/// Runs the connection supervisor until cancelled.
///
/// Each established connection gets `on_notify` installed as its
/// notification callback, and a [`TransportEvent::Connected`] is emitted so
/// the consumer can resynchronise its state. The loop never gives up on its
/// own; the printer host may be powered off for days.
pub async fn run_transport(
    cfg: RpcConfig,
    reconnect: ReconnectConfig,
    events: mpsc::Sender<TransportEvent>,
    on_notify: Arc<dyn Fn(RpcFrame) + Send + Sync>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match RpcClient::connect(&cfg.uri, cfg.api_key.as_deref()).await {
            Ok(client) => {
                attempt = 0;
                info!(uri = %cfg.uri, "connected");

                let client = Arc::new(client);
                let cb = on_notify.clone();
                client
                    .set_notify_callback(Box::new(move |frame| cb(frame)))
                    .await;

                if events
                    .send(TransportEvent::Connected(client.clone()))
                    .await
                    .is_err()
                {
                    client.close().await;
                    return;
                }

                tokio::select! {
                    _ = cancel.cancelled() => {
                        client.close().await;
                        return;
                    }
                    _ = client.closed() => {
                        warn!(uri = %cfg.uri, "connection lost");
                    }
                }

                if events.send(TransportEvent::ConnectionLost).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(uri = %cfg.uri, error = %e, "connect failed");
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = reconnect.delay_for_attempt(attempt);
        info!(
            uri = %cfg.uri,
            attempt,
            delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
            "reconnecting"
        );

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
