//! One live WebSocket connection with request-response correlation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use printwatch_protocol::rpc::{RpcFrame, RpcRequest};

use crate::error::RpcError;

/// How long a request waits for its response unless the caller asks for more.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Keepalive ping period; the read pump declares the connection dead if
/// nothing at all arrives within [`PONG_WAIT`].
pub(crate) const PING_PERIOD: Duration = Duration::from_secs(30);
pub(crate) const PONG_WAIT: Duration = Duration::from_secs(90);

/// Callback for unsolicited server notifications (`method` frames).
pub type NotifyCallback = Box<dyn Fn(RpcFrame) + Send + Sync>;

pub(crate) type Pending = Arc<Mutex<HashMap<u32, oneshot::Sender<RpcFrame>>>>;
pub(crate) type NotifySlot = Arc<Mutex<Option<NotifyCallback>>>;

/// JSON-RPC client bound to a single WebSocket connection.
///
/// The client does not reconnect by itself; [`crate::run_transport`] builds a
/// fresh client per connection attempt. [`RpcClient::closed`] resolves when
/// the connection dies for any reason.
pub struct RpcClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    pending: Pending,
    on_notify: NotifySlot,
    /// Cancelled by the read pump when the connection is gone.
    closed: CancellationToken,
    cancel: CancellationToken,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    _ping_handle: tokio::task::JoinHandle<()>,
}

impl RpcClient {
    /// Connects to the daemon WebSocket, optionally authenticating with an
    /// `X-Api-Key` header.
    pub async fn connect(uri: &str, api_key: Option<&str>) -> Result<Self, RpcError> {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;

        let mut request = uri.into_client_request()?;
        if let Some(key) = api_key {
            let value = tungstenite::http::HeaderValue::from_str(key)
                .map_err(|_| RpcError::ApiKey)?;
            request.headers_mut().insert("X-Api-Key", value);
        }

        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let on_notify: NotifySlot = Arc::new(Mutex::new(None));
        let closed = CancellationToken::new();
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(write, write_rx, cancel))
        };

        let read_handle = {
            let pending = pending.clone();
            let on_notify = on_notify.clone();
            let closed = closed.clone();
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::read::read_pump(
                read, pending, on_notify, closed, write_tx, cancel,
            ))
        };

        let ping_handle = {
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::ping::ping_pump(write_tx, cancel))
        };

        Ok(Self {
            write_tx,
            pending,
            on_notify,
            closed,
            cancel,
            _read_handle: read_handle,
            _write_handle: write_handle,
            _ping_handle: ping_handle,
        })
    }

    /// Sends a request and waits for the matching response with the
    /// [`DEFAULT_REQUEST_TIMEOUT`].
    ///
    /// Returns the frame's `result` payload; an `error` frame maps to
    /// [`RpcError::Server`].
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, RpcError> {
        self.send_request_with_timeout(method, params, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    /// Like [`RpcClient::send_request`], but with a caller-chosen response
    /// deadline for slow daemon endpoints.
    pub async fn send_request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let id = self.next_id().await;
        let req = RpcRequest::new(method, id, params);
        let json = serde_json::to_string(&req)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        debug!(method, id, "sending request");
        self.write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .map_err(|_| RpcError::Closed)?;

        let result = tokio::time::timeout(timeout, rx).await;

        // Clean up the pending entry on any exit path.
        self.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(frame)) => {
                if let Some(err) = frame.error {
                    return Err(RpcError::Server {
                        code: err.code,
                        message: err.message,
                    });
                }
                Ok(frame.result.unwrap_or(Value::Null))
            }
            Ok(Err(_)) => Err(RpcError::Closed),
            Err(_) => Err(RpcError::Timeout),
        }
    }

    /// Sends a fire-and-forget notification.
    ///
    /// The frame carries a fresh id like any request, but no response is
    /// awaited and nothing is registered in the pending map.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        let id = self.next_id().await;
        let req = RpcRequest::new(method, id, params);
        let json = serde_json::to_string(&req)?;

        debug!(method, id, "sending notify");
        self.write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .map_err(|_| RpcError::Closed)
    }

    /// Sets the callback for server notifications.
    pub async fn set_notify_callback(&self, cb: NotifyCallback) {
        *self.on_notify.lock().await = Some(cb);
    }

    /// Resolves once the connection is dead (read pump exited).
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Gracefully closes the connection.
    pub async fn close(&self) {
        self.cancel.cancel();
        let _ = self
            .write_tx
            .send(tungstenite::Message::Close(None))
            .await;
    }

    /// Picks a request id not currently in flight. The daemon echoes ids
    /// verbatim, so only local uniqueness matters.
    async fn next_id(&self) -> u32 {
        let pending = self.pending.lock().await;
        let mut rng = rand::thread_rng();
        loop {
            let id = rng.gen_range(0..10_000);
            if !pending.contains_key(&id) {
                return id;
            }
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
        self._ping_handle.abort();
    }
}
