//! WebSocket read pump — correlates responses and dispatches notifications.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use printwatch_protocol::rpc::RpcFrame;

use crate::client::{NotifySlot, PONG_WAIT, Pending};

/// Reads frames from the WebSocket and dispatches them.
///
/// Any incoming traffic resets the pong deadline; if the connection stays
/// silent past [`PONG_WAIT`] it is considered dead and the pump exits. On
/// exit every pending request is failed and `closed` is cancelled so the
/// transport loop can reconnect.
pub(crate) async fn read_pump<S>(
    mut read: S,
    pending: Pending,
    on_notify: NotifySlot,
    closed: CancellationToken,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let pong_deadline = tokio::time::sleep(PONG_WAIT);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut pong_deadline => {
                warn!("keepalive timeout, connection dead");
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        pong_deadline.as_mut().reset(tokio::time::Instant::now() + PONG_WAIT);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                handle_text_frame(&text, &pending, &on_notify).await;
                            }
                            tungstenite::Message::Ping(data) => {
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => {
                                trace!("received pong");
                            }
                            tungstenite::Message::Close(_) => {
                                debug!("received close frame");
                                break;
                            }
                            _ => {} // Binary — the daemon never sends it.
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Fail every in-flight request; dropping the senders wakes the waiters.
    pending.lock().await.clear();
    closed.cancel();
}

async fn handle_text_frame(text: &str, pending: &Pending, on_notify: &NotifySlot) {
    let frame: RpcFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!("failed to parse frame: {e}");
            return;
        }
    };

    // Route a response to its pending request.
    if let Some(id) = frame.id {
        let mut map = pending.lock().await;
        if let Some(tx) = map.remove(&id) {
            let _ = tx.send(frame);
        } else {
            warn!(id, "response for unknown request id");
        }
        return;
    }

    // Unsolicited notification.
    if frame.method.is_some() {
        trace!(method = frame.method.as_deref(), "server notification");
        let guard = on_notify.lock().await;
        if let Some(cb) = guard.as_ref() {
            cb(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use futures_util::stream;
    use tokio::sync::{Mutex, oneshot};

    use super::*;

    #[tokio::test]
    async fn routes_response_to_pending_request() {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let on_notify: NotifySlot = Arc::new(Mutex::new(None));

        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(17, tx);

        handle_text_frame(
            r#"{"jsonrpc":"2.0","id":17,"result":{"ok":true}}"#,
            &pending,
            &on_notify,
        )
        .await;

        let frame = rx.await.unwrap();
        assert_eq!(frame.result.unwrap()["ok"], true);
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn fires_notify_callback_for_method_frames() {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let on_notify: NotifySlot = Arc::new(Mutex::new(Some(Box::new(move |frame: RpcFrame| {
            received_clone
                .lock()
                .unwrap()
                .push(frame.method.unwrap_or_default());
        }))));

        handle_text_frame(
            r#"{"jsonrpc":"2.0","method":"notify_status_update","params":[{}]}"#,
            &pending,
            &on_notify,
        )
        .await;

        assert_eq!(
            *received.lock().unwrap(),
            vec!["notify_status_update".to_string()]
        );
    }

    #[tokio::test]
    async fn ignores_malformed_json() {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let on_notify: NotifySlot = Arc::new(Mutex::new(None));
        handle_text_frame("not valid json {{{", &pending, &on_notify).await;
    }

    #[tokio::test]
    async fn pump_exit_fails_pending_and_signals_closed() {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let on_notify: NotifySlot = Arc::new(Mutex::new(None));
        let closed = CancellationToken::new();
        let (write_tx, _write_rx) = mpsc::channel(16);

        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(3, tx);

        let empty = stream::empty::<Result<tungstenite::Message, tungstenite::Error>>();
        read_pump(
            empty,
            pending.clone(),
            on_notify,
            closed.clone(),
            write_tx,
            CancellationToken::new(),
        )
        .await;

        assert!(closed.is_cancelled());
        assert!(pending.lock().await.is_empty());
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn pump_times_out_on_silence() {
        tokio::time::pause();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let on_notify: NotifySlot = Arc::new(Mutex::new(None));
        let closed = CancellationToken::new();
        let (write_tx, _write_rx) = mpsc::channel(16);

        let silent = stream::pending::<Result<tungstenite::Message, tungstenite::Error>>();
        read_pump(
            silent,
            pending,
            on_notify,
            closed.clone(),
            write_tx,
            CancellationToken::new(),
        )
        .await;

        assert!(closed.is_cancelled());
    }
}
