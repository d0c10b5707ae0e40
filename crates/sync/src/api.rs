//! Seam between the sync engine and the RPC client.

use std::sync::Arc;

use serde_json::Value;

use printwatch_rpc::{RpcClient, RpcError};

/// Anything that can execute a JSON-RPC request against the daemon.
///
/// The engine is generic over this trait so tests can script responses
/// without a WebSocket.
pub trait PrinterApi: Clone + Send + Sync + 'static {
    fn send(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> impl Future<Output = Result<Value, RpcError>> + Send;
}

impl PrinterApi for Arc<RpcClient> {
    async fn send(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        self.send_request(method, params).await
    }
}
