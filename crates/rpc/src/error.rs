use tokio_tungstenite::tungstenite;

/// Errors from the JSON-RPC client.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API key is not a valid header value")]
    ApiKey,

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("server error: {message}")]
    Server { code: Option<i64>, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(RpcError::Timeout.to_string(), "request timed out");
        assert_eq!(RpcError::Closed.to_string(), "connection closed");
        let err = RpcError::Server {
            code: Some(-32601),
            message: "Method not found".into(),
        };
        assert!(err.to_string().contains("Method not found"));
    }
}
