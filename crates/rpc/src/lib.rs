//! Reconnecting JSON-RPC client for the printer daemon's WebSocket API.
//!
//! [`RpcClient`] wraps one live connection: a write pump serialises outbound
//! frames, a read pump correlates responses to pending requests by id and
//! forwards server notifications to a registered callback. [`run_transport`]
//! supervises the connection for the life of the process, reconnecting with
//! exponential backoff whenever it drops.

pub mod client;
pub mod error;
mod pumps;
pub mod transport;

pub use client::{DEFAULT_REQUEST_TIMEOUT, NotifyCallback, RpcClient};
pub use error::RpcError;
pub use transport::{ReconnectConfig, RpcConfig, TransportEvent, run_transport};
