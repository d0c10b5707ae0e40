pub mod device;
pub mod objects;
pub mod printer;
pub mod push;
pub mod rpc;
pub mod version;
pub mod webcam;

// Re-export primary types for convenience.
pub use objects::{EtaSource, KlippyState, ObjectKey, ObjectKind, PrintState};
pub use rpc::{RpcErrorBody, RpcFrame, RpcRequest};
