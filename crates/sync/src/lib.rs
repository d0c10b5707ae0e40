//! Keeps a live, merged copy of the printer state and publishes immutable
//! snapshots whenever anything changes.
//!
//! The daemon only ever sends partial status objects; [`engine::StateSyncEngine`]
//! merges them into its tracked objects, resynchronises from scratch after
//! every reconnect or firmware restart, and hands out [`snapshot::Snapshot`]
//! values through a watch channel. Consumers that fall behind simply see the
//! latest snapshot.

pub mod api;
pub mod engine;
pub mod snapshot;

pub use api::PrinterApi;
pub use engine::{EngineEvent, StateSyncEngine};
pub use snapshot::Snapshot;
