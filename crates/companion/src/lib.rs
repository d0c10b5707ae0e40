//! Ties one printer together: device records, the rule engine, webcam
//! stills and the push relay, driven by the sync engine's snapshot stream.

pub mod orchestrator;
pub mod store;

pub use orchestrator::{Companion, CompanionEvent, CompanionSettings};
pub use store::DeviceStore;
