//! Shroud runtime — erase and restore orchestration.
//!
//! Drives the crypto service, row access layer, mirror store and audit store
//! through one database transaction per command.

pub mod envelope;
pub mod orchestrator;
pub mod types;

pub use envelope::MirrorEnvelope;
pub use orchestrator::Eraser;
pub use types::*;
