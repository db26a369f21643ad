//! Transport module - TCP listener and per-connection task spawning.

mod tcp;

pub use tcp::{spawn_session, IngestListener};
