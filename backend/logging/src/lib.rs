//! Telemetry and structured logging components for Persona.
//!
//! Handles JSON output generation, file rotation, and plugin lifecycle audit
//! event logging.

pub mod event_logger;
pub mod logger;

pub use event_logger::{EventLogEntry, EventLogger, LifecycleEvent};
pub use logger::init_logger;
