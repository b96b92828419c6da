//! Lifecycle Audit Logger
//!
//! Structured lifecycle events (installed, reloaded, rolled back, failed,
//! uninstalled) written to the NDJSON log stream for operator audit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum LifecycleEvent {
    Installed {
        plugin: String,
        version: String,
    },
    Reloaded {
        plugin: String,
        from_version: String,
        to_version: String,
    },
    RolledBack {
        plugin: String,
        version: String,
        cause: String,
    },
    Failed {
        plugin: String,
        cause: String,
    },
    Uninstalled {
        plugin: String,
    },
}

#[derive(Debug, Serialize)]
pub struct EventLogEntry {
    pub operation_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: LifecycleEvent,
}

pub struct EventLogger;

impl EventLogger {
    /// Log a lifecycle event, immediately serializing it to the tracing
    /// system. Returns the operation id so callers can echo it in responses.
    pub fn log_event(event: LifecycleEvent) -> Uuid {
        let entry = EventLogEntry {
            operation_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        };

        // Leverage tracing to output NDJSON correctly wrapped
        info!(target: "lifecycle_events", event = ?entry, "Lifecycle event");
        entry.operation_id
    }
}
