//! Core data model for plugin records and state snapshots.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current lifecycle status of a plugin record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Active,
    Installing,
    Reloading,
    RollingBack,
    Failed,
    Uninstalled,
}

impl PluginStatus {
    /// Statuses that mean a lifecycle operation was in flight. A record found
    /// in one of these on registry open cannot have committed and is demoted
    /// to `Failed`.
    pub fn is_transitional(self) -> bool {
        matches!(self, Self::Installing | Self::Reloading | Self::RollingBack)
    }
}

impl std::fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Installing => "installing",
            Self::Reloading => "reloading",
            Self::RollingBack => "rollingback",
            Self::Failed => "failed",
            Self::Uninstalled => "uninstalled",
        };
        f.write_str(s)
    }
}

/// Opaque state snapshot captured from a plugin at unload time and replayed
/// at load time. The manager never interprets `bytes`; the `schema_version`
/// tag lets a new plugin version reject an incompatible snapshot explicitly
/// instead of crashing on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBlob {
    pub schema_version: u32,
    #[serde(with = "state_bytes")]
    pub bytes: Vec<u8>,
}

impl StateBlob {
    /// The empty snapshot handed to a plugin on first install.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(schema_version: u32, bytes: Vec<u8>) -> Self {
        Self {
            schema_version,
            bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Base64 (de)serialization for the opaque state bytes so records stay
/// readable as JSON in the store and over the API.
mod state_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// Durable registry record for one plugin.
///
/// `dependencies` are plugin names this plugin requires to be `Active`.
/// `required_capabilities` maps a dependency name to the capability names
/// this plugin consumes from it; the reload capability-superset check unions
/// these across active dependents. Keys are a subset of `dependencies`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRecord {
    pub name: String,
    pub version: String,
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub required_capabilities: BTreeMap<String, BTreeSet<String>>,
    pub status: PluginStatus,
    #[serde(default)]
    pub state_blob: StateBlob,
    /// Advisory flag set on active dependents when a dependency completes a
    /// reload. Cleared by this plugin's own next successful lifecycle
    /// operation. Never triggers a cascading reload.
    #[serde(default)]
    pub needs_revalidation: bool,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PluginRecord {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        dependencies: BTreeSet<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            version: version.into(),
            dependencies,
            required_capabilities: BTreeMap::new(),
            status: PluginStatus::Installing,
            state_blob: StateBlob::empty(),
            needs_revalidation: false,
            installed_at: now,
            updated_at: now,
        }
    }

    /// Capabilities this plugin requires from the named dependency.
    pub fn capabilities_required_from(&self, dependency: &str) -> BTreeSet<String> {
        self.required_capabilities
            .get(dependency)
            .cloned()
            .unwrap_or_default()
    }
}
