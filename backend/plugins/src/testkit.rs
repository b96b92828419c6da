//! Scripted plugin artifacts shared by the lifecycle and manager tests.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use persona_core::{PluginArtifact, PluginInstance, StateBlob};

use crate::loader::StaticArtifactSource;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CounterState {
    count: u64,
}

/// A plugin whose state is a JSON `{ "count": n }` blob. New generations
/// resume from the replayed count.
pub struct CounterInstance {
    caps: BTreeSet<String>,
    count: u64,
}

#[async_trait]
impl PluginInstance for CounterInstance {
    async fn on_unload(&self) -> Result<StateBlob> {
        let bytes = serde_json::to_vec(&CounterState { count: self.count })?;
        Ok(StateBlob::new(1, bytes))
    }

    fn capabilities(&self) -> BTreeSet<String> {
        self.caps.clone()
    }
}

pub struct CounterArtifact {
    version: String,
    caps: BTreeSet<String>,
    /// Count the instance starts from when loaded with an empty blob.
    initial: u64,
}

impl CounterArtifact {
    pub fn new(version: &str, caps: &[&str]) -> Self {
        Self {
            version: version.to_string(),
            caps: caps.iter().map(|c| c.to_string()).collect(),
            initial: 0,
        }
    }

    pub fn with_initial(mut self, count: u64) -> Self {
        self.initial = count;
        self
    }
}

#[async_trait]
impl PluginArtifact for CounterArtifact {
    fn version(&self) -> &str {
        &self.version
    }

    async fn on_load(&self, state: StateBlob) -> Result<Box<dyn PluginInstance>> {
        let count = if state.is_empty() {
            self.initial
        } else {
            if state.schema_version != 1 {
                bail!("unsupported state schema {}", state.schema_version);
            }
            serde_json::from_slice::<CounterState>(&state.bytes)?.count
        };
        Ok(Box::new(CounterInstance {
            caps: self.caps.clone(),
            count,
        }))
    }
}

/// An artifact whose `on_load` always fails.
pub struct BrokenArtifact {
    version: String,
}

impl BrokenArtifact {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
        }
    }
}

#[async_trait]
impl PluginArtifact for BrokenArtifact {
    fn version(&self) -> &str {
        &self.version
    }

    async fn on_load(&self, _state: StateBlob) -> Result<Box<dyn PluginInstance>> {
        bail!("refusing to load");
    }
}

/// An artifact that loads an instance whose `on_unload` fails.
pub struct StickyArtifact {
    version: String,
}

impl StickyArtifact {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
        }
    }
}

struct StickyInstance;

#[async_trait]
impl PluginInstance for StickyInstance {
    async fn on_unload(&self) -> Result<StateBlob> {
        bail!("state capture failed");
    }

    fn capabilities(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

#[async_trait]
impl PluginArtifact for StickyArtifact {
    fn version(&self) -> &str {
        &self.version
    }

    async fn on_load(&self, _state: StateBlob) -> Result<Box<dyn PluginInstance>> {
        Ok(Box::new(StickyInstance))
    }
}

/// An artifact whose `on_load` takes a fixed delay, for exercising per-name
/// serialization.
pub struct SlowArtifact {
    version: String,
    delay: Duration,
}

impl SlowArtifact {
    pub fn new(version: &str, delay: Duration) -> Self {
        Self {
            version: version.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl PluginArtifact for SlowArtifact {
    fn version(&self) -> &str {
        &self.version
    }

    async fn on_load(&self, state: StateBlob) -> Result<Box<dyn PluginInstance>> {
        tokio::time::sleep(self.delay).await;
        CounterArtifact::new(&self.version, &["slow"])
            .on_load(state)
            .await
    }
}

/// Source preloaded with counter artifacts for the common fixtures.
pub fn source_with(entries: Vec<(&str, Arc<dyn PluginArtifact>)>) -> Arc<StaticArtifactSource> {
    let source = StaticArtifactSource::default();
    for (name, artifact) in entries {
        source.register(name, artifact);
    }
    Arc::new(source)
}
