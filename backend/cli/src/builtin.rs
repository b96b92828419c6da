//! Built-in first-party plugin artifacts.
//!
//! The artifact source resolves install/reload requests against factories
//! registered at startup. The heartbeat plugin ships with the binary so
//! operators can exercise the full install → reload → rollback cycle without
//! deploying platform modules.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use persona_core::{PluginArtifact, PluginInstance, StateBlob};
use persona_plugins::StaticArtifactSource;

const HEARTBEAT_SCHEMA: u32 = 1;

struct HeartbeatInstance {
    beats: u64,
}

#[async_trait]
impl PluginInstance for HeartbeatInstance {
    async fn on_unload(&self) -> Result<StateBlob> {
        Ok(StateBlob::new(
            HEARTBEAT_SCHEMA,
            self.beats.to_le_bytes().to_vec(),
        ))
    }

    fn capabilities(&self) -> BTreeSet<String> {
        ["heartbeat".to_string()].into_iter().collect()
    }
}

struct HeartbeatArtifact {
    version: &'static str,
}

#[async_trait]
impl PluginArtifact for HeartbeatArtifact {
    fn version(&self) -> &str {
        self.version
    }

    async fn on_load(&self, state: StateBlob) -> Result<Box<dyn PluginInstance>> {
        let beats = if state.is_empty() {
            0
        } else {
            if state.schema_version != HEARTBEAT_SCHEMA {
                bail!("unsupported heartbeat state schema {}", state.schema_version);
            }
            let bytes: [u8; 8] = state
                .bytes
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("malformed heartbeat state"))?;
            u64::from_le_bytes(bytes)
        };
        Ok(Box::new(HeartbeatInstance { beats }))
    }
}

/// Register the built-in artifacts. Platform modules (voice synth, lip-sync
/// render shims) register theirs here as well when compiled in.
pub fn register_builtin(source: &StaticArtifactSource) {
    source.register("heartbeat", Arc::new(HeartbeatArtifact { version: "1.0.0" }));
    source.register("heartbeat", Arc::new(HeartbeatArtifact { version: "1.1.0" }));
}
