//! Capability contract between the plugin manager and plugin code.
//!
//! A plugin artifact is instantiated into an isolated instance via `on_load`;
//! the instance gives its state back through `on_unload` and advertises a
//! capability set. The manager treats both sides of the contract as untrusted
//! for liveness (calls are bounded by a timeout and a panic boundary in the
//! loader), but trusted for intent — sandboxing hostile code is out of scope.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::StateBlob;

/// A loaded, running generation of a plugin.
///
/// Each successful `on_load` produces a fresh instance with no shared mutable
/// state carried over from prior generations or other plugins; the only
/// cross-version channel is the `StateBlob`.
#[async_trait]
pub trait PluginInstance: Send + Sync {
    /// Capture this instance's state for replay into a successor version.
    /// Called exactly once, by the lifecycle coordinator, at unload time.
    async fn on_unload(&self) -> Result<StateBlob>;

    /// Capability names this instance exposes to the rest of the system.
    fn capabilities(&self) -> BTreeSet<String>;
}

/// A loadable code artifact for one version of a plugin.
#[async_trait]
pub trait PluginArtifact: Send + Sync {
    /// Version token this artifact provides. Opaque to the manager; compared
    /// for change, not for semantic ordering.
    fn version(&self) -> &str;

    /// Instantiate the artifact, replaying the given state snapshot.
    ///
    /// Implementations should reject a snapshot whose `schema_version` they
    /// do not understand by returning an error rather than by panicking.
    async fn on_load(&self, state: StateBlob) -> Result<Box<dyn PluginInstance>>;
}

/// External collaborator resolving a plugin name/version reference to a
/// loadable artifact. Resolution failures surface to callers as
/// `PluginError::LoadFailure`.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn resolve(&self, name: &str, version: &str) -> Result<Arc<dyn PluginArtifact>>;
}
