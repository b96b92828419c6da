//! Plugin loader — instantiates code artifacts into isolated execution
//! handles, and the versioned handle table that makes hot-swap possible.
//!
//! Plugin-supplied code (`on_load`, `on_unload`) runs on its own spawned task
//! under a configurable timeout, so a hang or panic inside a plugin becomes a
//! `LoadFailure`/`UnloadFailure` instead of corrupting the coordinator.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use persona_core::{PluginArtifact, PluginError, PluginInstance, StateBlob};

/// One loaded generation of a plugin. Read-shared by callers invoking its
/// capabilities; only the lifecycle coordinator retires it.
pub struct ExecutionHandle {
    name: String,
    version: String,
    generation: u64,
    instance: Arc<dyn PluginInstance>,
    unloaded: AtomicBool,
}

impl ExecutionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn capabilities(&self) -> BTreeSet<String> {
        self.instance.capabilities()
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Performs isolated instantiation and retirement of plugin code.
pub struct PluginLoader {
    call_timeout: Duration,
    generations: AtomicU64,
}

impl PluginLoader {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            call_timeout,
            generations: AtomicU64::new(0),
        }
    }

    /// Instantiate `artifact`, replaying `state`. Each load produces a fresh
    /// handle with a unique generation; nothing is shared with prior
    /// generations of the same plugin or with other plugins.
    pub async fn load(
        &self,
        name: &str,
        artifact: Arc<dyn PluginArtifact>,
        state: StateBlob,
    ) -> Result<Arc<ExecutionHandle>, PluginError> {
        let version = artifact.version().to_string();
        debug!(plugin = %name, version = %version, "Loading plugin artifact");

        let mut task = tokio::spawn(async move { artifact.on_load(state).await });
        let instance = match timeout(self.call_timeout, &mut task).await {
            Err(_) => {
                task.abort();
                return Err(PluginError::LoadFailure(format!(
                    "on_load for '{name}' timed out after {:?}",
                    self.call_timeout
                )))
            }
            Ok(Err(join_err)) => {
                return Err(PluginError::LoadFailure(format!(
                    "on_load for '{name}' panicked: {join_err}"
                )))
            }
            Ok(Ok(Err(e))) => {
                return Err(PluginError::LoadFailure(format!(
                    "on_load for '{name}' failed: {e}"
                )))
            }
            Ok(Ok(Ok(instance))) => instance,
        };

        Ok(Arc::new(ExecutionHandle {
            name: name.to_string(),
            version,
            generation: self.generations.fetch_add(1, Ordering::Relaxed),
            instance: Arc::from(instance),
            unloaded: AtomicBool::new(false),
        }))
    }

    /// Retire a handle, capturing its state for a successor.
    ///
    /// # Panics
    /// Unloading a handle twice is a programming error in the coordinator,
    /// not a recoverable plugin fault, and panics.
    pub async fn unload(&self, handle: &ExecutionHandle) -> Result<StateBlob, PluginError> {
        assert!(
            !handle.unloaded.swap(true, Ordering::SeqCst),
            "on_unload called twice for plugin '{}' generation {}",
            handle.name,
            handle.generation
        );
        debug!(plugin = %handle.name, version = %handle.version, "Unloading plugin");

        let instance = Arc::clone(&handle.instance);
        let mut task = tokio::spawn(async move { instance.on_unload().await });
        match timeout(self.call_timeout, &mut task).await {
            Err(_) => {
                task.abort();
                Err(PluginError::UnloadFailure(format!(
                    "on_unload for '{}' timed out after {:?}",
                    handle.name, self.call_timeout
                )))
            }
            Ok(Err(join_err)) => Err(PluginError::UnloadFailure(format!(
                "on_unload for '{}' panicked: {join_err}",
                handle.name
            ))),
            Ok(Ok(Err(e))) => Err(PluginError::UnloadFailure(format!(
                "on_unload for '{}' failed: {e}",
                handle.name
            ))),
            Ok(Ok(Ok(state))) => Ok(state),
        }
    }
}

#[derive(Default)]
struct HandleCell {
    current: Option<Arc<ExecutionHandle>>,
    /// Last known-good handle, held only during a reload window and
    /// discarded on completion (success or rollback).
    previous: Option<Arc<ExecutionHandle>>,
}

/// Per-plugin indirection cells mapping a name to its live execution handle.
/// "Reload" constructs the new handle out-of-line, then swaps the cell; the
/// old handle is dropped once in-flight `Arc` readers drain.
#[derive(Default)]
pub struct HandleTable {
    cells: RwLock<HashMap<String, HandleCell>>,
}

impl HandleTable {
    pub fn current(&self, name: &str) -> Option<Arc<ExecutionHandle>> {
        let cells = self.cells.read().expect("handle table lock poisoned");
        cells.get(name).and_then(|c| c.current.clone())
    }

    /// Install the first handle for a plugin.
    pub fn install(&self, name: &str, handle: Arc<ExecutionHandle>) {
        let mut cells = self.cells.write().expect("handle table lock poisoned");
        cells.insert(
            name.to_string(),
            HandleCell {
                current: Some(handle),
                previous: None,
            },
        );
    }

    /// Begin a reload window: retire `current` into `previous` and return it.
    pub fn begin_reload(&self, name: &str) -> Option<Arc<ExecutionHandle>> {
        let mut cells = self.cells.write().expect("handle table lock poisoned");
        let cell = cells.entry(name.to_string()).or_default();
        let old = cell.current.take();
        cell.previous = old.clone();
        old
    }

    /// Atomically publish `handle` as current and close the reload window.
    pub fn commit(&self, name: &str, handle: Arc<ExecutionHandle>) {
        let mut cells = self.cells.write().expect("handle table lock poisoned");
        let cell = cells.entry(name.to_string()).or_default();
        if let Some(prev) = cell.previous.take() {
            debug!(
                plugin = %name,
                retired = prev.generation(),
                published = handle.generation(),
                "Swapped execution handle"
            );
        }
        cell.current = Some(handle);
    }

    /// Drop all handles for a plugin (uninstall, or terminal failure).
    pub fn clear(&self, name: &str) {
        let mut cells = self.cells.write().expect("handle table lock poisoned");
        if cells.remove(name).is_some() {
            warn!(plugin = %name, "Cleared execution handles");
        }
    }
}

/// In-process artifact source for trusted first-party modules: the host
/// registers a factory per (name, version) pair at startup, and install /
/// reload requests resolve against it. Failures surface as `LoadFailure` at
/// the call site.
#[derive(Default)]
pub struct StaticArtifactSource {
    artifacts: RwLock<HashMap<(String, String), Arc<dyn PluginArtifact>>>,
}

impl StaticArtifactSource {
    pub fn register(&self, name: &str, artifact: Arc<dyn PluginArtifact>) {
        let mut artifacts = self.artifacts.write().expect("artifact source lock poisoned");
        let version = artifact.version().to_string();
        artifacts.insert((name.to_string(), version), artifact);
    }

    pub fn unregister(&self, name: &str, version: &str) {
        let mut artifacts = self.artifacts.write().expect("artifact source lock poisoned");
        artifacts.remove(&(name.to_string(), version.to_string()));
    }
}

#[async_trait::async_trait]
impl persona_core::ArtifactSource for StaticArtifactSource {
    async fn resolve(
        &self,
        name: &str,
        version: &str,
    ) -> anyhow::Result<Arc<dyn PluginArtifact>> {
        let artifacts = self.artifacts.read().expect("artifact source lock poisoned");
        artifacts
            .get(&(name.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no artifact registered for '{name}' v{version}"))
    }
}
