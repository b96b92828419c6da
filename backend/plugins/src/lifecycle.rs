//! Lifecycle coordinator — drives the install / reload / uninstall state
//! machine, including state capture and crash-safe rollback.
//!
//! Reload success path: `Active → BackingUp → Unloading → LoadingNew →
//! RestoringState → Active`. Any failure after unloading begins rolls back to
//! the previous version; a failure during rollback is terminal (`Failed`,
//! operator intervention required).
//!
//! Per-plugin operations are serialized by a per-name `try_lock` (`Busy` when
//! contended). Validation happens before any side effect; from `Unloading`
//! onward the protocol runs on its own task, so dropping the caller's future
//! cannot abandon a half-swapped plugin.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use persona_core::{
    ArtifactSource, PluginArtifact, PluginError, PluginRecord, PluginStatus, StateBlob,
};

use crate::loader::{HandleTable, PluginLoader};
use crate::registry::{PluginRegistry, SnapshotToken};
use crate::resolver::DependencyGraph;

/// Parameters for installing a new plugin.
#[derive(Debug, Clone, Deserialize)]
pub struct InstallRequest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Per-dependency capability names this plugin consumes. Keys must be a
    /// subset of `dependencies`.
    #[serde(default)]
    pub required_capabilities: BTreeMap<String, BTreeSet<String>>,
}

pub struct LifecycleCoordinator {
    registry: Arc<PluginRegistry>,
    loader: Arc<PluginLoader>,
    handles: Arc<HandleTable>,
    source: Arc<dyn ArtifactSource>,
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LifecycleCoordinator {
    pub fn new(
        registry: Arc<PluginRegistry>,
        source: Arc<dyn ArtifactSource>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            loader: Arc::new(PluginLoader::new(call_timeout)),
            handles: Arc::new(HandleTable::default()),
            source,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn handles(&self) -> &Arc<HandleTable> {
        &self.handles
    }

    #[cfg(test)]
    pub(crate) fn lock_count(&self) -> usize {
        self.locks.lock().expect("lock map poisoned").len()
    }

    /// Acquire the per-plugin lock without waiting; a held lock means another
    /// lifecycle operation is in flight for this name.
    fn acquire(&self, name: &str) -> Result<OwnedMutexGuard<()>, PluginError> {
        let lock = {
            let mut locks = self.locks.lock().expect("lock map poisoned");
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        lock.try_lock_owned()
            .map_err(|_| PluginError::Busy(name.to_string()))
    }

    /// Install a new plugin: graph validation fails closed before any loader
    /// call; the record is persisted as `installing` across the load so a
    /// crash mid-install is detectable on reopen.
    pub async fn install(&self, request: InstallRequest) -> Result<PluginRecord, PluginError> {
        let guard = self.acquire(&request.name)?;

        if self.registry.contains(&request.name) {
            return Err(PluginError::DuplicateName(request.name));
        }

        let graph = DependencyGraph::from_records(&self.registry.list());
        let missing = graph.missing_dependencies(&request.dependencies);
        if !missing.is_empty() {
            return Err(PluginError::MissingDependency {
                name: request.name,
                missing: missing.into_iter().collect(),
            });
        }
        graph
            .with_candidate(&request.name, &request.dependencies)
            .validate()?;

        let artifact = self.resolve(&request.name, &request.version).await?;

        let registry = Arc::clone(&self.registry);
        let loader = Arc::clone(&self.loader);
        let handles = Arc::clone(&self.handles);
        let task = tokio::spawn(async move {
            let _guard = guard;

            let mut record =
                PluginRecord::new(request.name.clone(), artifact.version(), request.dependencies);
            record.required_capabilities = request.required_capabilities;
            registry.put(record.clone())?;

            let handle = match loader.load(&request.name, artifact, StateBlob::empty()).await {
                Ok(handle) => handle,
                Err(e) => {
                    // Undo the provisional record so a failed load leaves the
                    // registry exactly as it was.
                    if let Err(cleanup) = registry.remove(&request.name) {
                        warn!(plugin = %request.name, error = %cleanup, "Failed to clean up after aborted install");
                    }
                    return Err(e);
                }
            };

            // Dependencies were validated before the load; a concurrent
            // operation may have retired one in the meantime. Refuse to
            // commit an Active record with a missing dependency.
            let graph = DependencyGraph::from_records(&registry.list());
            let missing = graph.missing_dependencies(&record.dependencies);
            if !missing.is_empty() {
                if let Err(e) = loader.unload(&handle).await {
                    warn!(plugin = %request.name, error = %e, "on_unload failed while aborting install");
                }
                if let Err(cleanup) = registry.remove(&request.name) {
                    warn!(plugin = %request.name, error = %cleanup, "Failed to clean up after aborted install");
                }
                return Err(PluginError::MissingDependency {
                    name: request.name,
                    missing: missing.into_iter().collect(),
                });
            }

            record.status = PluginStatus::Active;
            record.updated_at = chrono::Utc::now();
            registry.put(record.clone())?;
            handles.install(&request.name, handle);

            info!(plugin = %record.name, version = %record.version, "Plugin installed");
            Ok(record)
        });
        flatten(task.await)
    }

    /// Hot-reload an active plugin to a new artifact version, preserving its
    /// state blob across the swap. Failures after unloading begins roll back
    /// to the previous version automatically.
    pub async fn reload(&self, name: &str, version: &str) -> Result<PluginRecord, PluginError> {
        let guard = self.acquire(name)?;

        let record = self
            .registry
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        if record.status != PluginStatus::Active {
            return Err(PluginError::LoadFailure(format!(
                "plugin '{name}' is not active (status {}); reinstall required",
                record.status
            )));
        }

        let artifact = self.resolve(name, version).await?;
        let snapshot = self.registry.snapshot(name)?;

        // Everything past this point mutates shared state and must reach a
        // terminal status even if the caller stops waiting.
        let ctx = ReloadCtx {
            registry: Arc::clone(&self.registry),
            loader: Arc::clone(&self.loader),
            handles: Arc::clone(&self.handles),
            source: Arc::clone(&self.source),
            name: name.to_string(),
        };
        let task = tokio::spawn(async move {
            let _guard = guard;
            ctx.run(artifact, snapshot).await
        });
        flatten(task.await)
    }

    /// Remove a plugin. Refused while any active plugin depends on it.
    pub async fn uninstall(&self, name: &str) -> Result<(), PluginError> {
        let guard = self.acquire(name)?;

        let record = self
            .registry
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        // Transitional records count too: a plugin mid-install or mid-reload
        // is about to need this dependency.
        let dependents: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .filter(|r| {
                (r.status == PluginStatus::Active || r.status.is_transitional())
                    && r.dependencies.contains(name)
            })
            .map(|r| r.name)
            .collect();
        if !dependents.is_empty() {
            return Err(PluginError::DependencyViolation {
                name: name.to_string(),
                dependents,
            });
        }

        let registry = Arc::clone(&self.registry);
        let loader = Arc::clone(&self.loader);
        let handles = Arc::clone(&self.handles);
        let plugin = name.to_string();
        let task = tokio::spawn(async move {
            let _guard = guard;

            if record.status == PluginStatus::Active {
                if let Some(handle) = handles.current(&plugin) {
                    // Best-effort final state capture; the record is being
                    // removed either way.
                    if let Err(e) = loader.unload(&handle).await {
                        warn!(plugin = %plugin, error = %e, "on_unload failed during uninstall");
                    }
                }
            }
            handles.clear(&plugin);
            registry.remove(&plugin)?;
            info!(plugin = %plugin, "Plugin uninstalled");
            Ok(())
        });
        let result = flatten(task.await);
        if result.is_ok() {
            // The guard dropped with the task; the name is free again.
            self.locks.lock().expect("lock map poisoned").remove(name);
        }
        result
    }

    async fn resolve(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Arc<dyn PluginArtifact>, PluginError> {
        self.source
            .resolve(name, version)
            .await
            .map_err(|e| PluginError::LoadFailure(format!("artifact resolution failed: {e}")))
    }
}

fn flatten<T>(
    joined: Result<Result<T, PluginError>, tokio::task::JoinError>,
) -> Result<T, PluginError> {
    match joined {
        Ok(result) => result,
        Err(join_err) => Err(PluginError::Other(anyhow::anyhow!(
            "lifecycle task failed: {join_err}"
        ))),
    }
}

struct ReloadCtx {
    registry: Arc<PluginRegistry>,
    loader: Arc<PluginLoader>,
    handles: Arc<HandleTable>,
    source: Arc<dyn ArtifactSource>,
    name: String,
}

impl ReloadCtx {
    async fn run(
        self,
        artifact: Arc<dyn PluginArtifact>,
        snapshot: SnapshotToken,
    ) -> Result<PluginRecord, PluginError> {
        let name = self.name.clone();

        // BackingUp: capture state from the live instance.
        let current = match self.handles.current(&name) {
            Some(handle) => handle,
            None => {
                return Err(PluginError::LoadFailure(format!(
                    "plugin '{name}' has no live execution handle"
                )))
            }
        };
        let state = match self.loader.unload(&current).await {
            Ok(state) => state,
            Err(e) => {
                // The old instance is gone either way; roll back onto the
                // last persisted snapshot state.
                self.handles.begin_reload(&name);
                let fallback = snapshot.record().state_blob.clone();
                return self.rollback(snapshot, fallback, e).await;
            }
        };

        // Unloading: retire the old handle, mark the record reloading, and
        // persist the captured state so a crash here cannot lose it.
        self.handles.begin_reload(&name);
        let mut reloading = snapshot.record().clone();
        reloading.status = PluginStatus::Reloading;
        reloading.state_blob = state.clone();
        reloading.updated_at = chrono::Utc::now();
        if let Err(e) = self.registry.put(reloading) {
            return self.rollback(snapshot, state, e).await;
        }

        // LoadingNew.
        let new_handle = match self.loader.load(&name, artifact, state.clone()).await {
            Ok(handle) => handle,
            Err(e) => return self.rollback(snapshot, state, e).await,
        };

        // RestoringState: the new version must still cover everything active
        // dependents require from this plugin.
        let required = self.required_by_dependents();
        let provided = new_handle.capabilities();
        if !required.is_subset(&provided) {
            let dropped: Vec<&String> = required.difference(&provided).collect();
            let e = PluginError::LoadFailure(format!(
                "new version of '{name}' drops capabilities required by active dependents: {dropped:?}"
            ));
            return self.rollback(snapshot, state, e).await;
        }

        // Commit.
        let mut committed = snapshot.record().clone();
        committed.version = new_handle.version().to_string();
        committed.status = PluginStatus::Active;
        committed.state_blob = state;
        committed.needs_revalidation = false;
        committed.updated_at = chrono::Utc::now();
        if let Err(e) = self.registry.put(committed.clone()) {
            let fallback = committed.state_blob.clone();
            return self.rollback(snapshot, fallback, e).await;
        }
        self.handles.commit(&name, new_handle);
        self.flag_dependents_for_revalidation();

        info!(plugin = %name, version = %committed.version, "Plugin reloaded");
        Ok(committed)
    }

    /// RollingBack: reinstantiate the previous artifact with the backed-up
    /// state. If that also fails the plugin is terminally `Failed`; otherwise
    /// the registry is restored to its pre-operation snapshot and the soft
    /// failure `cause` is reported to the caller.
    async fn rollback(
        &self,
        snapshot: SnapshotToken,
        state: StateBlob,
        cause: PluginError,
    ) -> Result<PluginRecord, PluginError> {
        let name = &self.name;
        let previous_version = snapshot.record().version.clone();
        warn!(
            plugin = %name,
            version = %previous_version,
            cause = %cause,
            "Reload failed; rolling back"
        );

        let mut rolling = snapshot.record().clone();
        rolling.status = PluginStatus::RollingBack;
        rolling.updated_at = chrono::Utc::now();
        if let Err(e) = self.registry.put(rolling) {
            warn!(plugin = %name, error = %e, "Could not persist rollingback status");
        }

        let restored = async {
            let artifact = self
                .source
                .resolve(name, &previous_version)
                .await
                .map_err(|e| PluginError::LoadFailure(e.to_string()))?;
            self.loader.load(name, artifact, state).await
        }
        .await;

        match restored {
            Ok(handle) => {
                self.registry.restore(snapshot)?;
                self.handles.commit(name, handle);
                info!(plugin = %name, version = %previous_version, "Rollback complete");
                Err(cause)
            }
            Err(rollback_err) => {
                error!(
                    plugin = %name,
                    error = %rollback_err,
                    "Rollback failed; marking plugin failed"
                );
                let mut failed = snapshot.record().clone();
                failed.status = PluginStatus::Failed;
                failed.updated_at = chrono::Utc::now();
                if let Err(e) = self.registry.put(failed) {
                    error!(plugin = %name, error = %e, "Could not persist failed status");
                }
                self.handles.clear(name);
                Err(PluginError::RollbackFailure {
                    name: name.clone(),
                    reason: format!("{cause}; rollback: {rollback_err}"),
                })
            }
        }
    }

    /// Union of capabilities active dependents declared they consume from
    /// this plugin.
    fn required_by_dependents(&self) -> BTreeSet<String> {
        self.registry
            .list()
            .into_iter()
            .filter(|r| r.status == PluginStatus::Active && r.dependencies.contains(&self.name))
            .flat_map(|r| r.capabilities_required_from(&self.name))
            .collect()
    }

    /// Advisory only: dependents are flagged, never auto-reloaded. Covers
    /// the transitive Active dependents of the reload target, not just the
    /// direct ones.
    fn flag_dependents_for_revalidation(&self) {
        let records = self.registry.list();
        let graph = DependencyGraph::from_records(&records);
        let affected: BTreeSet<String> = graph
            .affected_closure(&self.name)
            .into_iter()
            .skip(1) // the target itself
            .collect();
        for mut dependent in records {
            if dependent.status == PluginStatus::Active
                && affected.contains(&dependent.name)
                && !dependent.needs_revalidation
            {
                dependent.needs_revalidation = true;
                dependent.updated_at = chrono::Utc::now();
                if let Err(e) = self.registry.put(dependent) {
                    warn!(plugin = %self.name, error = %e, "Could not flag dependent for revalidation");
                }
            }
        }
    }
}
