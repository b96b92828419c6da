//! Manager facade — the public install / reload / list / get / uninstall
//! surface, composing the registry, resolver, and lifecycle coordinator.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use persona_core::{ArtifactSource, PluginError, PluginRecord, PluginStatus};

use crate::lifecycle::{InstallRequest, LifecycleCoordinator};
use crate::registry::PluginRegistry;

pub struct PluginManager {
    coordinator: LifecycleCoordinator,
}

impl PluginManager {
    pub fn new(
        registry: Arc<PluginRegistry>,
        source: Arc<dyn ArtifactSource>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            coordinator: LifecycleCoordinator::new(registry, source, call_timeout),
        }
    }

    pub async fn install(&self, request: InstallRequest) -> Result<PluginRecord, PluginError> {
        self.coordinator.install(request).await
    }

    pub async fn reload(&self, name: &str, version: &str) -> Result<PluginRecord, PluginError> {
        self.coordinator.reload(name, version).await
    }

    pub async fn uninstall(&self, name: &str) -> Result<(), PluginError> {
        self.coordinator.uninstall(name).await
    }

    /// One record, with **effective** status: a stored-active plugin whose
    /// transitive dependency set contains a non-active plugin refuses to
    /// report active. The stored status is untouched, so repairing the
    /// dependency restores dependents without extra writes.
    pub fn get(&self, name: &str) -> Result<PluginRecord, PluginError> {
        let records = self.coordinator.registry().list();
        let mut record = records
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        record.status = effective_status(&record, &records);
        Ok(record)
    }

    /// All records in stable insertion order, with effective statuses.
    pub fn list(&self) -> Vec<PluginRecord> {
        let records = self.coordinator.registry().list();
        records
            .iter()
            .map(|r| {
                let mut record = r.clone();
                record.status = effective_status(r, &records);
                record
            })
            .collect()
    }

    /// Capability names of the live instance, for callers invoking the
    /// plugin. The handle is read-shared; only the coordinator retires it.
    pub fn capabilities(&self, name: &str) -> Result<BTreeSet<String>, PluginError> {
        self.coordinator
            .handles()
            .current(name)
            .map(|handle| handle.capabilities())
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }
}

/// Walk the dependency closure of `record`; stored-active status only holds
/// up if every transitive dependency is itself stored-active.
fn effective_status(record: &PluginRecord, records: &[PluginRecord]) -> PluginStatus {
    if record.status != PluginStatus::Active {
        return record.status;
    }
    let by_name: HashMap<&str, &PluginRecord> =
        records.iter().map(|r| (r.name.as_str(), r)).collect();

    let mut stack: Vec<&str> = record.dependencies.iter().map(String::as_str).collect();
    let mut seen: BTreeSet<&str> = stack.iter().copied().collect();
    while let Some(dep) = stack.pop() {
        match by_name.get(dep) {
            Some(r) if r.status == PluginStatus::Active => {
                for next in &r.dependencies {
                    if seen.insert(next.as_str()) {
                        stack.push(next.as_str());
                    }
                }
            }
            // Missing or non-active dependency: this plugin cannot be active.
            _ => return PluginStatus::Failed,
        }
    }
    PluginStatus::Active
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::loader::StaticArtifactSource;
    use crate::testkit::{source_with, BrokenArtifact, CounterArtifact, SlowArtifact};

    fn manager(source: Arc<StaticArtifactSource>) -> Arc<PluginManager> {
        Arc::new(PluginManager::new(
            Arc::new(PluginRegistry::in_memory().unwrap()),
            source,
            Duration::from_millis(500),
        ))
    }

    fn install_req(name: &str, version: &str, deps: &[&str]) -> InstallRequest {
        InstallRequest {
            name: name.to_string(),
            version: version.to_string(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            required_capabilities: BTreeMap::new(),
        }
    }

    fn counter(version: &str, caps: &[&str]) -> Arc<CounterArtifact> {
        Arc::new(CounterArtifact::new(version, caps))
    }

    #[tokio::test]
    async fn list_reflects_dependency_install_order() {
        let source = source_with(vec![
            ("base", counter("1.0.0", &[]) as _),
            ("audio", counter("1.0.0", &[]) as _),
            ("render", counter("1.0.0", &[]) as _),
        ]);
        let mgr = manager(source);

        mgr.install(install_req("base", "1.0.0", &[])).await.unwrap();
        mgr.install(install_req("audio", "1.0.0", &["base"])).await.unwrap();
        mgr.install(install_req("render", "1.0.0", &["base", "audio"]))
            .await
            .unwrap();

        let names: Vec<String> = mgr.list().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["base", "audio", "render"]);
    }

    #[tokio::test]
    async fn cyclic_install_rejected_with_zero_mutation() {
        let source = source_with(vec![
            ("a", counter("1.0.0", &[]) as _),
            ("b", counter("1.0.0", &[]) as _),
        ]);
        let mgr = manager(source);

        // b -> a cannot be installed before a exists, so drive the cycle via
        // a's own edge set: a -> a is the minimal cycle.
        let err = mgr.install(install_req("a", "1.0.0", &["a"])).await.unwrap_err();
        assert!(matches!(err, PluginError::CycleDetected { .. }));
        assert!(mgr.list().is_empty());
    }

    // Spec scenario: install B, install A(deps=[B]), reload B to v2 with a
    // `{count:1}` blob accepted by v2.
    #[tokio::test]
    async fn reload_scenario_preserves_count_state() {
        let source = source_with(vec![
            (
                "b",
                Arc::new(CounterArtifact::new("v1", &["count"]).with_initial(1)) as _,
            ),
            ("b", counter("v2", &["count"]) as _),
            ("a", counter("v1", &[]) as _),
        ]);
        let mgr = manager(source);

        mgr.install(install_req("b", "v1", &[])).await.unwrap();
        mgr.install(install_req("a", "v1", &["b"])).await.unwrap();

        mgr.reload("b", "v2").await.unwrap();
        let b = mgr.get("b").unwrap();
        assert_eq!(b.version, "v2");
        assert_eq!(b.status, PluginStatus::Active);
        let state: serde_json::Value = serde_json::from_slice(&b.state_blob.bytes).unwrap();
        assert_eq!(state["count"], 1);
    }

    // Spec scenario: reload with an artifact that always fails on_load.
    #[tokio::test]
    async fn bad_artifact_reload_reports_soft_failure() {
        let source = source_with(vec![
            ("b", counter("v1", &[]) as _),
            ("b", Arc::new(BrokenArtifact::new("v2")) as _),
        ]);
        let mgr = manager(source);

        mgr.install(install_req("b", "v1", &[])).await.unwrap();
        let err = mgr.reload("b", "v2").await.unwrap_err();
        assert!(matches!(err, PluginError::LoadFailure(_)));

        let b = mgr.get("b").unwrap();
        assert_eq!(b.version, "v1");
        assert_eq!(b.status, PluginStatus::Active);
    }

    #[tokio::test]
    async fn concurrent_reloads_serialize_one_busy() {
        let source = source_with(vec![
            ("b", counter("v1", &[]) as _),
            (
                "b",
                Arc::new(SlowArtifact::new("v2", Duration::from_millis(150))) as _,
            ),
            ("b", counter("v3", &[]) as _),
        ]);
        let mgr = manager(source);
        mgr.install(install_req("b", "v1", &[])).await.unwrap();

        let first = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.reload("b", "v2").await })
        };
        // Give the first reload time to take the per-name lock.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = mgr.reload("b", "v3").await;

        assert!(matches!(second, Err(PluginError::Busy(_))));
        first.await.unwrap().unwrap();
        assert_eq!(mgr.get("b").unwrap().version, "v2");
    }

    #[tokio::test]
    async fn operations_on_distinct_plugins_run_concurrently() {
        let source = source_with(vec![
            (
                "x",
                Arc::new(SlowArtifact::new("v1", Duration::from_millis(100))) as _,
            ),
            (
                "y",
                Arc::new(SlowArtifact::new("v1", Duration::from_millis(100))) as _,
            ),
        ]);
        let mgr = manager(source);

        let start = std::time::Instant::now();
        let (x, y) = tokio::join!(
            mgr.install(install_req("x", "v1", &[])),
            mgr.install(install_req("y", "v1", &[]))
        );
        x.unwrap();
        y.unwrap();
        // Serialized installs would take >= 200ms.
        assert!(start.elapsed() < Duration::from_millis(190));
    }

    #[tokio::test]
    async fn dependents_of_failed_plugin_report_non_active() {
        let source = source_with(vec![
            ("b", counter("v1", &[]) as _),
            ("a", counter("v1", &[]) as _),
        ]);
        let registry = Arc::new(PluginRegistry::in_memory().unwrap());
        let mgr = Arc::new(PluginManager::new(
            Arc::clone(&registry),
            source,
            Duration::from_millis(500),
        ));

        mgr.install(install_req("b", "v1", &[])).await.unwrap();
        mgr.install(install_req("a", "v1", &["b"])).await.unwrap();

        // Force b into the terminal failed state directly in the registry.
        let mut b = registry.get("b").unwrap();
        b.status = PluginStatus::Failed;
        registry.put(b).unwrap();

        assert_eq!(mgr.get("b").unwrap().status, PluginStatus::Failed);
        // a is stored active but must refuse to report it.
        assert_ne!(mgr.get("a").unwrap().status, PluginStatus::Active);
        assert_eq!(registry.get("a").unwrap().status, PluginStatus::Active);
    }

    #[tokio::test]
    async fn capabilities_passthrough() {
        let source = source_with(vec![("b", counter("v1", &["count", "reset"]) as _)]);
        let mgr = manager(source);
        mgr.install(install_req("b", "v1", &[])).await.unwrap();

        let caps = mgr.capabilities("b").unwrap();
        assert!(caps.contains("count") && caps.contains("reset"));
        assert!(matches!(
            mgr.capabilities("ghost"),
            Err(PluginError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn get_unknown_plugin_is_not_found() {
        let source = source_with(vec![]);
        let mgr = manager(source);
        assert!(matches!(mgr.get("ghost"), Err(PluginError::NotFound(_))));
    }
}
