//! Persona plugin hot-reload manager.
//!
//! Lets the running platform install, version, and replace plugins without a
//! process restart: durable registry with snapshots, dependency-graph
//! validation, isolated loading behind a versioned handle table, and a
//! rollback-safe lifecycle state machine.

pub mod lifecycle;
pub mod loader;
pub mod manager;
pub mod registry;
pub mod resolver;
pub mod store;

#[cfg(test)]
mod testkit;

pub use lifecycle::{InstallRequest, LifecycleCoordinator};
pub use loader::{ExecutionHandle, HandleTable, PluginLoader, StaticArtifactSource};
pub use manager::PluginManager;
pub use registry::{PluginRegistry, SnapshotToken};
pub use resolver::DependencyGraph;
pub use store::RegistryStore;
