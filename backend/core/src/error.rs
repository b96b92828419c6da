use thiserror::Error;

/// Top-level error type for the Persona plugin manager.
///
/// Validation errors (`DuplicateName`, `CycleDetected`, `MissingDependency`,
/// `DependencyViolation`) are returned before any side effect. `LoadFailure`
/// and `UnloadFailure` during a reload are recovered by automatic rollback and
/// reported as soft failures. `RollbackFailure` is the only fatal kind: the
/// plugin is left in `Failed` status and requires operator intervention.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("plugin name already registered: {0}")]
    DuplicateName(String),

    #[error("dependency cycle detected: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("plugin '{name}' references missing or inactive dependencies: {missing:?}")]
    MissingDependency { name: String, missing: Vec<String> },

    #[error("plugin '{name}' is still required by active plugins: {dependents:?}")]
    DependencyViolation { name: String, dependents: Vec<String> },

    #[error("a lifecycle operation is already in flight for plugin '{0}'")]
    Busy(String),

    #[error("plugin load failed: {0}")]
    LoadFailure(String),

    #[error("plugin unload failed: {0}")]
    UnloadFailure(String),

    #[error("rollback failed for plugin '{name}': {reason}")]
    RollbackFailure { name: String, reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PluginError {
    /// Stable machine-readable kind tag, used in API error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::DuplicateName(_) => "DuplicateName",
            Self::CycleDetected { .. } => "CycleDetected",
            Self::MissingDependency { .. } => "MissingDependency",
            Self::DependencyViolation { .. } => "DependencyViolation",
            Self::Busy(_) => "Busy",
            Self::LoadFailure(_) => "LoadFailure",
            Self::UnloadFailure(_) => "UnloadFailure",
            Self::RollbackFailure { .. } => "RollbackFailure",
            Self::Storage(_) => "Storage",
            Self::Other(_) => "Internal",
        }
    }
}
