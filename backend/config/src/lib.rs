//! `persona-config` — Persona runtime configuration management.
//!
//! Provides:
//! - Typed config schema (gateway, plugin manager, logging)
//! - YAML read/write with atomic replacement
//! - `${ENV_VAR}` substitution

pub mod env;
pub mod io;
pub mod schema;

pub use env::{resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_config, write_config};
pub use schema::{GatewayConfig, PersonaConfig, PluginsConfig};

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;

/// Load a config file and apply env substitution.
///
/// This is the main entry point for loading a config at runtime.
pub async fn load_and_prepare(path: &Path) -> Result<PersonaConfig> {
    let raw_config = io::load_config(path).await?;

    let value: Value = serde_json::to_value(&raw_config)
        .context("Failed to serialize config for processing")?;
    let value = resolve_env_vars(&value).context("Failed to resolve env vars in config")?;

    serde_json::from_value(value).context("Failed to deserialize prepared config")
}
