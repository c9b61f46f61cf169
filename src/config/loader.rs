/**
 * Configuration Loader
 *
 * DESIGN DECISION: environment overrides win over file values, which win
 * over built-in defaults
 * WHY: matches the precedence direction of the teacher's `ConfigLoader`
 * (`config/loader.rs`) — narrower scope always wins — collapsed to the two
 * tiers the coherence bus actually has: a `scb.toml` file and three
 * environment variables (`DATA_DIR`, `BUS_URL`, `LOG_LEVEL`).
 *
 * PATTERN: Pattern-CONFIG-001 (Hierarchical Configuration), simplified.
 */

use std::env;
use std::path::{Path, PathBuf};

use super::options::ScbConfig;
use crate::error::{Error, Result};

/// Fully resolved runtime configuration: recognized options plus the three
/// environment-driven paths that are never expressed in `scb.toml`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub options: ScbConfig,
    pub data_dir: PathBuf,
    pub bus_url: String,
    pub log_level: String,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            options: ScbConfig::default(),
            data_dir: PathBuf::from("./data"),
            bus_url: "memory://local".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Loads `scb.toml` (if present) and overlays `DATA_DIR`/`BUS_URL`/`LOG_LEVEL`.
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Loader that only reads environment variables; no file is consulted.
    pub fn from_env() -> Self {
        Self { config_path: None }
    }

    /// Loader that reads `path` in addition to the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        Self { config_path: Some(path.as_ref().to_path_buf()) }
    }

    /// Resolve the final configuration: defaults, then file, then environment.
    pub fn load(&self) -> Result<ResolvedConfig> {
        let mut resolved = ResolvedConfig::default();

        if let Some(path) = &self.config_path {
            if path.exists() {
                let text = std::fs::read_to_string(path)?;
                resolved.options = toml::from_str(&text)?;
            }
        }

        if let Ok(dir) = env::var("DATA_DIR") {
            resolved.data_dir = PathBuf::from(dir);
        }
        if let Ok(url) = env::var("BUS_URL") {
            resolved.bus_url = url;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            resolved.log_level = level;
        }

        validate(&resolved.options)?;
        Ok(resolved)
    }
}

/// Sanity-check recognized options so a malformed `scb.toml` fails fast at
/// startup rather than surfacing as a confusing runtime invariant violation.
fn validate(options: &ScbConfig) -> Result<()> {
    if !(0.0..=1.0).contains(&options.coherence.min_score) {
        return Err(Error::Configuration(format!(
            "coherence.min_score must be in [0,1], got {}",
            options.coherence.min_score
        )));
    }
    for floor in [
        options.coherence.confidence_floor_high,
        options.coherence.confidence_floor_medium,
        options.coherence.confidence_floor_low,
    ] {
        if !(0.0..=1.0).contains(&floor) {
            return Err(Error::Configuration(format!(
                "confidence floor must be in [0,1], got {floor}"
            )));
        }
    }
    if options.store.snapshot_every == 0 {
        return Err(Error::Configuration("store.snapshot_every must be > 0".to_string()));
    }
    if options.circuit_breaker.failure_threshold == 0 {
        return Err(Error::Configuration(
            "circuit_breaker.failure_threshold must be > 0".to_string(),
        ));
    }
    Ok(())
}
