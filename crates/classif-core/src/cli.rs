//! Shared CLI helpers for workspace tools.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{DebugLevel, Error, Result};

/// Filter used when `RUST_LOG` is not set
pub fn default_log_filter(verbose: bool, debug_level: DebugLevel) -> &'static str {
    match debug_level.value() {
        3 => "trace",
        2 => "debug",
        _ if verbose => "debug",
        _ => "info",
    }
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over the verbosity flags when it is set.
pub fn setup_cli_logging(verbose: bool, debug_level: DebugLevel) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter(verbose, debug_level)));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logger: {e}")))?;

    Ok(())
}

pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config {}: {e}", path.display())))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config {}: {e}", path.display())))
}

/// Writes the effective configuration next to the run outputs
pub fn save_toml_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Serialization(format!("Failed to serialize config: {e}")))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Hyperparameters;
    use tempfile::TempDir;

    #[test]
    fn test_default_log_filter() {
        assert_eq!(default_log_filter(false, DebugLevel::new(0)), "info");
        assert_eq!(default_log_filter(true, DebugLevel::new(0)), "debug");
        assert_eq!(default_log_filter(false, DebugLevel::new(2)), "debug");
        assert_eq!(default_log_filter(false, DebugLevel::new(3)), "trace");
    }

    #[test]
    fn test_toml_config_round_trip() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("hps.toml");

        let mut hps = Hyperparameters::default();
        hps.acc_grad_steps = 8;
        hps.clip_norm = -1.0;
        save_toml_config(&hps, &path)?;

        let loaded: Hyperparameters = load_toml_config(&path)?;
        assert_eq!(loaded.acc_grad_steps, 8);
        assert_eq!(loaded.clip_norm, -1.0);
        Ok(())
    }

    #[test]
    fn test_missing_config_is_config_error() {
        let result: Result<Hyperparameters> = load_toml_config(Path::new("/nonexistent/run.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
