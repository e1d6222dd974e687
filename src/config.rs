//! JSON config files and secret lookup shared by the config layers.

use crate::tts::TtsError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// Read a JSON config of type `T`. A missing file or one that does not
/// parse yields `T::default()`; the parse case is logged as a warning.
pub fn load_json_config<T: DeserializeOwned + Default>(path: &Path, label: &str) -> T {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => {
            info!(target: "config", label, path = %path.display(), "No config file, using defaults");
            return T::default();
        }
    };
    serde_json::from_str::<T>(&content)
        .map(|config| {
            info!(target: "config", label, path = %path.display(), "Loaded config");
            config
        })
        .unwrap_or_else(|e| {
            warn!(
                target: "config",
                label,
                path = %path.display(),
                error = %e,
                "Config did not parse, using defaults"
            );
            T::default()
        })
}

/// Write `config` as pretty JSON, creating parent directories.
pub fn save_json_config<T: Serialize>(path: &Path, config: &T, label: &str) -> Result<(), TtsError> {
    let io_err = |what: &str, e: std::io::Error| {
        TtsError::ConfigError(format!("{} {}: {}", what, path.display(), e))
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_err("cannot create directory for", e))?;
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| TtsError::ConfigError(format!("cannot serialize {}: {}", label, e)))?;
    std::fs::write(path, json).map_err(|e| io_err("cannot write", e))?;
    info!(target: "config", label, path = %path.display(), "Saved config");
    Ok(())
}

/// A non-empty `api_key`, else the non-empty value of the env var named by `api_key_env`.
pub fn resolve_api_key(api_key: Option<&str>, api_key_env: Option<&str>) -> Option<String> {
    api_key
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .or_else(|| {
            api_key_env
                .and_then(|var| std::env::var(var).ok())
                .filter(|k| !k.is_empty())
        })
}
