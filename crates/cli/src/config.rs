//! CLI configuration utilities

use anyhow::{Context, Result};
use latch_core::SessionConfig;
use std::path::{Path, PathBuf};

/// Resolve the data directory: explicit flag, then `LATCH_STATE_DIR`, then
/// the platform data dir
pub fn data_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        if let Ok(state_dir) = std::env::var("LATCH_STATE_DIR") {
            PathBuf::from(state_dir)
        } else {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("latch")
        }
    })
}

/// Where the persistent cookie jar lives
pub fn cookie_jar_path(data_dir: &Path) -> PathBuf {
    data_dir.join("cookies.json")
}

/// Default location of the config file inside the data directory
pub fn default_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("latch.json")
}

/// Load the session configuration.
///
/// An explicit `--config` must exist; otherwise `<data_dir>/latch.json` is
/// used when present. `--base-url` wins over both.
pub fn load_session_config(
    path: Option<&Path>,
    data_dir: &Path,
    base_url: Option<String>,
) -> Result<SessionConfig> {
    let fallback = default_config_path(data_dir);
    let path = path.or_else(|| fallback.exists().then_some(fallback.as_path()));

    let mut config = SessionConfig::load(path)
        .with_context(|| format!("failed to load configuration from {path:?}"))?;

    if let Some(base_url) = base_url {
        config.base_url = base_url;
        config.validate()?;
    }

    Ok(config)
}

/// Save session configuration to a JSON file
pub fn save_session_config<P: AsRef<Path>>(config: &SessionConfig, path: P) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Generate a default configuration file
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    save_session_config(&SessionConfig::default(), path)
}
