use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};

use crate::Config;

/// Resolve a configured path, expanding ~ to the home directory.
pub fn resolve_path(path: &str) -> PathBuf {
    if path.starts_with("~/") || path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.strip_prefix("~/").unwrap_or(""));
        }
    }
    PathBuf::from(path)
}

/// Environment variable naming the config file. Takes precedence over the
/// search locations.
pub const CONFIG_ENV: &str = "HEARTH_CONFIG";

/// Find the config file: `$HEARTH_CONFIG`, then `./config.json`, then
/// `~/.hearth/config.json`. The last is returned even when it does not exist.
pub fn find_config_path() -> PathBuf {
    let explicit = std::env::var(CONFIG_ENV).ok().filter(|v| !v.trim().is_empty());
    locate_config(
        explicit.as_deref(),
        Path::new("config.json"),
        dirs::home_dir().as_deref(),
    )
}

fn locate_config(explicit: Option<&str>, local: &Path, home: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return resolve_path(path);
    }
    if local.exists() {
        return local.to_path_buf();
    }
    home.map(|h| h.join(".hearth").join("config.json"))
        .unwrap_or_else(|| local.to_path_buf())
}

/// Load and validate configuration. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config '{}'", path.display()))?;
    let config: Config = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse config '{}'", path.display()))?;
    validate(&config).with_context(|| format!("invalid config '{}'", path.display()))?;
    Ok(config)
}

/// Reject values the runtime cannot honor.
fn validate(config: &Config) -> Result<()> {
    let circuit = &config.tools.circuit;
    ensure!(
        circuit.failure_threshold >= 1,
        "tools.circuit.failureThreshold must be at least 1"
    );
    ensure!(
        circuit.reset_timeout_secs >= 1,
        "tools.circuit.resetTimeoutSecs must be at least 1"
    );
    ensure!(config.tools.timeout_secs >= 1, "tools.timeoutSecs must be at least 1");
    ensure!(
        config.embedding.timeout_secs >= 1,
        "embedding.timeoutSecs must be at least 1"
    );
    ensure!(
        config.embedding.dimensions != Some(0),
        "embedding.dimensions must be positive"
    );
    if let Some(threshold) = config.memory.score_threshold {
        ensure!(
            (-1.0..=1.0).contains(&threshold),
            "memory.scoreThreshold must be within [-1, 1], got {threshold}"
        );
    }
    Ok(())
}

/// Save configuration to a JSON file.
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    let contents = serde_json::to_string_pretty(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create config directory '{}'",
                parent.to_string_lossy()
            )
        })?;
    }
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config '{}'", path.display()))?;
    Ok(())
}
