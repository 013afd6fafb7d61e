//! Global configuration loader for turnflow.
//!
//! Reads `config.toml` from the data directory (`~/.turnflow/` in production)
//! and deserializes it into [`GlobalConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use turnflow_types::config::GlobalConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TURNFLOW_DATA_DIR";

/// Database file name inside the data directory.
pub const DATABASE_FILE: &str = "turnflow.db";

/// Resolve the data directory: `TURNFLOW_DATA_DIR`, else `~/.turnflow`.
pub fn data_dir() -> PathBuf {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".turnflow"),
    }
}

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`GlobalConfig::default()`].
/// - Unreadable or unparseable file: logs a warning, returns the default.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            GlobalConfig::default()
        }
    }
}

/// SQLite URL for the conversation store.
///
/// `[store] database_url` wins; otherwise `{data_dir}/turnflow.db`.
pub fn resolve_database_url(config: &GlobalConfig, data_dir: &Path) -> String {
    match config.store.database_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => format!("sqlite://{}?mode=rwc", data_dir.join(DATABASE_FILE).display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_global_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_global_config(tmp.path()).await;
        assert_eq!(config, GlobalConfig::default());
    }

    #[tokio::test]
    async fn load_global_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
[pipeline]
turn_timeout_secs = 30
default_agents = ["refiner", "critic", "synthesis"]

[checkpoint]
enabled = true
max_per_thread = 5

[store]
database_url = "sqlite:///var/lib/turnflow/state.db"
"#,
        )
        .await
        .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.pipeline.turn_timeout_secs, 30);
        assert_eq!(config.pipeline.default_agents.len(), 3);
        assert!(config.checkpoint.enabled);
        assert_eq!(config.checkpoint.max_per_thread, 5);
        assert_eq!(
            config.store.database_url.as_deref(),
            Some("sqlite:///var/lib/turnflow/state.db")
        );
    }

    #[tokio::test]
    async fn load_global_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config, GlobalConfig::default());
    }

    #[test]
    fn resolve_database_url_prefers_config() {
        let mut config = GlobalConfig::default();
        let dir = Path::new("/data");
        assert_eq!(resolve_database_url(&config, dir), "sqlite:///data/turnflow.db?mode=rwc");

        config.store.database_url = Some("sqlite://other.db".to_string());
        assert_eq!(resolve_database_url(&config, dir), "sqlite://other.db");

        config.store.database_url = Some("  ".to_string());
        assert!(resolve_database_url(&config, dir).ends_with("turnflow.db?mode=rwc"));
    }
}
