use crate::core::family::Family;
use crate::utils::get_config_dir;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment override for the IPv4 engine binary
pub const IPTABLES_COMMAND_ENV: &str = "CHAINROT_IPTABLES_COMMAND";
/// Environment override for the IPv6 engine binary
pub const IP6TABLES_COMMAND_ENV: &str = "CHAINROT_IP6TABLES_COMMAND";

/// Effective chainrot configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Table holding the managed chains
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_iptables_path")]
    pub iptables_path: String,
    #[serde(default = "default_ip6tables_path")]
    pub ip6tables_path: String,
    /// Pass `-w` so iptables waits for the xtables lock instead of failing
    #[serde(default = "default_true")]
    pub wait_for_lock: bool,
    /// Families rotated when a plan or command does not name any
    #[serde(default = "Family::all")]
    pub families: Vec<Family>,
    /// Write rotation events to the audit log
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            iptables_path: default_iptables_path(),
            ip6tables_path: default_ip6tables_path(),
            wait_for_lock: true,
            families: Family::all(),
            audit_enabled: true,
        }
    }
}

impl AppConfig {
    /// Engine binary for `family`; the environment override wins over the file.
    pub fn engine_program(&self, family: Family) -> String {
        let (env, configured) = match family {
            Family::V4 => (IPTABLES_COMMAND_ENV, &self.iptables_path),
            Family::V6 => (IP6TABLES_COMMAND_ENV, &self.ip6tables_path),
        };
        std::env::var(env)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| configured.clone())
    }
}

fn default_table() -> String {
    "filter".to_string()
}

fn default_iptables_path() -> String {
    option_env!("CHAINROT_SYSTEM_IPTABLES_PATH")
        .unwrap_or("iptables")
        .to_string()
}

fn default_ip6tables_path() -> String {
    option_env!("CHAINROT_SYSTEM_IP6TABLES_PATH")
        .unwrap_or("ip6tables")
        .to_string()
}

fn default_true() -> bool {
    true
}

/// Path of the config file
pub fn config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

/// Saves the config to `path` using an atomic write pattern.
/// 1. Writes to a temporary file in the same directory.
/// 2. Sets restrictive permissions (0o600).
/// 3. Atomically renames to the target path.
pub fn save_config_to(config: &AppConfig, path: &std::path::Path) -> std::io::Result<()> {
    use std::io::Write;

    let json = serde_json::to_string_pretty(config)?;
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));

    // tempfile creates the file with 0o600 on Unix
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(json.as_bytes())?;
    file.as_file().sync_all()?;

    file.persist(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            )
        } else {
            e.error
        }
    })?;
    Ok(())
}

/// Saves the config to the user's config directory.
pub fn save_config(config: &AppConfig) -> std::io::Result<PathBuf> {
    crate::utils::ensure_dirs()?;
    let path = config_path().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "Config directory not found")
    })?;
    save_config_to(config, &path)?;
    Ok(path)
}

/// Loads the config from `path`, or returns the default if missing or invalid.
pub async fn load_config_from(path: &std::path::Path) -> AppConfig {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => match serde_json::from_str::<AppConfig>(&json) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring invalid config {}: {e}", path.display());
                AppConfig::default()
            }
        },
        Err(_) => AppConfig::default(),
    }
}

/// Loads the config from the user's config directory.
pub async fn load_config() -> AppConfig {
    match config_path() {
        Some(path) => load_config_from(&path).await,
        None => AppConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.table, "filter");
        assert!(config.wait_for_lock);
        assert!(config.audit_enabled);
        assert_eq!(config.families, vec![Family::V4, Family::V6]);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"table":"raw","families":["v6"]}"#).unwrap();
        assert_eq!(config.table, "raw");
        assert_eq!(config.families, vec![Family::V6]);
        assert!(config.wait_for_lock);
        assert!(config.iptables_path.ends_with("iptables"));
    }

    #[test]
    fn test_engine_program_env_override() {
        let _guard = crate::core::test_helpers::ENV_VAR_MUTEX.lock().unwrap();
        let config = AppConfig {
            iptables_path: "/usr/sbin/iptables-legacy".to_string(),
            ..AppConfig::default()
        };

        unsafe {
            std::env::set_var(IPTABLES_COMMAND_ENV, "/opt/mock/iptables");
            std::env::remove_var(IP6TABLES_COMMAND_ENV);
        }
        assert_eq!(config.engine_program(Family::V4), "/opt/mock/iptables");
        assert_eq!(config.engine_program(Family::V6), config.ip6tables_path);

        unsafe {
            std::env::set_var(IPTABLES_COMMAND_ENV, "");
        }
        assert_eq!(
            config.engine_program(Family::V4),
            "/usr/sbin/iptables-legacy"
        );

        unsafe {
            std::env::remove_var(IPTABLES_COMMAND_ENV);
        }
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = AppConfig {
            table: "mangle".to_string(),
            wait_for_lock: false,
            ..AppConfig::default()
        };
        save_config_to(&config, &path).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let loaded = load_config_from(&path).await;
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_invalid_config_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(load_config_from(&path).await, AppConfig::default());
        assert_eq!(
            load_config_from(&dir.path().join("missing.json")).await,
            AppConfig::default()
        );
    }
}
