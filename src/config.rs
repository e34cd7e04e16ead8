use crate::core::db::connection::ConnectionTarget;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    pub scan: Option<ScanConfig>,
    #[serde(default, rename = "profile")]
    pub profiles: Vec<ProfileConfig>,
}

/// Scan-related configuration.
#[derive(Debug, Deserialize)]
pub struct ScanConfig {
    pub timeout_seconds: Option<u64>,
    pub batch_size: Option<usize>,
}

/// A named connection profile, expanding to a connection target without
/// retyping server and catalog.
#[derive(Debug, Deserialize)]
pub struct ProfileConfig {
    pub name: String,
    pub server: String,
    pub database: Option<String>,
}

impl Config {
    /// Looks up a connection profile by name.
    pub fn profile(&self, name: &str) -> Option<&ProfileConfig> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Command timeout from config, if set.
    pub fn timeout_seconds(&self) -> Option<u64> {
        self.scan.as_ref().and_then(|s| s.timeout_seconds)
    }

    /// Scan batch size from config, if set.
    pub fn batch_size(&self) -> Option<usize> {
        self.scan.as_ref().and_then(|s| s.batch_size)
    }
}

impl ProfileConfig {
    /// The connection target this profile expands to.
    pub fn target(&self) -> ConnectionTarget {
        ConnectionTarget::new(
            self.server.clone(),
            self.database.clone().unwrap_or_default(),
        )
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// let config = daxql::config::load_config("config.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, String> {
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    toml::from_str(&content).map_err(|e| e.to_string())
}

/// Default location of the configuration file
/// (`<config_dir>/daxql/config.toml`), if a config directory exists.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("daxql").join("config.toml"))
}

/// Global configuration, loaded lazily from the default path.
///
/// A missing or unreadable file yields the defaults; callers that need
/// strict parsing should use [`load_config`] directly.
pub fn global() -> &'static Config {
    static CONFIG: OnceCell<Config> = OnceCell::new();
    CONFIG.get_or_init(|| {
        default_config_path()
            .and_then(|path| load_config(path).ok())
            .unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE_CONFIG: &str = r#"
[scan]
timeout_seconds = 120
batch_size = 512

[[profile]]
name = "local"
server = "localhost:2383"
database = "AdventureWorks"

[[profile]]
name = "bare"
server = "olap.example"
"#;

    #[test]
    fn test_load_config_from_str() {
        let config: Config = toml::from_str(SAMPLE_CONFIG).expect("Failed to parse sample config");
        assert_eq!(config.timeout_seconds().unwrap(), 120);
        assert_eq!(config.batch_size().unwrap(), 512);

        let local = config.profile("local").expect("local profile not found");
        assert_eq!(local.server, "localhost:2383");
        assert_eq!(
            local.target().to_connection_string(),
            "Server=localhost:2383;Database=AdventureWorks"
        );

        let bare = config.profile("bare").expect("bare profile not found");
        assert_eq!(bare.target().database, "");
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_CONFIG.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.profiles.len(), 2);
    }

    #[test]
    fn test_missing_file_is_an_error_for_strict_loading() {
        assert!(load_config("/nonexistent/daxql/config.toml").is_err());
    }

    #[test]
    fn test_unknown_profile_is_none() {
        let config: Config = toml::from_str(SAMPLE_CONFIG).unwrap();
        assert!(config.profile("prod").is_none());
    }
}
