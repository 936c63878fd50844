use crate::error::Result;
use crate::geo::SiteTable;
use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

// Include the coordinate table at compile time
const SITES_JSON: &str = include_str!("../assets/sites.json");

// Global cache for the parsed table
static SITES_CACHE: OnceLock<SiteTable> = OnceLock::new();

/// 同时测试的服务器上限
pub const MAX_SERVERS: usize = 5;

/// 运行参数, 对应 config.toml
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// IP geolocation endpoint
    pub geo_url: String,
    /// iperf3 server list feed
    pub feed_url: String,
    pub http_timeout_secs: u64,
    pub max_servers: usize,
    /// How many top-scored servers to consider when too few meet the capacity threshold
    pub fallback_pool: usize,
    pub iperf3_binary: String,
    pub test_duration_secs: u64,
    pub retry_duration_secs: u64,
    /// Outer timeout = test duration * timeout_factor
    pub timeout_factor: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            geo_url: "https://ipinfo.io/json".to_string(),
            feed_url: "https://export.iperf3serverlist.net/json.php?action=download".to_string(),
            http_timeout_secs: 10,
            max_servers: 5,
            fallback_pool: 10,
            iperf3_binary: "iperf3".to_string(),
            test_duration_secs: 5,
            retry_duration_secs: 3,
            timeout_factor: 3,
        }
    }
}

impl Settings {
    /// Load settings
    /// Strategy:
    /// 1. An explicit path must exist and parse
    /// 2. Otherwise try ~/.config/netblast/config.toml
    /// 3. Fallback to built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        match user_config_file("config.toml") {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "loading user settings");
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings.sanitized())
    }

    /// Bring values into their working ranges.
    ///
    /// Applied after loading and again after command-line overrides.
    pub fn sanitized(mut self) -> Self {
        // 防止 0 值导致空跑或零超时
        self.max_servers = self.max_servers.clamp(1, MAX_SERVERS);
        self.fallback_pool = self.fallback_pool.max(self.max_servers);
        self.test_duration_secs = self.test_duration_secs.max(1);
        // 降级重试不能比主测试更长
        self.retry_duration_secs = self.retry_duration_secs.clamp(1, self.test_duration_secs);
        self.timeout_factor = self.timeout_factor.max(1);
        self
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn user_config_file(name: &str) -> Option<PathBuf> {
    ProjectDirs::from("", "", "netblast").map(|dirs| dirs.config_dir().join(name))
}

/// Country centroids and known site coordinates, parsed once per process.
///
/// A readable `sites.json` in the netblast config directory replaces the
/// embedded table entirely; a broken one is logged and ignored.
pub fn site_table() -> &'static SiteTable {
    SITES_CACHE.get_or_init(|| {
        if let Some(path) = user_config_file("sites.json") {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(parsed) = serde_json::from_str(&content) {
                        tracing::info!(path = %path.display(), "loaded site table from local config");
                        return parsed;
                    }
                }
                tracing::warn!(path = %path.display(), "ignoring unreadable site table");
            }
        }

        builtin_site_table()
    })
}

fn builtin_site_table() -> SiteTable {
    // 内置表随二进制发布, test_builtin_table_parses 保证其格式
    serde_json::from_str(SITES_JSON).expect("embedded assets/sites.json must be a valid site table")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builtin_table_parses() {
        let table = builtin_site_table();
        assert!(table.contains_key("US"));
        assert!(table["US"].sites.contains_key("New York"));
    }

    #[test]
    fn test_partial_settings_keep_defaults() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "max_servers = 3\niperf3_binary = \"/opt/iperf3\"")?;

        let settings = Settings::load(Some(file.path()))?;
        assert_eq!(settings.max_servers, 3);
        assert_eq!(settings.iperf3_binary, "/opt/iperf3");
        assert_eq!(settings.test_duration_secs, 5);
        assert_eq!(settings.feed_url, Settings::default().feed_url);
        Ok(())
    }

    #[test]
    fn test_zero_values_are_sanitized() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "max_servers = 0\ntimeout_factor = 0\nfallback_pool = 2")?;

        let settings = Settings::load(Some(file.path()))?;
        assert_eq!(settings.max_servers, 1);
        assert_eq!(settings.timeout_factor, 1);
        assert_eq!(settings.fallback_pool, 2);
        Ok(())
    }

    #[test]
    fn test_max_servers_is_capped() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "max_servers = 12\nfallback_pool = 3")?;

        let settings = Settings::load(Some(file.path()))?;
        assert_eq!(settings.max_servers, MAX_SERVERS);
        assert_eq!(settings.fallback_pool, MAX_SERVERS);
        Ok(())
    }

    #[test]
    fn test_retry_never_outlasts_primary() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "test_duration_secs = 2\nretry_duration_secs = 3")?;

        let settings = Settings::load(Some(file.path()))?;
        assert_eq!(settings.test_duration_secs, 2);
        assert_eq!(settings.retry_duration_secs, 2);

        // a shortened run after loading gets the same treatment
        let shortened = Settings {
            test_duration_secs: 1,
            ..Settings::default()
        }
        .sanitized();
        assert_eq!(shortened.retry_duration_secs, 1);
        assert_eq!(Settings::default().sanitized(), Settings::default());
        Ok(())
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Settings::load(Some(missing.as_path())).is_err());
    }

    #[test]
    fn test_invalid_toml_is_an_error() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "max_servers = \"five\"")?;
        assert!(Settings::load(Some(file.path())).is_err());
        Ok(())
    }
}
