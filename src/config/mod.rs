use crate::bridge::BridgeOptions;
use crate::cache::{Ttl, DEFAULT_MAX_ENTRIES};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";
const APP_DIR: &str = "superbird-bridge";
const VAULT_FILE: &str = "vault.json";
pub const ENV_PREFIX: &str = "SUPERBIRD_";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub spotify: SpotifyConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    pub vault: VaultConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8890,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub api_base_url: String,
    pub image_base_url: String,
    pub market: String,
    pub token_key: String,
    pub request_timeout_secs: u64,
    /// Bypasses the vault when set (only ever from the environment).
    #[serde(skip)]
    pub access_token: Option<String>,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            api_base_url: crate::upstream::DEFAULT_API_BASE_URL.to_string(),
            image_base_url: crate::images::DEFAULT_IMAGE_BASE_URL.to_string(),
            market: "US".to_string(),
            token_key: "spotify_token".to_string(),
            request_timeout_secs: 15,
            access_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_interval_ms: u64,
    pub initial_state_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1500,
            initial_state_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub library_ttl_secs: u64,
    pub device_ttl_secs: u64,
    pub saved_album_limit: u32,
    pub image_dir: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            library_ttl_secs: 900,
            device_ttl_secs: 30,
            saved_album_limit: 25,
            image_dir: Some("cache".to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct VaultConfig {
    pub path: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = active_config_path();
        let mut config = match fs::read_to_string(&config_path) {
            Ok(raw) => toml::from_str::<Config>(&raw)
                .map_err(|err| format!("{}: {err}", config_path.display()))?,
            Err(_) => Self::default(),
        };

        config.apply_env_overrides(|name| env::var(format!("{ENV_PREFIX}{name}")).ok());
        config.validate()?;
        Ok(config)
    }

    /// `lookup` receives variable names without the `SUPERBIRD_` prefix.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("SERVER_HOST") {
            self.server.host = val;
        }
        if let Some(port) = lookup("SERVER_PORT").and_then(|val| val.parse().ok()) {
            self.server.port = port;
        }

        if let Some(val) = lookup("API_BASE_URL") {
            self.spotify.api_base_url = val;
        }
        if let Some(val) = lookup("MARKET") {
            self.spotify.market = val;
        }
        if let Some(val) = lookup("ACCESS_TOKEN").filter(|val| !val.trim().is_empty()) {
            self.spotify.access_token = Some(val.trim().to_string());
        }

        if let Some(interval) = lookup("POLL_INTERVAL_MS").and_then(|val| val.parse().ok()) {
            self.sync.poll_interval_ms = interval;
        }

        if let Some(val) = lookup("IMAGE_DIR") {
            self.cache.image_dir = Some(val).filter(|dir| !dir.is_empty());
        }

        if let Some(val) = lookup("VAULT_PATH") {
            self.vault.path = Some(val);
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.server.port == 0 {
            return Err("server.port must be non-zero".into());
        }
        if self.spotify.api_base_url.trim().is_empty() {
            return Err("spotify.api_base_url must be set".into());
        }
        if self.spotify.image_base_url.trim().is_empty() {
            return Err("spotify.image_base_url must be set".into());
        }
        if self.spotify.market.trim().is_empty() {
            return Err("spotify.market must be set".into());
        }
        if self.spotify.token_key.trim().is_empty() {
            return Err("spotify.token_key must be set".into());
        }
        if self.sync.poll_interval_ms == 0 {
            return Err("sync.poll_interval_ms must be non-zero".into());
        }
        if self.cache.max_entries == 0 {
            return Err("cache.max_entries must be non-zero".into());
        }
        if !(1..=50).contains(&self.cache.saved_album_limit) {
            return Err("cache.saved_album_limit must be between 1 and 50".into());
        }
        Ok(())
    }

    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            market: self.spotify.market.clone(),
            saved_album_limit: self.cache.saved_album_limit,
            library_ttl: Ttl::secs(self.cache.library_ttl_secs),
            device_ttl: Ttl::secs(self.cache.device_ttl_secs),
            cache_capacity: self.cache.max_entries,
            poll_interval: Duration::from_millis(self.sync.poll_interval_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.spotify.request_timeout_secs)
    }

    pub fn initial_state_delay(&self) -> Duration {
        Duration::from_millis(self.sync.initial_state_delay_ms)
    }

    pub fn vault_path(&self) -> PathBuf {
        match &self.vault.path {
            Some(path) => PathBuf::from(path),
            None => managed_config_path().with_file_name(VAULT_FILE),
        }
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err(format!("{} already exists", path.as_ref().display()).into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::default())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        managed_config_path()
    }
}

fn managed_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{ENV_PREFIX}CONFIG_PATH")) {
        return PathBuf::from(path);
    }
    let base = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| env::var("HOME").map(|home| Path::new(&home).join(".config")))
        .unwrap_or_else(|_| PathBuf::from("."));
    base.join(APP_DIR).join(CONFIG_FILE)
}

fn active_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        local
    } else {
        managed_config_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn default_config_serializes() {
        let cfg = Config::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.server.port, 8890);
        assert_eq!(parsed.sync.poll_interval_ms, 1500);
    }

    #[test]
    fn partial_file_keeps_section_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [spotify]
            market = "DE"

            [cache]
            library_ttl_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(cfg.spotify.market, "DE");
        assert_eq!(cfg.spotify.token_key, "spotify_token");
        assert_eq!(cfg.cache.library_ttl_secs, 60);
        assert_eq!(cfg.cache.max_entries, DEFAULT_MAX_ENTRIES);
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(env_of(&[
            ("SERVER_PORT", "9000"),
            ("POLL_INTERVAL_MS", "500"),
            ("ACCESS_TOKEN", " tok "),
            ("MARKET", "SE"),
            ("IMAGE_DIR", ""),
        ]));
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.sync.poll_interval_ms, 500);
        assert_eq!(cfg.spotify.access_token.as_deref(), Some("tok"));
        assert_eq!(cfg.spotify.market, "SE");
        assert!(cfg.cache.image_dir.is_none());
    }

    #[test]
    fn unparsable_env_values_are_ignored() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(env_of(&[("SERVER_PORT", "http"), ("ACCESS_TOKEN", "  ")]));
        assert_eq!(cfg.server.port, 8890);
        assert!(cfg.spotify.access_token.is_none());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.sync.poll_interval_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.cache.saved_album_limit = 51;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.spotify.market = " ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn access_token_is_never_written_to_disk() {
        let mut cfg = Config::default();
        cfg.spotify.access_token = Some("secret".to_string());
        let toml = toml::to_string_pretty(&cfg).unwrap();
        assert!(!toml.contains("secret"));
    }

    #[test]
    fn write_default_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        Config::write_default(&path).unwrap();
        assert!(Config::write_default(&path).is_err());
    }

    #[test]
    fn bridge_options_follow_config() {
        let mut cfg = Config::default();
        cfg.cache.device_ttl_secs = 5;
        cfg.sync.poll_interval_ms = 750;
        let options = cfg.bridge_options();
        assert_eq!(options.device_ttl, Ttl::secs(5));
        assert_eq!(options.poll_interval, Duration::from_millis(750));
        assert_eq!(options.saved_album_limit, 25);
    }
}
