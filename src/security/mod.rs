use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// JSON file of named, base64-encoded secrets.
#[derive(Debug)]
pub struct Vault {
    path: PathBuf,
    store: VaultStore,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VaultStore {
    entries: HashMap<String, String>,
}

impl Vault {
    pub fn open(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let store = if path.exists() {
            let raw = fs::read_to_string(path)?;
            serde_json::from_str(&raw)
                .map_err(|err| format!("vault {} is corrupt: {err}", path.display()))?
        } else {
            VaultStore::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            store,
        })
    }

    pub fn store(&mut self, key: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
        let encoded = general_purpose::STANDARD.encode(value.as_bytes());
        self.store.entries.insert(key.to_string(), encoded);
        self.persist()
    }

    pub fn retrieve(&self, key: &str) -> Result<Option<String>, Box<dyn std::error::Error>> {
        let Some(encoded) = self.store.entries.get(key) else {
            return Ok(None);
        };
        let decoded = general_purpose::STANDARD.decode(encoded)?;
        Ok(Some(String::from_utf8(decoded)?))
    }

    pub fn list_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.store.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn store_token(
        &mut self,
        key: &str,
        token: &StoredToken,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.store(key, &serde_json::to_string(token)?)
    }

    pub fn token(&self, key: &str) -> Result<Option<StoredToken>, Box<dyn std::error::Error>> {
        match self.retrieve(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn persist(&self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_string_pretty(&self.store)?;
        fs::write(&self.path, data)?;
        restrict_permissions(&self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// An access token together with the moment it was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub expires_in: u64,
    pub acquired_unix: u64,
}

impl StoredToken {
    pub fn new(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in,
            acquired_unix: unix_now(),
        }
    }

    pub fn expires_at(&self) -> u64 {
        self.acquired_unix.saturating_add(self.expires_in)
    }

    pub fn is_valid_at(&self, now_unix: u64) -> bool {
        now_unix <= self.expires_at()
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(unix_now())
    }

    /// Seconds left; zero once expired.
    pub fn remaining_secs(&self) -> u64 {
        self.expires_at().saturating_sub(unix_now())
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");

        let mut vault = Vault::open(&path).unwrap();
        vault.store("b_key", "two").unwrap();
        vault.store("a_key", "one").unwrap();

        let reopened = Vault::open(&path).unwrap();
        assert_eq!(reopened.retrieve("a_key").unwrap().as_deref(), Some("one"));
        assert_eq!(reopened.retrieve("missing").unwrap(), None);
        assert_eq!(reopened.list_keys(), vec!["a_key", "b_key"]);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("\"one\""));
    }

    #[test]
    fn corrupt_vault_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(Vault::open(&path).is_err());
    }

    #[test]
    fn token_round_trips_through_vault() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vault.json");
        let token = StoredToken {
            access_token: "BQC-token".to_string(),
            expires_in: 3600,
            acquired_unix: 1_700_000_000,
        };

        let mut vault = Vault::open(&path).unwrap();
        vault.store_token("spotify_token", &token).unwrap();

        let loaded = Vault::open(&path).unwrap().token("spotify_token").unwrap();
        assert_eq!(loaded, Some(token));
    }

    #[test]
    fn token_validity_includes_the_last_second() {
        let token = StoredToken {
            access_token: "t".to_string(),
            expires_in: 60,
            acquired_unix: 1_000,
        };
        assert!(token.is_valid_at(1_000));
        assert!(token.is_valid_at(1_060));
        assert!(!token.is_valid_at(1_061));
    }

    #[test]
    fn fresh_token_is_valid() {
        let token = StoredToken::new("t", DEFAULT_TOKEN_LIFETIME_SECS);
        assert!(token.is_valid());
        assert!(token.remaining_secs() > 3500);
    }
}
