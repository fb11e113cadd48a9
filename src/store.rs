//! Persisted operator selections (last pack, target and firmware)
//!
//! The application shell owns a [`ConfigStore`] and passes it to whatever
//! needs to remember a selection. Nothing in the RTT core depends on it.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;

pub const PACK_PATH: &str = "pack_path";
pub const TARGET_NAME: &str = "target_name";
pub const BIN_PATH: &str = "bin_path";

/// Key-value store for remembered selections
pub trait ConfigStore: Send + Sync {
    /// Stored value, or `None` when absent or unreadable
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    selection: BTreeMap<String, toml::Value>,
}

/// TOML file backed store; rewrites the file on every `set`
#[derive(Debug)]
pub struct TomlConfigStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, toml::Value>>,
}

impl TomlConfigStore {
    /// Open the store at `path`.
    ///
    /// A missing or malformed file behaves as an empty store.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match Self::read(&path) {
            Ok(file) => file.selection,
            Err(ConfigError::Read(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                warn!("Ignoring unreadable state file {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };

        Self {
            path,
            values: Mutex::new(values),
        }
    }

    fn read(path: &Path) -> Result<StoreFile, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for TomlConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match values.get(key)? {
            toml::Value::String(s) => Some(s.clone()),
            other => {
                debug!("State key '{}' is not a string ({}), treating as absent", key, other.type_str());
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut values = self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        values.insert(key.to_string(), toml::Value::String(value.to_string()));

        let file = StoreFile { selection: values.clone() };
        let content = toml::to_string_pretty(&file)?;
        std::fs::write(&self.path, content)?;

        debug!("Saved {} to {}", key, self.path.display());
        Ok(())
    }
}

/// In-memory store for tests and one-shot runs
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Use `given` when present (remembering it), otherwise the stored value
pub fn remembered(store: &dyn ConfigStore, key: &str, given: Option<&str>) -> Option<String> {
    match given {
        Some(value) => {
            if let Err(e) = store.set(key, value) {
                warn!("Could not remember {}: {}", key, e);
            }
            Some(value.to_string())
        }
        None => store.get(key).filter(|v| !v.is_empty()),
    }
}

/// Path flavour of [`remembered`].
///
/// A given path is always used as is. It is only stored when it is valid
/// UTF-8; the stored value never replaces a path the operator named.
pub fn remembered_path(store: &dyn ConfigStore, key: &str, given: Option<&Path>) -> Option<PathBuf> {
    match given {
        Some(path) => {
            match path.to_str() {
                Some(value) => {
                    if let Err(e) = store.set(key, value) {
                        warn!("Could not remember {}: {}", key, e);
                    }
                }
                None => warn!("Not remembering {}: {} is not valid UTF-8", key, path.display()),
            }
            Some(path.to_path_buf())
        }
        None => remembered(store, key, None).map(PathBuf::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = TomlConfigStore::open(dir.path().join("state.toml"));
        assert_eq!(store.get(PACK_PATH), None);
    }

    #[test]
    fn test_set_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");

        let store = TomlConfigStore::open(&path);
        store.set(PACK_PATH, "N32G45x.yaml").unwrap();
        store.set(TARGET_NAME, "n32g455rcl7").unwrap();

        let reopened = TomlConfigStore::open(&path);
        assert_eq!(reopened.get(PACK_PATH).as_deref(), Some("N32G45x.yaml"));
        assert_eq!(reopened.get(TARGET_NAME).as_deref(), Some("n32g455rcl7"));
        assert_eq!(reopened.get(BIN_PATH), None);
    }

    #[test]
    fn test_malformed_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");
        std::fs::write(&path, "[selection\npack_path = ").unwrap();

        let store = TomlConfigStore::open(&path);
        assert_eq!(store.get(PACK_PATH), None);

        // still writable afterwards
        store.set(PACK_PATH, "a.yaml").unwrap();
        assert_eq!(TomlConfigStore::open(&path).get(PACK_PATH).as_deref(), Some("a.yaml"));
    }

    #[test]
    fn test_non_string_value_is_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");
        std::fs::write(&path, "[selection]\ntarget_name = 42\nbin_path = \"fw.bin\"\n").unwrap();

        let store = TomlConfigStore::open(&path);
        assert_eq!(store.get(TARGET_NAME), None);
        assert_eq!(store.get(BIN_PATH).as_deref(), Some("fw.bin"));
    }

    #[test]
    fn test_remembered_prefers_given_value() {
        let store = MemoryConfigStore::new();
        assert_eq!(remembered(&store, TARGET_NAME, None), None);

        assert_eq!(remembered(&store, TARGET_NAME, Some("stm32f103c8")).as_deref(), Some("stm32f103c8"));
        assert_eq!(remembered(&store, TARGET_NAME, None).as_deref(), Some("stm32f103c8"));
    }

    #[test]
    fn test_remembered_path_round_trip() {
        let store = MemoryConfigStore::new();
        assert_eq!(remembered_path(&store, BIN_PATH, None), None);

        let given = Path::new("build/Target.bin");
        assert_eq!(remembered_path(&store, BIN_PATH, Some(given)).as_deref(), Some(given));
        assert_eq!(remembered_path(&store, BIN_PATH, None).as_deref(), Some(given));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_is_used_but_not_stored() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let store = MemoryConfigStore::new();
        store.set(PACK_PATH, "OLD.yaml").unwrap();

        let given = Path::new(OsStr::from_bytes(b"/tmp/N\xff.yaml"));
        let resolved = remembered_path(&store, PACK_PATH, Some(given));

        assert_eq!(resolved.as_deref(), Some(given));
        assert_eq!(store.get(PACK_PATH).as_deref(), Some("OLD.yaml"));
    }
}
