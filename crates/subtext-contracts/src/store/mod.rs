mod credentials;

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use serde_json::{Map, Value};

pub use credentials::{
    AuthStatus, Credentials, UserProfile, KEY_HAS_SEEN_ONBOARDING, KEY_HAS_SUBSCRIPTION,
    KEY_USER_DATA, KEY_USER_TOKEN, MIN_TOKEN_CHARS,
};

/// Opaque string key-value storage for credentials and flags.
pub trait SecureStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// JSON object on disk, one string value per key.
///
/// Every operation re-reads the file so separate handles on the same path
/// observe each other's writes. Writes go through a sibling temp file and a
/// rename, so a reader never sees a half-written object.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, apply: impl FnOnce(&mut Map<String, Value>) -> bool) -> anyhow::Result<()> {
        let mut payload = read_json_object(&self.path).unwrap_or_default();
        if !apply(&mut payload) {
            return Ok(());
        }
        write_json_object(&self.path, &payload)
    }
}

impl SecureStore for FileStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let payload = read_json_object(&self.path).unwrap_or_default();
        Ok(payload.get(key).and_then(Value::as_str).map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.update(|payload| {
            let next = Value::String(value.to_string());
            if payload.get(key) == Some(&next) {
                return false;
            }
            payload.insert(key.to_string(), next);
            true
        })
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.update(|payload| payload.remove(key).is_some())
    }
}

/// In-process store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

impl SecureStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(&Value::Object(payload.clone()))?;
    let mut file =
        create_private(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?;
    file.write_all(body.as_bytes())
        .and_then(|()| file.sync_all())
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

/// Owner-only file; the store holds the bearer token.
fn create_private(path: &Path) -> std::io::Result<File> {
    // A leftover temp file keeps its old mode, so start from scratch.
    match fs::remove_file(path) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => return Err(err),
        _ => {}
    }
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}
