use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};

use crate::error::{ClientError, ClientResult};

/// Opaque string storage the client persists its state into.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> ClientResult<()>;
    fn remove(&self, key: &str) -> ClientResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        lock_poisoned(self.entries.lock())?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        lock_poisoned(self.entries.lock())?.remove(key);
        Ok(())
    }
}

/// One JSON object on disk. Writes merge only the touched keys into whatever is on
/// disk at flush time, so two processes sharing the file do not drop each other's keys.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_key(&self, key: &str, value: Option<&str>) -> ClientResult<()> {
        let _guard = lock_poisoned(self.inner.lock())?;
        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        let next = value.map(|value| Value::String(value.to_string()));
        if on_disk.get(key) == next.as_ref() {
            return Ok(());
        }
        match next {
            Some(value) => {
                on_disk.insert(key.to_string(), value);
            }
            None => {
                on_disk.remove(key);
            }
        }
        write_json_object(&self.path, &on_disk)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        read_json_object(&self.path)?
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.write_key(key, Some(value))
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.write_key(key, None)
    }
}

fn lock_poisoned<T>(result: Result<T, std::sync::PoisonError<T>>) -> ClientResult<T> {
    result.map_err(|_| {
        ClientError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "store lock poisoned",
        ))
    })
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> ClientResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(
        &tmp,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    std::fs::rename(tmp, path)?;
    Ok(())
}
