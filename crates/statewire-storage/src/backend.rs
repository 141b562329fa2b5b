#![forbid(unsafe_code)]

//! Durable key/value backends for the persistent scope.
//!
//! A [`DurableBackend`] stores one JSON document per key. Two backends ship
//! with the crate:
//!
//! - [`MemoryBackend`]: an in-process map, for tests and hosts that persist
//!   by other means.
//! - [`JsonFileBackend`] (feature `json-file`): a single JSON object on disk,
//!   loaded when opened and rewritten after every change.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::io;

#[cfg(feature = "json-file")]
use std::fs::File;
#[cfg(feature = "json-file")]
use std::io::{BufReader, Write};
#[cfg(feature = "json-file")]
use std::path::{Path, PathBuf};

#[cfg(feature = "json-file")]
use tracing::debug;

/// Errors reported by durable backends.
#[derive(Debug)]
pub enum BackendError {
    Io(io::Error),
    Json(serde_json::Error),
    /// The stored document does not have the expected shape.
    Format(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "storage I/O error: {err}"),
            Self::Json(err) => write!(f, "storage JSON error: {err}"),
            Self::Format(msg) => write!(f, "malformed storage document: {msg}"),
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::Format(_) => None,
        }
    }
}

impl From<io::Error> for BackendError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

/// Key/value store used by the persistent scope.
pub trait DurableBackend {
    /// The stored document for `key`, if any.
    fn get(&self, key: &str) -> Option<serde_json::Value>;

    /// Store `value` under `key`.
    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), BackendError>;

    /// Remove `key`. Removing an absent key succeeds.
    fn delete(&self, key: &str) -> Result<(), BackendError>;

    /// Stored keys, sorted.
    fn keys(&self) -> Vec<String>;
}

/// In-process backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RefCell<BTreeMap<String, serde_json::Value>>,
    writes: Cell<u64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the backend with existing documents.
    pub fn with_entries<K: Into<String>>(
        entries: impl IntoIterator<Item = (K, serde_json::Value)>,
    ) -> Self {
        Self {
            entries: RefCell::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
            writes: Cell::new(0),
        }
    }

    /// Number of successful `set` and `delete` calls.
    pub fn write_count(&self) -> u64 {
        self.writes.get()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl DurableBackend for MemoryBackend {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), BackendError> {
        self.entries.borrow_mut().insert(key.to_string(), value);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.entries.borrow_mut().remove(key);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }
}

/// Backend persisting all keys as one JSON object in a file.
#[cfg(feature = "json-file")]
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    entries: RefCell<BTreeMap<String, serde_json::Value>>,
}

#[cfg(feature = "json-file")]
impl JsonFileBackend {
    /// Open the file at `path`, loading existing content. A missing file
    /// starts empty and is created on the first write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref().to_path_buf();
        let entries = match File::open(&path) {
            Ok(file) => {
                let document: serde_json::Value = serde_json::from_reader(BufReader::new(file))?;
                match document {
                    serde_json::Value::Object(map) => map.into_iter().collect(),
                    other => {
                        return Err(BackendError::Format(format!(
                            "expected a JSON object at the top level, found {}",
                            json_kind(&other)
                        )));
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), keys = entries.len(), "opened durable store");
        Ok(Self {
            path,
            entries: RefCell::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the file from the in-memory entries.
    pub fn flush(&self) -> Result<(), BackendError> {
        let document: serde_json::Map<String, serde_json::Value> = self
            .entries
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut file = File::create(&self.path)?;
        serde_json::to_writer_pretty(&mut file, &serde_json::Value::Object(document))?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(feature = "json-file")]
impl DurableBackend for JsonFileBackend {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), BackendError> {
        self.entries.borrow_mut().insert(key.to_string(), value);
        self.flush()
    }

    fn delete(&self, key: &str) -> Result<(), BackendError> {
        if self.entries.borrow_mut().remove(key).is_none() {
            return Ok(());
        }
        self.flush()
    }

    fn keys(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }
}

#[cfg(feature = "json-file")]
fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
