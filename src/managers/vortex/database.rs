//! Access to Vortex's `state.v2` database.
//!
//! Vortex persists its state as a flat key space: every leaf of the JSON state tree is
//! stored under its path joined with `###`, with a compact JSON value. [`VortexDatabase`]
//! turns key ranges back into trees and writes trees as batches of leaves.

use crate::error::ErrorKind;
use camino::{Utf8Path, Utf8PathBuf};
use rusty_leveldb::{DB, LdbIterator, Options, StatusCode, WriteBatch};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub const KEY_SEPARATOR: &str = "###";

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("database at {path} is locked by another process")]
    Locked { path: Utf8PathBuf },

    #[error("database at {path} does not exist")]
    Missing { path: Utf8PathBuf },

    #[error("database operation on {path} failed: {message}")]
    Operation { path: Utf8PathBuf, message: String },

    #[error("invalid value under key {key}: {source}")]
    Value {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DatabaseError {
    pub fn is_locked(&self) -> bool {
        matches!(self, DatabaseError::Locked { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        if self.is_locked() {
            ErrorKind::DatabaseLocked
        } else {
            ErrorKind::Database
        }
    }
}

/// Raw key/value access to a state database.
pub trait StateStore: Send + Sync {
    fn exists(&self) -> bool;

    /// Whether another process holds the database lock.
    fn is_locked(&self) -> bool;

    fn get(&self, key: &str) -> Result<Option<String>, DatabaseError>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, DatabaseError>;

    /// Write all entries atomically.
    fn write_batch(&self, entries: &[(String, String)]) -> Result<(), DatabaseError>;

    /// Folder holding the database files, if it lives on disk.
    fn location(&self) -> Option<&Utf8Path>;
}

/// LevelDB store that opens the database for every operation, so the lock is only held
/// while reading or writing.
#[derive(Debug, Clone)]
pub struct LevelDbStore {
    path: Utf8PathBuf,
}

impl LevelDbStore {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<DB, DatabaseError> {
        if !self.path.is_dir() {
            return Err(DatabaseError::Missing {
                path: self.path.clone(),
            });
        }
        let options = Options {
            create_if_missing: false,
            ..Options::default()
        };
        DB::open(self.path.as_std_path(), options).map_err(|status| match status.code {
            StatusCode::LockError => DatabaseError::Locked {
                path: self.path.clone(),
            },
            _ => self.operation_error(status.err),
        })
    }

    fn operation_error(&self, message: impl Into<String>) -> DatabaseError {
        DatabaseError::Operation {
            path: self.path.clone(),
            message: message.into(),
        }
    }
}

impl StateStore for LevelDbStore {
    fn exists(&self) -> bool {
        self.path.is_dir()
    }

    fn is_locked(&self) -> bool {
        matches!(self.open(), Err(DatabaseError::Locked { .. }))
    }

    fn get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let mut db = self.open()?;
        Ok(db
            .get(key.as_bytes())
            .map(|value| String::from_utf8_lossy(&value).into_owned()))
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, DatabaseError> {
        let mut db = self.open()?;
        let mut iter = db
            .new_iter()
            .map_err(|status| self.operation_error(status.err))?;
        iter.seek(prefix.as_bytes());

        let mut entries = Vec::new();
        let (mut key, mut value) = (Vec::new(), Vec::new());
        while iter.valid() {
            if !iter.current(&mut key, &mut value) || !key.starts_with(prefix.as_bytes()) {
                break;
            }
            entries.push((
                String::from_utf8_lossy(&key).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            ));
            if !iter.advance() {
                break;
            }
        }
        Ok(entries)
    }

    fn write_batch(&self, entries: &[(String, String)]) -> Result<(), DatabaseError> {
        let mut db = self.open()?;
        let mut batch = WriteBatch::new();
        for (key, value) in entries {
            batch.put(key.as_bytes(), value.as_bytes());
        }
        db.write(batch, true)
            .map_err(|status| self.operation_error(status.err))?;
        db.flush().map_err(|status| self.operation_error(status.err))?;
        Ok(())
    }

    fn location(&self) -> Option<&Utf8Path> {
        Some(&self.path)
    }
}

/// In-memory store with a switchable lock flag.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    locked: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    /// Insert a raw entry; `value` must already be JSON.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.lock().unwrap().insert(key.into(), value.into());
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.lock().unwrap().clone()
    }

    fn check_lock(&self) -> Result<(), DatabaseError> {
        if self.is_locked() {
            Err(DatabaseError::Locked {
                path: Utf8PathBuf::from("<memory>"),
            })
        } else {
            Ok(())
        }
    }
}

impl StateStore for MemoryStore {
    fn exists(&self) -> bool {
        true
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        self.check_lock()?;
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, DatabaseError> {
        self.check_lock()?;
        Ok(self
            .entries
            .lock()
            .unwrap()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn write_batch(&self, entries: &[(String, String)]) -> Result<(), DatabaseError> {
        self.check_lock()?;
        let mut map = self.entries.lock().unwrap();
        for (key, value) in entries {
            map.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn location(&self) -> Option<&Utf8Path> {
        None
    }
}

/// JSON view over a [`StateStore`], addressed by key paths.
#[derive(Clone)]
pub struct VortexDatabase {
    store: Arc<dyn StateStore>,
}

impl VortexDatabase {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.store.exists()
    }

    pub fn is_locked(&self) -> bool {
        self.store.is_locked()
    }

    /// Value stored directly under `path`.
    pub fn get(&self, path: &[&str]) -> Result<Option<Value>, DatabaseError> {
        let key = join_key(path);
        match self.store.get(&key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| DatabaseError::Value { key, source }),
            None => Ok(None),
        }
    }

    /// Every leaf below `path`, rebuilt into a tree relative to `path`.
    pub fn load_tree(&self, path: &[&str]) -> Result<Map<String, Value>, DatabaseError> {
        let prefix = format!("{}{}", join_key(path), KEY_SEPARATOR);
        let entries = self.store.scan_prefix(&prefix)?;
        Ok(unflatten(entries.iter().filter_map(|(key, value)| {
            key.strip_prefix(&prefix).map(|rest| (rest, value.as_str()))
        })))
    }

    /// Store `value` at `path`, one entry per leaf.
    pub fn dump(&self, path: &[&str], value: &Value) -> Result<(), DatabaseError> {
        let mut entries = Vec::new();
        flatten(&join_key(path), value, &mut entries);
        tracing::debug!("Writing {} database entries below {}", entries.len(), join_key(path));
        self.store.write_batch(&entries)
    }

    /// Store `value` as a single leaf at `path`.
    pub fn set(&self, path: &[&str], value: &Value) -> Result<(), DatabaseError> {
        self.store
            .write_batch(&[(join_key(path), compact_json(value))])
    }
}

impl std::fmt::Debug for VortexDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VortexDatabase")
            .field("location", &self.store.location())
            .finish()
    }
}

pub fn join_key(path: &[&str]) -> String {
    path.join(KEY_SEPARATOR)
}

fn compact_json(value: &Value) -> String {
    // Serializing a Value cannot fail
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Split a tree into `(key, json)` leaves below `prefix`.
///
/// Objects are descended into; everything else, arrays included, is one leaf. Empty
/// objects produce no entries.
pub fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}{}{}", prefix, KEY_SEPARATOR, key)
                };
                flatten(&path, child, out);
            }
        }
        leaf => out.push((prefix.to_string(), compact_json(leaf))),
    }
}

/// Rebuild a tree from `(relative key, json)` leaves. Entries with invalid JSON are skipped.
pub fn unflatten<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Map<String, Value> {
    let mut root = Map::new();
    for (key, raw) in entries {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Skipping database key {}: {}", key, e);
                continue;
            }
        };
        let parts: Vec<&str> = key.split(KEY_SEPARATOR).collect();
        let Some((last, parents)) = parts.split_last() else {
            continue;
        };

        let mut current = &mut root;
        for part in parents {
            let slot = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Value::Object(next) = slot else {
                unreachable!("slot was just made an object");
            };
            current = next;
        }
        current.insert(last.to_string(), value);
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn database() -> (Arc<MemoryStore>, VortexDatabase) {
        let store = Arc::new(MemoryStore::new());
        let db = VortexDatabase::new(store.clone());
        (store, db)
    }

    #[test]
    fn test_flatten_writes_one_entry_per_leaf() {
        let mut entries = Vec::new();
        flatten(
            "persistent###profiles###abc",
            &json!({"name": "Main", "features": {"local_saves": false}, "modState": {}, "tags": [1, 2]}),
            &mut entries,
        );
        assert_eq!(
            entries,
            vec![
                ("persistent###profiles###abc###name".to_string(), "\"Main\"".to_string()),
                (
                    "persistent###profiles###abc###features###local_saves".to_string(),
                    "false".to_string()
                ),
                ("persistent###profiles###abc###tags".to_string(), "[1,2]".to_string()),
            ]
        );
    }

    #[test]
    fn test_unflatten_skips_invalid_values() {
        let tree = unflatten([("a###b", "1"), ("a###c", "not json"), ("d", "\"x\"")]);
        assert_eq!(Value::Object(tree), json!({"a": {"b": 1}, "d": "x"}));
    }

    #[test]
    fn test_load_tree_is_relative_to_path() {
        let (store, db) = database();
        store.insert("persistent###profiles###p1###name", "\"Main\"");
        store.insert("persistent###profiles###p1###gameId", "\"skyrimse\"");
        store.insert("persistent###profilesX###other", "1");
        store.insert("settings###interface###profilesVisible", "true");

        let tree = db.load_tree(&["persistent", "profiles"]).unwrap();
        assert_eq!(Value::Object(tree), json!({"p1": {"name": "Main", "gameId": "skyrimse"}}));
        assert_eq!(
            db.get(&["settings", "interface", "profilesVisible"]).unwrap(),
            Some(json!(true))
        );
    }

    #[test]
    fn test_dump_then_load() {
        let (_, db) = database();
        let profile = json!({"name": "New", "features": {"local_saves": true}});
        db.dump(&["persistent", "profiles", "xyz"], &profile).unwrap();
        let tree = db.load_tree(&["persistent", "profiles"]).unwrap();
        assert_eq!(tree.get("xyz"), Some(&profile));
    }

    #[test]
    fn test_locked_store_reports_locked_errors() {
        let (store, db) = database();
        store.set_locked(true);
        assert!(db.is_locked());
        let err = db.get(&["a"]).unwrap_err();
        assert!(err.is_locked());
        assert_eq!(err.kind(), ErrorKind::DatabaseLocked);
    }

    #[test]
    fn test_leveldb_store_missing_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("state.v2")).unwrap();
        let store = LevelDbStore::new(path);
        assert!(!store.exists());
        assert!(!store.is_locked());
        assert!(matches!(store.get("a"), Err(DatabaseError::Missing { .. })));
    }
}
