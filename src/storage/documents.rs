use redb::{ReadableTable, Table};
use serde_json::{Map, Value};

use super::db::{Database, DatabaseError};
use super::tables::*;

impl Database {
    // ========================================================================
    // Document operations
    // ========================================================================

    /// Get the record stored at exactly `path`
    pub fn get_document(&self, path: &str) -> Result<Option<Value>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(DOCUMENTS)?;

        match table.get(path)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Read the record at `path`, or assemble every record beneath it into a
    /// nested object keyed by the remaining path segments.
    pub fn read_tree(&self, path: &str) -> Result<Option<Value>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(DOCUMENTS)?;

        if let Some(data) = table.get(path)? {
            return Ok(Some(rmp_serde::from_slice(data.value())?));
        }

        let prefix = format!("{path}/");
        let mut root = Map::new();
        for entry in table.range(prefix.as_str()..)? {
            let (key, data) = entry?;
            let key = key.value();
            let Some(relative) = key.strip_prefix(prefix.as_str()) else {
                break;
            };
            let value: Value = rmp_serde::from_slice(data.value())?;
            let segments: Vec<&str> = relative.split('/').collect();
            insert_nested(&mut root, &segments, value);
        }

        if root.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Value::Object(root)))
        }
    }

    /// Store a record at `path`. Records at an ancestor or beneath `path` are
    /// removed so the tree never holds a record inside another record.
    ///
    /// Returns whether the stored tree changed.
    pub fn put_document(&self, path: &str, value: &Value) -> Result<bool, DatabaseError> {
        debug_assert!(!path.is_empty(), "document path must not be empty");

        let data = rmp_serde::to_vec_named(value)?;
        let write_txn = self.begin_write()?;
        let changed = {
            let mut table = write_txn.open_table(DOCUMENTS)?;
            let mut changed = remove_ancestors(&mut table, path)?;
            changed |= remove_descendants(&mut table, path)? > 0;

            let previous = table.insert(path, data.as_slice())?;
            changed |= match previous {
                Some(old) => old.value() != data.as_slice(),
                None => true,
            };
            changed
        };
        write_txn.commit()?;
        Ok(changed)
    }

    /// Delete the record at `path` and everything beneath it.
    ///
    /// Returns the number of records removed.
    pub fn delete_tree(&self, path: &str) -> Result<u64, DatabaseError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(DOCUMENTS)?;
            let exact = u64::from(table.remove(path)?.is_some());
            exact + remove_descendants(&mut table, path)?
        };
        write_txn.commit()?;
        Ok(removed)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn remove_ancestors(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    path: &str,
) -> Result<bool, DatabaseError> {
    let mut removed = false;
    for (idx, _) in path.match_indices('/') {
        removed |= table.remove(&path[..idx])?.is_some();
    }
    Ok(removed)
}

fn remove_descendants(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    path: &str,
) -> Result<u64, DatabaseError> {
    let prefix = format!("{path}/");
    let keys = descendant_keys(&*table, &prefix)?;
    for key in &keys {
        table.remove(key.as_str())?;
    }
    Ok(keys.len() as u64)
}

fn descendant_keys(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    prefix: &str,
) -> Result<Vec<String>, DatabaseError> {
    let mut keys = Vec::new();
    for entry in table.range(prefix..)? {
        let (key, _) = entry?;
        let key = key.value();
        if !key.starts_with(prefix) {
            break;
        }
        keys.push(key.to_string());
    }
    Ok(keys)
}

fn insert_nested(root: &mut Map<String, Value>, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut node = root;
    for segment in parents {
        let child = node
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            *child = Value::Object(Map::new());
        }
        node = match child {
            Value::Object(map) => map,
            _ => return,
        };
    }
    node.insert(last.to_string(), value);
}
