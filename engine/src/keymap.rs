//! Remote id <-> internal id reconciliation table.
//!
//! Records are stored under internal ids; the remote source addresses them by
//! remote ids. The key map binds the two per record type. Entries are created
//! the first time a remote id is seen by either source and are never removed.

use crate::{error::Result, Error, RecordId, TypeName};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// One binding in the key map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMapEntry {
    #[serde(rename = "type")]
    pub type_name: TypeName,
    pub remote_id: String,
    pub internal_id: RecordId,
}

/// Concurrent two-way map between remote and internal ids.
///
/// Share it via `Arc`; every method takes `&self`.
#[derive(Debug, Default)]
pub struct KeyMap {
    to_internal: DashMap<(TypeName, String), RecordId>,
    to_remote: DashMap<(TypeName, RecordId), String>,
}

impl KeyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the internal id bound to a remote id.
    pub fn internal_id(&self, type_name: &str, remote_id: &str) -> Option<RecordId> {
        self.to_internal
            .get(&(type_name.to_string(), remote_id.to_string()))
            .map(|id| id.value().clone())
    }

    /// Look up the remote id bound to an internal id.
    pub fn remote_id(&self, type_name: &str, internal_id: &str) -> Option<String> {
        self.to_remote
            .get(&(type_name.to_string(), internal_id.to_string()))
            .map(|id| id.value().clone())
    }

    /// Return the internal id for a remote id, allocating a fresh one on miss.
    ///
    /// Concurrent callers discovering the same remote id all receive the same
    /// internal id: the lookup and insert happen under the entry's shard lock.
    pub fn resolve_or_allocate(&self, type_name: &str, remote_id: &str) -> RecordId {
        let key = (type_name.to_string(), remote_id.to_string());
        match self.to_internal.entry(key) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let internal_id = uuid::Uuid::new_v4().to_string();
                entry.insert(internal_id.clone());
                self.to_remote.insert(
                    (type_name.to_string(), internal_id.clone()),
                    remote_id.to_string(),
                );
                internal_id
            }
        }
    }

    /// Bind a remote id to a known internal id.
    ///
    /// Re-binding the same pair is a no-op; binding either side to a
    /// different partner fails with [`Error::KeyConflict`]. Both directions
    /// are checked while holding both entries, locked in the same order as
    /// [`KeyMap::resolve_or_allocate`].
    pub fn bind(&self, type_name: &str, remote_id: &str, internal_id: &str) -> Result<()> {
        let conflict = |existing: &str| Error::KeyConflict {
            type_name: type_name.to_string(),
            remote_id: remote_id.to_string(),
            existing: existing.to_string(),
        };

        let key = (type_name.to_string(), remote_id.to_string());
        match self.to_internal.entry(key) {
            Entry::Occupied(entry) if entry.get() == internal_id => Ok(()),
            Entry::Occupied(entry) => Err(conflict(entry.get())),
            Entry::Vacant(forward) => {
                let reverse_key = (type_name.to_string(), internal_id.to_string());
                match self.to_remote.entry(reverse_key) {
                    Entry::Occupied(reverse) => Err(conflict(reverse.get())),
                    Entry::Vacant(reverse) => {
                        reverse.insert(remote_id.to_string());
                        forward.insert(internal_id.to_string());
                        Ok(())
                    }
                }
            }
        }
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.to_internal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_internal.is_empty()
    }

    /// All bindings, sorted.
    pub fn entries(&self) -> Vec<KeyMapEntry> {
        let mut entries: Vec<KeyMapEntry> = self
            .to_internal
            .iter()
            .map(|e| KeyMapEntry {
                type_name: e.key().0.clone(),
                remote_id: e.key().1.clone(),
                internal_id: e.value().clone(),
            })
            .collect();
        entries.sort();
        entries
    }
}
