//! Keyspace catalog persisted alongside the data log.

use crate::error::{KvdbError, KvdbResult};
use crate::limits::KVS_COUNT_MAX;
use crate::types::KeyspaceId;
use serde::{Deserialize, Serialize};

/// Current manifest format version.
pub const MANIFEST_VERSION: u16 = 1;

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyspaceEntry {
    /// Keyspace name.
    pub name: String,
    /// Stable id used by data log records.
    pub id: KeyspaceId,
    /// Prefix length fixed at creation.
    pub prefix_length: usize,
}

/// Database manifest.
///
/// Stored as JSON. Keyspace ids come from a counter that only grows, so a
/// dropped keyspace's id is never handed out again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest format version.
    pub version: u16,
    /// Keyspaces in creation order.
    pub keyspaces: Vec<KeyspaceEntry>,
    /// Next keyspace id to assign.
    pub next_keyspace_id: u32,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: MANIFEST_VERSION,
            keyspaces: Vec::new(),
            next_keyspace_id: 1,
        }
    }

    /// Looks up a keyspace by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&KeyspaceEntry> {
        self.keyspaces.iter().find(|e| e.name == name)
    }

    /// Registers a new keyspace and assigns its id.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` for a taken name and `ResourceExhausted` when
    /// the catalog is full.
    pub fn add_keyspace(&mut self, name: &str, prefix_length: usize) -> KvdbResult<KeyspaceId> {
        if self.get(name).is_some() {
            return Err(KvdbError::already_exists(format!("keyspace {name:?}")));
        }
        if self.keyspaces.len() >= KVS_COUNT_MAX {
            return Err(KvdbError::resource_exhausted(format!(
                "database already holds {KVS_COUNT_MAX} keyspaces"
            )));
        }

        let id = KeyspaceId::new(self.next_keyspace_id);
        self.next_keyspace_id = self
            .next_keyspace_id
            .checked_add(1)
            .ok_or_else(|| KvdbError::resource_exhausted("keyspace ids exhausted"))?;
        self.keyspaces.push(KeyspaceEntry {
            name: name.to_string(),
            id,
            prefix_length,
        });
        Ok(id)
    }

    /// Removes a keyspace, returning its entry.
    pub fn remove_keyspace(&mut self, name: &str) -> Option<KeyspaceEntry> {
        let pos = self.keyspaces.iter().position(|e| e.name == name)?;
        Some(self.keyspaces.remove(pos))
    }

    /// Encodes the manifest.
    pub fn encode(&self) -> KvdbResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| KvdbError::invalid_state(format!("cannot encode manifest: {e}")))
    }

    /// Decodes and validates a manifest.
    pub fn decode(data: &[u8]) -> KvdbResult<Self> {
        let manifest: Self = serde_json::from_slice(data)
            .map_err(|e| KvdbError::corruption(format!("malformed manifest: {e}")))?;

        if manifest.version > MANIFEST_VERSION {
            return Err(KvdbError::corruption(format!(
                "unsupported manifest version: {}",
                manifest.version
            )));
        }
        let stale_id = manifest
            .keyspaces
            .iter()
            .any(|e| e.id.as_u32() >= manifest.next_keyspace_id);
        if stale_id {
            return Err(KvdbError::corruption(
                "manifest keyspace id at or beyond next_keyspace_id",
            ));
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn ids_are_never_reused() {
        let mut manifest = Manifest::new();
        let a = manifest.add_keyspace("a", 0).unwrap();
        let b = manifest.add_keyspace("b", 2).unwrap();
        assert_ne!(a, b);

        manifest.remove_keyspace("b").unwrap();
        let b2 = manifest.add_keyspace("b", 0).unwrap();
        assert!(b2 > b);
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut manifest = Manifest::new();
        manifest.add_keyspace("a", 0).unwrap();
        let err = manifest.add_keyspace("a", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn count_limit() {
        let mut manifest = Manifest::new();
        for i in 0..KVS_COUNT_MAX {
            manifest.add_keyspace(&format!("k{i}"), 0).unwrap();
        }
        let err = manifest.add_keyspace("overflow", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn encode_decode() {
        let mut manifest = Manifest::new();
        manifest.add_keyspace("users", 4).unwrap();
        let decoded = Manifest::decode(&manifest.encode().unwrap()).unwrap();
        assert_eq!(decoded, manifest);
        assert_eq!(decoded.get("users").unwrap().prefix_length, 4);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(
            Manifest::decode(b"not json").unwrap_err().kind(),
            ErrorKind::Corruption
        );
        let future = br#"{"version": 99, "keyspaces": [], "next_keyspace_id": 1}"#;
        assert_eq!(
            Manifest::decode(future).unwrap_err().kind(),
            ErrorKind::Corruption
        );
    }
}
