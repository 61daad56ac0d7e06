//! Fixed engine limits.

use crate::error::{KvdbError, KvdbResult};

/// Maximum number of keyspaces in one database.
pub const KVS_COUNT_MAX: usize = 256;

/// Maximum key length in bytes.
pub const KVS_KEY_LEN_MAX: usize = 1344;

/// Maximum keyspace name length in bytes.
pub const KVS_NAME_LEN_MAX: usize = 32;

/// Maximum configured prefix length.
pub const KVS_PFX_LEN_MAX: usize = 32;

/// Maximum value length in bytes.
pub const KVS_VALUE_LEN_MAX: usize = 1024 * 1024;

pub(crate) fn check_key(key: &[u8]) -> KvdbResult<()> {
    if key.is_empty() {
        return Err(KvdbError::invalid_argument("key must not be empty"));
    }
    if key.len() > KVS_KEY_LEN_MAX {
        return Err(KvdbError::invalid_argument(format!(
            "key of {} bytes exceeds maximum of {KVS_KEY_LEN_MAX}",
            key.len()
        )));
    }
    Ok(())
}

pub(crate) fn check_value(value: &[u8]) -> KvdbResult<()> {
    if value.len() > KVS_VALUE_LEN_MAX {
        return Err(KvdbError::invalid_argument(format!(
            "value of {} bytes exceeds maximum of {KVS_VALUE_LEN_MAX}",
            value.len()
        )));
    }
    Ok(())
}

/// Filters follow key bounds, except that cursors accept an empty filter.
pub(crate) fn check_filter(filter: &[u8]) -> KvdbResult<()> {
    if filter.len() > KVS_KEY_LEN_MAX {
        return Err(KvdbError::invalid_argument(format!(
            "filter of {} bytes exceeds maximum of {KVS_KEY_LEN_MAX}",
            filter.len()
        )));
    }
    Ok(())
}

pub(crate) fn check_name(name: &str) -> KvdbResult<()> {
    if name.is_empty() || name.len() > KVS_NAME_LEN_MAX {
        return Err(KvdbError::invalid_argument(format!(
            "keyspace name must be 1..={KVS_NAME_LEN_MAX} bytes, got {}",
            name.len()
        )));
    }
    let valid = name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if !valid {
        return Err(KvdbError::invalid_argument(format!(
            "keyspace name {name:?} may only contain [A-Za-z0-9_-]"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_bounds() {
        assert!(check_key(b"").is_err());
        assert!(check_key(&[0u8; KVS_KEY_LEN_MAX]).is_ok());
        assert!(check_key(&[0u8; KVS_KEY_LEN_MAX + 1]).is_err());
    }

    #[test]
    fn value_bounds() {
        assert!(check_value(b"").is_ok());
        assert!(check_value(&vec![0u8; KVS_VALUE_LEN_MAX]).is_ok());
        assert!(check_value(&vec![0u8; KVS_VALUE_LEN_MAX + 1]).is_err());
    }

    #[test]
    fn names() {
        assert!(check_name("kvs-1_a").is_ok());
        assert!(check_name("").is_err());
        assert!(check_name("has.dot").is_err());
        assert!(check_name(&"n".repeat(KVS_NAME_LEN_MAX)).is_ok());
        assert!(check_name(&"n".repeat(KVS_NAME_LEN_MAX + 1)).is_err());
    }
}
