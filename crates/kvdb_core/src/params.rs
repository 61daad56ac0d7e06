//! Textual configuration parameters.
//!
//! Parameters use a dotted namespace:
//!
//! ```text
//! kvdb.<param>          database-wide
//! kvs.<param>           every keyspace
//! kvs.<name>.<param>    one keyspace
//! ```
//!
//! They can be loaded from a JSON file, from inline JSON text or from
//! `key=value` assignments. Nested JSON objects are flattened with dots, so
//! `{"kvdb": {"durability": {"enabled": false}}}` sets
//! `kvdb.durability.enabled`. Sources are applied in call order and a later
//! assignment to the same key replaces the earlier one.
//!
//! ```
//! use kvdb_core::Params;
//!
//! let mut params = Params::new();
//! params.set("kvs.prefix.length", "2").unwrap();
//! params.set("kvs.orders.prefix.length", "4").unwrap();
//!
//! assert_eq!(params.kvs_config("orders").unwrap().prefix_length, 4);
//! assert_eq!(params.kvs_config("users").unwrap().prefix_length, 2);
//! ```

use crate::config::{DbConfig, KvsConfig};
use crate::error::{KvdbError, KvdbResult};
use crate::limits::{check_name, KVS_PFX_LEN_MAX};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const DURABILITY_ENABLED: &str = "durability.enabled";
const THROTTLE_DISABLE: &str = "throttle.disable";
const THROTTLE_RATE: &str = "throttle.rate";
const COMPACTION_LWM_PCT: &str = "compaction.lwm_pct";
const COMPACTION_HWM_PCT: &str = "compaction.hwm_pct";
const PREFIX_LENGTH: &str = "prefix.length";

const KVDB_PARAMS: &[&str] = &[
    DURABILITY_ENABLED,
    THROTTLE_DISABLE,
    THROTTLE_RATE,
    COMPACTION_LWM_PCT,
    COMPACTION_HWM_PCT,
];
const KVS_PARAMS: &[&str] = &[PREFIX_LENGTH];

/// A set of parameter assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: BTreeMap<String, String>,
}

impl Params {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a parameter set from `key=value` assignments.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed assignment, an unknown
    /// parameter or a value that does not parse.
    pub fn parse(assignments: &[&str]) -> KvdbResult<Self> {
        let mut params = Self::new();
        params.apply(assignments)?;
        Ok(params)
    }

    /// Builds a parameter set from assignments given to one keyspace.
    ///
    /// Bare names such as `prefix.length=3` are scoped to `name`; fully
    /// qualified `kvs.` keys are taken as they are.
    ///
    /// # Errors
    ///
    /// Same as [`Params::parse`].
    pub fn parse_for_keyspace(name: &str, assignments: &[&str]) -> KvdbResult<Self> {
        let mut params = Self::new();
        for assignment in assignments {
            let (key, value) = split_assignment(assignment)?;
            if key.starts_with("kvs.") {
                params.set(key, value)?;
            } else {
                params.set(&format!("kvs.{name}.{key}"), value)?;
            }
        }
        Ok(params)
    }

    /// Applies `key=value` assignments in order.
    ///
    /// # Errors
    ///
    /// Same as [`Params::parse`]. Assignments before the failing one stay
    /// applied.
    pub fn apply(&mut self, assignments: &[&str]) -> KvdbResult<()> {
        for assignment in assignments {
            let (key, value) = split_assignment(assignment)?;
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Sets one parameter.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the key is not recognized or the value
    /// does not parse for it.
    pub fn set(&mut self, key: &str, value: &str) -> KvdbResult<()> {
        let param = classify(key)?;
        validate(param, value)?;
        self.entries.insert(key.to_string(), value.trim().to_string());
        Ok(())
    }

    /// Returns the raw value assigned to `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Number of assignments held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no parameter is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Loads assignments from inline JSON text.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the text is not a JSON object or holds an
    /// invalid assignment.
    pub fn apply_json(&mut self, text: &str) -> KvdbResult<()> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| KvdbError::invalid_argument(format!("malformed params text: {e}")))?;
        if !value.is_object() {
            return Err(KvdbError::invalid_argument(
                "params text must be a JSON object",
            ));
        }
        let mut flat = Vec::new();
        flatten(String::new(), &value, &mut flat)?;
        for (key, value) in flat {
            self.set(&key, &value)?;
        }
        Ok(())
    }

    /// Loads assignments from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, otherwise the same
    /// errors as [`Params::apply_json`].
    pub fn apply_file(&mut self, path: &Path) -> KvdbResult<()> {
        let text = fs::read_to_string(path)?;
        self.apply_json(&text)
    }

    /// Returns a copy of `self` with every assignment of `over` on top.
    #[must_use]
    pub fn merged(&self, over: &Self) -> Self {
        let mut entries = self.entries.clone();
        entries.extend(over.entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { entries }
    }

    /// Resolves the database-wide settings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the low watermark exceeds the high one.
    pub fn db_config(&self) -> KvdbResult<DbConfig> {
        let mut config = DbConfig::default();
        for (key, value) in &self.entries {
            let Some(param) = key.strip_prefix("kvdb.") else {
                continue;
            };
            match param {
                DURABILITY_ENABLED => config.sync_on_commit = parse_bool(value)?,
                THROTTLE_DISABLE => config.throttle_disable = parse_bool(value)?,
                THROTTLE_RATE => config.throttle_rate = parse_num(value)?,
                COMPACTION_LWM_PCT => config.lwm_pct = parse_num(value)?,
                COMPACTION_HWM_PCT => config.hwm_pct = parse_num(value)?,
                _ => {}
            }
        }
        if config.lwm_pct > config.hwm_pct {
            return Err(KvdbError::invalid_argument(format!(
                "compaction low watermark {} exceeds high watermark {}",
                config.lwm_pct, config.hwm_pct
            )));
        }
        Ok(config)
    }

    /// Resolves the settings of keyspace `name`.
    ///
    /// `kvs.<name>.<param>` wins over `kvs.<param>` regardless of the order
    /// the two were assigned in.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a stored value no longer parses.
    pub fn kvs_config(&self, name: &str) -> KvdbResult<KvsConfig> {
        let mut config = KvsConfig::default();
        let scoped = format!("kvs.{name}.");
        for pass in [None, Some(scoped.as_str())] {
            for (key, value) in &self.entries {
                let param = match pass {
                    None => key.strip_prefix("kvs.").filter(|p| KVS_PARAMS.contains(p)),
                    Some(scope) => key.strip_prefix(scope),
                };
                if param == Some(PREFIX_LENGTH) {
                    config.prefix_length = parse_num(value)?;
                }
            }
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy)]
enum Param {
    Db(&'static str),
    Kvs(&'static str),
}

fn classify(key: &str) -> KvdbResult<Param> {
    let unknown = || KvdbError::invalid_argument(format!("unknown parameter {key:?}"));

    if let Some(rest) = key.strip_prefix("kvdb.") {
        return KVDB_PARAMS
            .iter()
            .find(|p| **p == rest)
            .map(|p| Param::Db(*p))
            .ok_or_else(unknown);
    }
    if let Some(rest) = key.strip_prefix("kvs.") {
        if let Some(p) = KVS_PARAMS.iter().find(|p| **p == rest) {
            return Ok(Param::Kvs(*p));
        }
        let (name, param) = rest.split_once('.').ok_or_else(unknown)?;
        check_name(name)?;
        return KVS_PARAMS
            .iter()
            .find(|p| **p == param)
            .map(|p| Param::Kvs(*p))
            .ok_or_else(unknown);
    }
    Err(unknown())
}

fn validate(param: Param, value: &str) -> KvdbResult<()> {
    match param {
        Param::Db(DURABILITY_ENABLED | THROTTLE_DISABLE) => parse_bool(value).map(drop),
        Param::Db(THROTTLE_RATE) => parse_num::<u64>(value).map(drop),
        Param::Db(_) => {
            let pct: u32 = parse_num(value)?;
            if pct < 100 {
                return Err(KvdbError::invalid_argument(format!(
                    "space amplification watermark must be at least 100, got {pct}"
                )));
            }
            Ok(())
        }
        Param::Kvs(_) => {
            let len: usize = parse_num(value)?;
            if len > KVS_PFX_LEN_MAX {
                return Err(KvdbError::invalid_argument(format!(
                    "prefix length {len} exceeds maximum of {KVS_PFX_LEN_MAX}"
                )));
            }
            Ok(())
        }
    }
}

fn split_assignment(assignment: &str) -> KvdbResult<(&str, &str)> {
    assignment
        .split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| {
            KvdbError::invalid_argument(format!("expected key=value, got {assignment:?}"))
        })
}

fn parse_bool(value: &str) -> KvdbResult<bool> {
    match value.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(KvdbError::invalid_argument(format!(
            "expected a boolean, got {other:?}"
        ))),
    }
}

fn parse_num<T: std::str::FromStr>(value: &str) -> KvdbResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| KvdbError::invalid_argument(format!("expected a number, got {value:?}")))
}

fn flatten(prefix: String, value: &Value, out: &mut Vec<(String, String)>) -> KvdbResult<()> {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(key, v, out)?;
            }
            Ok(())
        }
        Value::Bool(b) => {
            out.push((prefix, b.to_string()));
            Ok(())
        }
        Value::Number(n) => {
            out.push((prefix, n.to_string()));
            Ok(())
        }
        Value::String(s) => {
            out.push((prefix, s.clone()));
            Ok(())
        }
        Value::Null | Value::Array(_) => Err(KvdbError::invalid_argument(format!(
            "unsupported value for parameter {prefix:?}"
        ))),
    }
}
