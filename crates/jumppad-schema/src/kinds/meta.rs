//! Kinds that carry configuration structure rather than side effects.

use super::{is_remote_source, Payload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A nested blueprint loaded from `source`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Module {
    pub source: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, Value>,
}

impl Module {
    /// True when `source` must be fetched rather than read from disk.
    pub fn is_remote(&self) -> bool {
        is_remote_source(&self.source)
    }
}

impl Payload for Module {
    const KIND: &'static str = "module";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub value: Value,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Payload for Output {
    const KIND: &'static str = "output";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Variable {
    pub default: Value,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Payload for Variable {
    const KIND: &'static str = "variable";
}
