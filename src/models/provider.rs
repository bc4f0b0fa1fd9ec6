use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A provider option captured by the options cache, e.g. an account id and
/// its human-readable name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedProviderOption {
    pub provider_id: String,
    pub arg: String,
    pub value: String,
    pub label: String,
}

/// Display metadata for a single provider argument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgField {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Argument key → display metadata, as published by a provider.
pub type ArgSchema = BTreeMap<String, ArgField>;
