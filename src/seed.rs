//! YAML seed data for the in-memory store: rules, users, groups and provider metadata.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::models::identity::{Group, User};
use crate::models::provider::{ArgSchema, CachedProviderOption};
use crate::models::rule::AccessRule;
use crate::notification::arguments::StaticSchemaRegistry;
use crate::store::memory::MemoryStore;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub rules: Vec<AccessRule>,
    pub users: Vec<User>,
    pub groups: Vec<Group>,
    /// Provider type → argument schema.
    pub providers: HashMap<String, ArgSchema>,
    pub provider_options: Vec<CachedProviderOption>,
}

impl Seed {
    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(raw).context("invalid seed YAML")
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seed file {}", path.display()))?;
        Self::from_yaml(&raw)
    }

    /// Loads everything into `store` and returns the provider schemas.
    pub fn apply(self, store: &MemoryStore) -> StaticSchemaRegistry {
        for rule in self.rules {
            store.insert_rule(rule);
        }
        for user in self.users {
            store.insert_user(user);
        }
        for group in self.groups {
            store.insert_group(group);
        }
        for option in self.provider_options {
            store.insert_provider_option(option);
        }
        StaticSchemaRegistry::new(self.providers)
    }
}
