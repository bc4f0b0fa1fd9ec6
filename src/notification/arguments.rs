//! Display labelling of request arguments for notification messages.
//!
//! Labels are assembled from the request's selections, the rule's fixed
//! arguments, the provider's argument schema and the cached provider
//! options. This is expected to be replaced by a single options-cache lookup
//! per rule; callers only depend on [`ArgumentRenderer`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::models::provider::ArgSchema;
use crate::models::request::Request;
use crate::models::rule::AccessRule;
use crate::store::Store;

/// One labelled argument as shown to a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedArgument {
    pub title: String,
    pub label: String,
    pub value: String,
}

#[async_trait]
pub trait ArgumentRenderer: Send + Sync {
    /// Returns the request's arguments sorted by title.
    async fn render(&self, request: &Request, rule: &AccessRule) -> anyhow::Result<Vec<RenderedArgument>>;
}

/// Optional capability: argument display titles by provider type.
pub trait ArgSchemaProvider: Send + Sync {
    fn arg_schema(&self, provider_type: &str) -> Option<ArgSchema>;
}

/// Argument schemas known up front, keyed by provider type.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaRegistry {
    schemas: HashMap<String, ArgSchema>,
}

impl StaticSchemaRegistry {
    pub fn new(schemas: HashMap<String, ArgSchema>) -> Self {
        Self { schemas }
    }
}

impl ArgSchemaProvider for StaticSchemaRegistry {
    fn arg_schema(&self, provider_type: &str) -> Option<ArgSchema> {
        self.schemas.get(provider_type).cloned()
    }
}

pub struct CachedOptionsRenderer {
    store: Arc<dyn Store>,
    schemas: Arc<dyn ArgSchemaProvider>,
}

impl CachedOptionsRenderer {
    pub fn new(store: Arc<dyn Store>, schemas: Arc<dyn ArgSchemaProvider>) -> Self {
        Self { store, schemas }
    }
}

#[async_trait]
impl ArgumentRenderer for CachedOptionsRenderer {
    async fn render(&self, request: &Request, rule: &AccessRule) -> anyhow::Result<Vec<RenderedArgument>> {
        let target = &rule.target;
        let options = match self
            .store
            .list_cached_provider_options(&target.provider_id)
            .await
        {
            Ok(options) => options,
            Err(e) => {
                tracing::error!(provider.id = %target.provider_id, error = %e, "failed to fetch provider options for argument labels");
                Vec::new()
            }
        };

        // no schema means the raw key is the title
        let schema = self.schemas.arg_schema(&target.provider_type);
        let title_for = |key: &str| -> String {
            schema
                .as_ref()
                .and_then(|s| s.get(key))
                .map(|f| f.title.clone())
                .unwrap_or_else(|| key.to_string())
        };

        let mut rendered: Vec<RenderedArgument> = request
            .selected_with
            .iter()
            .map(|(key, opt)| RenderedArgument {
                title: title_for(key),
                label: opt.label.clone(),
                value: opt.value.clone(),
            })
            .collect();

        // Arguments with group options are selectable and already covered above.
        for (key, value) in &target.with {
            if target.with_argument_group_options.contains_key(key) {
                continue;
            }
            let label = options
                .iter()
                .find(|o| &o.arg == key && &o.value == value)
                .map(|o| o.label.clone())
                .unwrap_or_else(|| value.clone());
            rendered.push(RenderedArgument {
                title: title_for(key),
                label,
                value: value.clone(),
            });
        }

        rendered.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.value.cmp(&b.value)));
        Ok(rendered)
    }
}
