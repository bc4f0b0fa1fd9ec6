//! Grant provisioning against the backend that hands out access.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::request::{Grant, Request};
use crate::models::rule::AccessRule;

/// Performs the grant against the provisioning backend.
///
/// May be slow or fail transiently; callers do not retry.
#[async_trait]
pub trait GrantWorkflow: Send + Sync {
    async fn grant(&self, request: &Request, rule: &AccessRule) -> anyhow::Result<Grant>;
}

#[derive(Serialize)]
struct CreateGrantBody<'a> {
    id: &'a str,
    subject: &'a str,
    provider: &'a str,
    with: std::collections::BTreeMap<&'a str, &'a str>,
    start: chrono::DateTime<chrono::Utc>,
    end: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
struct CreateGrantResponse {
    grant: Grant,
}

/// JSON-over-HTTP client for the provisioner: `POST {base}/grants`.
#[derive(Clone)]
pub struct HttpGrantWorkflow {
    base_url: String,
    api_key: Option<String>,
    http: Client,
}

impl HttpGrantWorkflow {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("failed to build provisioner HTTP client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }
}

#[async_trait]
impl GrantWorkflow for HttpGrantWorkflow {
    async fn grant(&self, request: &Request, rule: &AccessRule) -> anyhow::Result<Grant> {
        let (start, end) = request.timing.window(request.created_at);

        // fixed rule arguments first, then the requester's selections
        let mut with: std::collections::BTreeMap<&str, &str> = rule
            .target
            .with
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        for (k, opt) in &request.selected_with {
            with.insert(k.as_str(), opt.value.as_str());
        }

        let body = CreateGrantBody {
            id: &request.id,
            subject: &request.requested_by,
            provider: &rule.target.provider_id,
            with,
            start,
            end,
        };

        let mut req = self
            .http
            .post(format!("{}/grants", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.context("provisioner request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("provisioner returned error: status={}, body={}", status, body);
        }

        let parsed: CreateGrantResponse = resp
            .json()
            .await
            .context("invalid provisioner response")?;

        tracing::info!(
            request.id = %request.id,
            grant.id = %parsed.grant.id,
            provider = %rule.target.provider_id,
            "grant created"
        );
        Ok(parsed.grant)
    }
}
