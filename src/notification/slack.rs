use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::reviewer::MessageHandle;

/// A chat message: Block Kit blocks plus the plain-text fallback shown in
/// notifications and clients that cannot render blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SlackMessage {
    pub text: String,
    pub blocks: Vec<Value>,
}

impl SlackMessage {
    /// Single markdown section with a plain fallback.
    pub fn markdown(markdown: &str, fallback: &str) -> Self {
        Self {
            text: fallback.to_string(),
            blocks: vec![json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": markdown },
            })],
        }
    }
}

/// Chat capabilities the notifier relies on. Every failure is reported to
/// the caller, which logs it; nothing here retries.
#[async_trait]
pub trait MessagingTransport: Send + Sync {
    /// Resolves a chat user id from an email address.
    async fn lookup_user_by_email(&self, email: &str) -> anyhow::Result<String>;

    /// Posts a message to a channel or user id and returns its handle.
    async fn send_message(&self, channel: &str, message: &SlackMessage) -> anyhow::Result<MessageHandle>;

    /// Schedules a message; channel names are accepted here.
    async fn schedule_message(
        &self,
        channel: &str,
        message: &SlackMessage,
        post_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Replaces the content of a previously sent message.
    async fn update_message(&self, handle: &MessageHandle, message: &SlackMessage) -> anyhow::Result<()>;
}

/// Slack Web API client authenticated with a bot token.
#[derive(Clone)]
pub struct SlackClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

#[derive(Deserialize)]
struct LookupUser {
    user: SlackUser,
}

#[derive(Deserialize)]
struct SlackUser {
    id: String,
}

#[derive(Deserialize)]
struct Posted {
    channel: String,
    ts: String,
}

impl SlackClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Approvals-Notifier/1.0")
            .build()
            .context("failed to build slack HTTP client")?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Parses a Web API response, which reports failures as `{"ok": false, "error": ...}`
    /// with a 200 status.
    async fn parse<T: DeserializeOwned>(method: &str, resp: reqwest::Response) -> anyhow::Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("slack {} returned error: status={}, body={}", method, status, body);
        }
        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("invalid slack {} response", method))?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let error = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            anyhow::bail!("slack {} failed: {}", method, error);
        }
        serde_json::from_value(body).with_context(|| format!("unexpected slack {} payload", method))
    }

    async fn post<T: DeserializeOwned>(&self, method: &str, payload: &Value) -> anyhow::Result<T> {
        let resp = self
            .client
            .post(format!("{}/{}", self.api_url, method))
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("failed to call slack {}", method))?;
        Self::parse(method, resp).await
    }
}

#[async_trait]
impl MessagingTransport for SlackClient {
    async fn lookup_user_by_email(&self, email: &str) -> anyhow::Result<String> {
        let resp = self
            .client
            .get(format!("{}/users.lookupByEmail", self.api_url))
            .bearer_auth(&self.token)
            .query(&[("email", email)])
            .send()
            .await
            .context("failed to call slack users.lookupByEmail")?;
        let found: LookupUser = Self::parse("users.lookupByEmail", resp).await?;
        Ok(found.user.id)
    }

    async fn send_message(&self, channel: &str, message: &SlackMessage) -> anyhow::Result<MessageHandle> {
        let posted: Posted = self
            .post(
                "chat.postMessage",
                &json!({
                    "channel": channel,
                    "text": message.text,
                    "blocks": message.blocks,
                }),
            )
            .await?;
        tracing::debug!(channel = %posted.channel, ts = %posted.ts, "sent slack message");
        Ok(MessageHandle {
            channel: posted.channel,
            ts: posted.ts,
        })
    }

    async fn schedule_message(
        &self,
        channel: &str,
        message: &SlackMessage,
        post_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let _: Value = self
            .post(
                "chat.scheduleMessage",
                &json!({
                    "channel": channel,
                    "text": message.text,
                    "blocks": message.blocks,
                    "post_at": post_at.timestamp(),
                }),
            )
            .await?;
        tracing::info!(channel, post_at = %post_at, "scheduled slack message");
        Ok(())
    }

    async fn update_message(&self, handle: &MessageHandle, message: &SlackMessage) -> anyhow::Result<()> {
        let _: Value = self
            .post(
                "chat.update",
                &json!({
                    "channel": handle.channel,
                    "ts": handle.ts,
                    "text": message.text,
                    "blocks": message.blocks,
                }),
            )
            .await?;
        Ok(())
    }
}
