use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::{info, warn};

// ── Webhook Sender ────────────────────────────────────────────

/// An outbound notification channel independent of per-user messaging.
/// Webhook messages never carry per-user chat identities.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send_webhook_message(&self, blocks: &[Value], summary: &str) -> Result<()>;

    /// Identifies the webhook in logs without leaking its secret path.
    fn describe(&self) -> String;
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
    blocks: &'a [Value],
}

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns lowercase hex digest (e.g. "sha256=<hex>").
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid signing key: {}", e))?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

// ── Incoming Webhook ─────────────────────────────────────────

/// Posts Block Kit payloads to an incoming-webhook URL.
///
/// If a signing secret is configured the body is signed with HMAC-SHA256 and
/// sent in the `x-approvals-signature` header. A single attempt is made.
#[derive(Clone)]
pub struct IncomingWebhook {
    client: reqwest::Client,
    url: String,
    signing_secret: Option<String>,
}

impl IncomingWebhook {
    pub fn new(url: impl Into<String>, signing_secret: Option<String>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("Approvals-Webhook/1.0")
                .build()
                .context("failed to build webhook HTTP client")?,
            url: url.into(),
            signing_secret,
        })
    }
}

#[async_trait]
impl WebhookSender for IncomingWebhook {
    async fn send_webhook_message(&self, blocks: &[Value], summary: &str) -> Result<()> {
        let payload = serde_json::to_vec(&WebhookPayload {
            text: summary,
            blocks,
        })
        .context("webhook serialize error")?;
        let delivery_id = uuid::Uuid::new_v4().to_string();

        let mut req = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .header("x-approvals-delivery-id", &delivery_id);

        if let Some(secret) = &self.signing_secret {
            req = req.header("x-approvals-signature", hmac_sha256_hex(secret, &payload)?);
        }

        let resp = req
            .body(payload)
            .send()
            .await
            .context("webhook request error")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(
                webhook = %self.describe(),
                delivery_id = %delivery_id,
                status = %status,
                body = %body,
                "webhook delivery failed (non-2xx)"
            );
            anyhow::bail!("webhook returned error: status={}", status);
        }

        info!(
            webhook = %self.describe(),
            delivery_id = %delivery_id,
            status = %status,
            "webhook delivered successfully"
        );
        Ok(())
    }

    fn describe(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(u) => format!("{}://{}", u.scheme(), u.host_str().unwrap_or_default()),
            Err(_) => "<invalid url>".to_string(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────
