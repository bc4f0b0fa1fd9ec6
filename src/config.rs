use std::time::Duration;

use anyhow::Context;
use url::Url;

use crate::notification::dispatcher::DispatchSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Base URL of the web frontend; always ends with `/` so request paths join onto it.
    pub frontend_url: Url,
    pub slack_bot_token: Option<String>,
    pub slack_api_url: String,
    /// Comma-separated list of incoming webhook URLs notified of request events.
    pub webhook_urls: Vec<String>,
    pub webhook_signing_secret: Option<String>,
    pub provisioner_url: String,
    pub provisioner_api_key: Option<String>,
    /// Upper bound on concurrent reviewer deliveries per event. Minimum 1.
    pub max_concurrent_deliveries: usize,
    /// Deadline for each outbound messaging call.
    pub delivery_timeout: Duration,
    pub seed_file: Option<String>,
}

impl Config {
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            max_concurrent_deliveries: self.max_concurrent_deliveries,
            delivery_timeout: self.delivery_timeout,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let frontend = std::env::var("APPROVALS_FRONTEND_URL")
        .unwrap_or_else(|_| "http://localhost:3000".into());

    Ok(Config {
        port: std::env::var("APPROVALS_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080),
        frontend_url: parse_frontend_url(&frontend)?,
        slack_bot_token: std::env::var("APPROVALS_SLACK_BOT_TOKEN")
            .ok()
            .filter(|t| !t.is_empty()),
        slack_api_url: std::env::var("APPROVALS_SLACK_API_URL")
            .unwrap_or_else(|_| "https://slack.com/api".into()),
        webhook_urls: split_list(&std::env::var("APPROVALS_WEBHOOK_URLS").unwrap_or_default()),
        webhook_signing_secret: std::env::var("APPROVALS_WEBHOOK_SIGNING_SECRET").ok(),
        provisioner_url: std::env::var("APPROVALS_PROVISIONER_URL")
            .unwrap_or_else(|_| "http://localhost:9092".into()),
        provisioner_api_key: std::env::var("APPROVALS_PROVISIONER_API_KEY").ok(),
        max_concurrent_deliveries: std::env::var("APPROVALS_MAX_CONCURRENT_DELIVERIES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(16)
            .max(1),
        delivery_timeout: Duration::from_secs(
            std::env::var("APPROVALS_DELIVERY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        ),
        seed_file: std::env::var("APPROVALS_SEED_FILE").ok(),
    })
}

pub fn parse_frontend_url(raw: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(raw).with_context(|| format!("invalid frontend URL: {}", raw))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
