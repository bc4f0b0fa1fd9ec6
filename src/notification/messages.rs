//! Block Kit message construction for request notifications.

use serde_json::{json, Value};
use url::Url;

use super::arguments::RenderedArgument;
use super::slack::SlackMessage;
use crate::models::identity::User;
use crate::models::request::{Request, RequestStatus};
use crate::models::rule::AccessRule;

/// Slack allows at most 10 fields per section block.
const MAX_SECTION_FIELDS: usize = 10;

/// Links into the web frontend for reviewing a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewUrls {
    pub review: String,
    pub approve: String,
    pub deny: String,
}

impl ReviewUrls {
    pub fn new(frontend: &Url, request_id: &str) -> Result<Self, url::ParseError> {
        let review = frontend.join(&format!("requests/{}", request_id))?;
        let mut approve = review.clone();
        approve.set_query(Some("action=approve"));
        let mut deny = review.clone();
        deny.set_query(Some("action=deny"));
        Ok(Self {
            review: review.to_string(),
            approve: approve.to_string(),
            deny: deny.to_string(),
        })
    }
}

pub struct RequestMessageOpts<'a> {
    pub request: &'a Request,
    pub arguments: &'a [RenderedArgument],
    pub rule: &'a AccessRule,
    /// Chat id of the requester, rendered as a mention when known.
    pub requestor_slack_id: Option<&'a str>,
    pub requestor_email: &'a str,
    pub review_urls: &'a ReviewUrls,
    /// Mention prepended for broadcast-channel messages.
    pub tagged_user: Option<&'a str>,
    pub was_reviewed: bool,
    pub reviewer: Option<&'a User>,
    /// Webhook variant: no per-user identity, a single link instead of buttons.
    pub is_webhook: bool,
}

/// Builds the message reviewers see, either asking for a decision or, once
/// reviewed, reporting the outcome. Returns the plain summary and the message.
pub fn build_request_review_message(opts: RequestMessageOpts<'_>) -> (String, SlackMessage) {
    let requestor = match (opts.is_webhook, opts.requestor_slack_id) {
        (false, Some(id)) => format!("<@{}>", id),
        _ => opts.requestor_email.to_string(),
    };
    let rule_name = &opts.rule.name;

    let summary = if opts.was_reviewed {
        format!(
            "{}'s request to access {} was {}",
            opts.requestor_email,
            rule_name,
            outcome(opts.request.status)
        )
    } else {
        format!("New request for {} from {}", rule_name, opts.requestor_email)
    };

    let mut heading = String::new();
    if let Some(tag) = opts.tagged_user.filter(|t| !t.is_empty()) {
        heading.push_str(tag);
        heading.push(' ');
    }
    if opts.was_reviewed {
        heading.push_str(&format!(
            "{}'s request to access *<{}|{}>* was *{}*",
            requestor,
            opts.review_urls.review,
            rule_name,
            outcome(opts.request.status)
        ));
        if let Some(reviewer) = opts.reviewer {
            heading.push_str(&format!(" by {}", reviewer.email));
        }
    } else {
        heading.push_str(&format!(
            "*<{}|New request for {}>* from {}",
            opts.review_urls.review, rule_name, requestor
        ));
    }

    let mut blocks = vec![section(&heading), fields_block(request_fields(opts.request))];
    blocks.extend(argument_blocks(opts.arguments));

    if !opts.was_reviewed {
        if opts.is_webhook {
            blocks.push(json!({
                "type": "actions",
                "elements": [button("View request", &opts.review_urls.review, None)],
            }));
        } else {
            blocks.push(json!({
                "type": "actions",
                "elements": [
                    button("Approve", &opts.review_urls.approve, Some("primary")),
                    button("Deny", &opts.review_urls.deny, Some("danger")),
                    button("View request", &opts.review_urls.review, None),
                ],
            }));
        }
    }
    blocks.push(context(&format!("Request ID: {}", opts.request.id)));

    let message = SlackMessage {
        text: summary.clone(),
        blocks,
    };
    (summary, message)
}

pub struct RequestDetailMessageOpts<'a> {
    pub request: &'a Request,
    pub arguments: &'a [RenderedArgument],
    pub rule: &'a AccessRule,
    /// Markdown heading shown as the first block.
    pub heading: &'a str,
    /// Plain fallback text for notifications and clients without blocks.
    pub summary: &'a str,
}

/// Builds the message sent to the requester about their own request.
pub fn build_request_detail_message(opts: RequestDetailMessageOpts<'_>) -> SlackMessage {
    let mut fields = vec![format!("*Access:*\n{}", opts.rule.name)];
    fields.extend(request_fields(opts.request));

    let mut blocks = vec![section(opts.heading), fields_block(fields)];
    blocks.extend(argument_blocks(opts.arguments));
    blocks.push(context(&format!("Request ID: {}", opts.request.id)));

    SlackMessage {
        text: opts.summary.to_string(),
        blocks,
    }
}

/// Formats seconds as e.g. `1h 30m`; zero and sub-minute values stay in seconds.
pub fn format_duration(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    let mut parts = Vec::new();
    if h > 0 {
        parts.push(format!("{}h", h));
    }
    if m > 0 {
        parts.push(format!("{}m", m));
    }
    if s > 0 || parts.is_empty() {
        parts.push(format!("{}s", s));
    }
    parts.join(" ")
}

fn outcome(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Approved => "approved",
        RequestStatus::Declined => "declined",
        RequestStatus::Cancelled => "cancelled",
        RequestStatus::Pending => "pending",
    }
}

fn request_fields(request: &Request) -> Vec<String> {
    let when = match request.timing.start_time {
        Some(start) => start.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => "ASAP".to_string(),
    };
    let mut fields = vec![
        format!("*When:*\n{}", when),
        format!("*Duration:*\n{}", format_duration(request.timing.duration_seconds)),
        format!("*Status:*\n{}", request.status),
    ];
    if let Some(reason) = request.reason.as_deref().filter(|r| !r.is_empty()) {
        fields.push(format!("*Reason:*\n{}", reason));
    }
    fields
}

fn argument_blocks(arguments: &[RenderedArgument]) -> Vec<Value> {
    arguments
        .chunks(MAX_SECTION_FIELDS)
        .map(|chunk| {
            fields_block(
                chunk
                    .iter()
                    .map(|a| format!("*{}:*\n{}", a.title, a.label))
                    .collect(),
            )
        })
        .collect()
}

fn section(text: &str) -> Value {
    json!({ "type": "section", "text": { "type": "mrkdwn", "text": text } })
}

fn fields_block(fields: Vec<String>) -> Value {
    let fields: Vec<Value> = fields
        .into_iter()
        .map(|f| json!({ "type": "mrkdwn", "text": f }))
        .collect();
    json!({ "type": "section", "fields": fields })
}

fn context(text: &str) -> Value {
    json!({ "type": "context", "elements": [{ "type": "mrkdwn", "text": text }] })
}

fn button(label: &str, url: &str, style: Option<&str>) -> Value {
    let mut b = json!({
        "type": "button",
        "text": { "type": "plain_text", "text": label },
        "url": url,
    });
    if let Some(style) = style {
        b["style"] = json!(style);
    }
    b
}
