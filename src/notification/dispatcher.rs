//! Turns request lifecycle events into chat and webhook notifications.
//!
//! Only failures to load the event's rule or requester are returned; every
//! delivery failure is logged with the request and reviewer ids and skipped.
//! A user's access is never blocked by a message that failed to send.
//!
//! Reviewer message handles are written one field at a time with no version
//! check, so an edit racing a still-running fan-out for the same reviewer may
//! miss that reviewer's message. Events for one request are handled in order
//! by [`crate::events::run_consumer`], which keeps that window closed for the
//! in-process consumer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::arguments::{ArgumentRenderer, RenderedArgument};
use super::messages::{
    build_request_detail_message, build_request_review_message, RequestDetailMessageOpts,
    RequestMessageOpts, ReviewUrls,
};
use super::slack::{MessagingTransport, SlackMessage};
use super::webhook::WebhookSender;
use crate::clock::Clock;
use crate::models::event::{RequestEvent, RequestEventType};
use crate::models::identity::User;
use crate::models::request::{ApprovalMethod, Request, RequestStatus};
use crate::models::reviewer::{MessageHandle, Reviewer};
use crate::models::rule::AccessRule;
use crate::store::Store;

/// Delay before a broadcast-channel message is posted.
const CHANNEL_SCHEDULE_DELAY_SECS: i64 = 10;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Upper bound on reviewer deliveries in flight for one event.
    pub max_concurrent_deliveries: usize,
    /// Deadline applied to each external messaging call.
    pub delivery_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent_deliveries: 16,
            delivery_timeout: Duration::from_secs(10),
        }
    }
}

pub struct NotificationDispatcher {
    store: Arc<dyn Store>,
    slack: Option<Arc<dyn MessagingTransport>>,
    webhooks: Vec<Arc<dyn WebhookSender>>,
    renderer: Arc<dyn ArgumentRenderer>,
    clock: Arc<dyn Clock>,
    frontend_url: Url,
    settings: DispatchSettings,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        renderer: Arc<dyn ArgumentRenderer>,
        clock: Arc<dyn Clock>,
        frontend_url: Url,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            slack: None,
            webhooks: Vec::new(),
            renderer,
            clock,
            frontend_url,
            settings,
        }
    }

    pub fn with_slack(mut self, slack: Arc<dyn MessagingTransport>) -> Self {
        self.slack = Some(slack);
        self
    }

    pub fn with_webhooks(mut self, webhooks: Vec<Arc<dyn WebhookSender>>) -> Self {
        self.webhooks = webhooks;
        self
    }

    #[instrument(skip_all, fields(request.id = %event.request.id, event_type = event.event_type.as_str()))]
    pub async fn handle_event(&self, event: &RequestEvent) -> anyhow::Result<()> {
        let request = &event.request;
        let rule = self
            .store
            .get_rule_version(&request.rule, &request.rule_version)
            .await
            .context("getting access rule")?;
        let requestor = self
            .store
            .get_user(&request.requested_by)
            .await
            .context("getting requestor")?;

        match event.event_type {
            RequestEventType::Created => {
                if request.approval_method == ApprovalMethod::Automatic {
                    let heading = format!(
                        ":white_check_mark: Your request to access *{}* has been automatically approved.",
                        rule.name
                    );
                    let summary = format!(
                        "Your request to access {} has been automatically approved.",
                        rule.name
                    );
                    self.send_request_details(request, &rule, &requestor, &heading, &summary)
                        .await;
                } else {
                    self.notify_review_required(request, &rule, &requestor).await?;
                }
            }
            RequestEventType::Approved => {
                let heading = format!(
                    ":white_check_mark: Your request to access *{}* has been approved.",
                    rule.name
                );
                let summary = format!("Your request to access {} has been approved.", rule.name);
                self.send_request_details(request, &rule, &requestor, &heading, &summary)
                    .await;
                self.send_updates_for_request(event, &rule, &requestor).await;
            }
            RequestEventType::Declined => {
                let msg = format!("Your request to access *{}* has been declined.", rule.name);
                let fallback = format!("Your request to access {} has been declined.", rule.name);
                self.send_direct_message(&requestor, &SlackMessage::markdown(&msg, &fallback))
                    .await;
                self.send_updates_for_request(event, &rule, &requestor).await;
            }
            // the requester cancelled, so only the reviewers hear about it
            RequestEventType::Cancelled => {
                self.send_updates_for_request(event, &rule, &requestor).await;
            }
        }
        Ok(())
    }

    async fn notify_review_required(
        &self,
        request: &Request,
        rule: &AccessRule,
        requestor: &User,
    ) -> anyhow::Result<()> {
        let msg = format!(
            "Your request to access *{}* requires approval. We've notified the approvers and will let you know once your request has been reviewed.",
            rule.name
        );
        let fallback = format!("Your request to access {} requires approval.", rule.name);
        self.send_direct_message(requestor, &SlackMessage::markdown(&msg, &fallback))
            .await;

        let review_urls =
            ReviewUrls::new(&self.frontend_url, &request.id).context("building review URL")?;
        let arguments = self.render_arguments(request, rule).await;

        let (summary, message) = build_request_review_message(RequestMessageOpts {
            request,
            arguments: &arguments,
            rule,
            requestor_slack_id: None,
            requestor_email: &requestor.email,
            review_urls: &review_urls,
            tagged_user: None,
            was_reviewed: false,
            reviewer: None,
            is_webhook: true,
        });
        self.send_webhooks(&request.id, &message, &summary).await;

        let Some(slack) = self.slack.as_deref() else {
            return Ok(());
        };

        let requestor_slack_id = self.lookup_slack_id(slack, requestor).await;
        let (channel, tag) = rule.broadcast_info();
        let (summary, message) = build_request_review_message(RequestMessageOpts {
            request,
            arguments: &arguments,
            rule,
            requestor_slack_id: requestor_slack_id.as_deref(),
            requestor_email: &requestor.email,
            review_urls: &review_urls,
            tagged_user: tag,
            was_reviewed: false,
            reviewer: None,
            is_webhook: false,
        });

        match channel {
            Some(channel) => {
                // chat.postMessage needs a channel id; scheduling accepts names
                let post_at = self.clock.now() + chrono::Duration::seconds(CHANNEL_SCHEDULE_DELAY_SECS);
                info!(channel, tag = tag.unwrap_or_default(), "sending review message to channel");
                if let Err(e) = self
                    .bounded(slack.schedule_message(channel, &message, post_at))
                    .await
                {
                    warn!(channel, error = %e, "failed to send review message to channel");
                }
            }
            None => {
                self.notify_all_reviewers(slack, request, &message, &summary)
                    .await
                    .context("getting reviewers")?;
            }
        }
        Ok(())
    }

    /// Sends the review message to every reviewer of `request` concurrently,
    /// at most `max_concurrent_deliveries` at a time, and waits for all of
    /// them. Each reviewer succeeds or fails on its own.
    pub async fn notify_all_reviewers(
        &self,
        slack: &dyn MessagingTransport,
        request: &Request,
        message: &SlackMessage,
        summary: &str,
    ) -> anyhow::Result<()> {
        let reviewers = self.store.list_request_reviewers(&request.id).await?;
        info!(reviewers = reviewers.len(), "messaging reviewers");

        let recipients = reviewers.into_iter().filter(|r| {
            if r.reviewer_id == request.requested_by {
                debug!(user.id = %r.reviewer_id, "skipping review message to requestor");
                return false;
            }
            true
        });

        stream::iter(recipients)
            .for_each_concurrent(self.settings.max_concurrent_deliveries.max(1), |reviewer| async move {
                match self.deliver_to_reviewer(slack, &reviewer, message).await {
                    Ok(handle) => {
                        debug!(reviewer.id = %reviewer.reviewer_id, ts = %handle.ts, "stored review message handle");
                    }
                    Err(e) => {
                        error!(
                            request.id = %request.id,
                            reviewer.id = %reviewer.reviewer_id,
                            summary,
                            error = %e,
                            "failed to deliver review message"
                        );
                    }
                }
            })
            .await;
        Ok(())
    }

    async fn deliver_to_reviewer(
        &self,
        slack: &dyn MessagingTransport,
        reviewer: &Reviewer,
        message: &SlackMessage,
    ) -> anyhow::Result<MessageHandle> {
        let user = self
            .store
            .get_user(&reviewer.reviewer_id)
            .await
            .context("fetching reviewer")?;
        let slack_id = self
            .bounded(slack.lookup_user_by_email(&user.email))
            .await
            .context("resolving reviewer chat identity")?;
        let handle = self
            .bounded(slack.send_message(&slack_id, message))
            .await
            .context("sending review message")?;

        // not time-bounded: once sent, the handle must be recorded
        self.store
            .set_reviewer_message(&reviewer.request.id, &reviewer.reviewer_id, handle.clone())
            .await
            .context("storing message handle")?;
        Ok(handle)
    }

    /// Edits every reviewer's stored message to show the final decision, then
    /// posts the outcome to the webhooks.
    async fn send_updates_for_request(&self, event: &RequestEvent, rule: &AccessRule, requestor: &User) {
        let request = &event.request;
        let reviewers = match self.store.list_request_reviewers(&request.id).await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "failed to fetch reviewers for request");
                return;
            }
        };

        let decided_by = match &event.reviewer_id {
            Some(id) => match self.store.get_user(id).await {
                Ok(user) => Some(user),
                Err(e) if request.status != RequestStatus::Cancelled => {
                    error!(reviewer.id = %id, error = %e, "failed to fetch reviewer for request which wasn't cancelled");
                    return;
                }
                Err(_) => None,
            },
            None => None,
        };

        let review_urls = match ReviewUrls::new(&self.frontend_url, &request.id) {
            Ok(u) => u,
            Err(e) => {
                error!(error = %e, "building review URL");
                return;
            }
        };
        let arguments = self.render_arguments(request, rule).await;

        if let Some(slack) = self.slack.as_deref() {
            let requestor_slack_id = self.lookup_slack_id(slack, requestor).await;
            let (_, message) = build_request_review_message(RequestMessageOpts {
                request,
                arguments: &arguments,
                rule,
                requestor_slack_id: requestor_slack_id.as_deref(),
                requestor_email: &requestor.email,
                review_urls: &review_urls,
                tagged_user: None,
                was_reviewed: true,
                reviewer: decided_by.as_ref(),
                is_webhook: false,
            });

            let with_handles = reviewers
                .iter()
                .filter_map(|r| r.notifications.slack_message_id.as_ref().map(|h| (r, h)));
            let message = &message;
            stream::iter(with_handles)
                .for_each_concurrent(self.settings.max_concurrent_deliveries.max(1), |(reviewer, handle)| async move {
                    if let Err(e) = self.bounded(slack.update_message(handle, message)).await {
                        error!(
                            request.id = %request.id,
                            reviewer.id = %reviewer.reviewer_id,
                            error = %e,
                            "failed to update review message"
                        );
                    }
                })
                .await;
        }

        let (summary, message) = build_request_review_message(RequestMessageOpts {
            request,
            arguments: &arguments,
            rule,
            requestor_slack_id: None,
            requestor_email: &requestor.email,
            review_urls: &review_urls,
            tagged_user: None,
            was_reviewed: true,
            reviewer: decided_by.as_ref(),
            is_webhook: true,
        });
        self.send_webhooks(&request.id, &message, &summary).await;
    }

    /// Sends the requester a summary of their request and mirrors it to the webhooks.
    async fn send_request_details(
        &self,
        request: &Request,
        rule: &AccessRule,
        requestor: &User,
        heading: &str,
        summary: &str,
    ) {
        if self.slack.is_none() && self.webhooks.is_empty() {
            return;
        }
        let arguments = self.render_arguments(request, rule).await;

        let message = build_request_detail_message(RequestDetailMessageOpts {
            request,
            arguments: &arguments,
            rule,
            heading,
            summary,
        });
        self.send_direct_message(requestor, &message).await;

        if self.webhooks.is_empty() {
            return;
        }
        let (heading, summary) = if request.approval_method == ApprovalMethod::Automatic {
            (
                format!(
                    ":white_check_mark: {}'s request to access *{}* has been automatically approved.",
                    requestor.email, rule.name
                ),
                format!(
                    "{}'s request to access {} has been automatically approved.",
                    requestor.email, rule.name
                ),
            )
        } else {
            (heading.to_string(), summary.to_string())
        };
        let message = build_request_detail_message(RequestDetailMessageOpts {
            request,
            arguments: &arguments,
            rule,
            heading: &heading,
            summary: &summary,
        });
        self.send_webhooks(&request.id, &message, &summary).await;
    }

    /// Direct message to a user; a no-op without chat configured.
    async fn send_direct_message(&self, user: &User, message: &SlackMessage) {
        let Some(slack) = self.slack.as_deref() else {
            return;
        };
        let result = async {
            let slack_id = self.bounded(slack.lookup_user_by_email(&user.email)).await?;
            self.bounded(slack.send_message(&slack_id, message)).await
        }
        .await;
        if let Err(e) = result {
            error!(user.id = %user.id, email = %user.email, error = %e, "failed to send direct message");
        }
    }

    async fn send_webhooks(&self, request_id: &str, message: &SlackMessage, summary: &str) {
        let sends = self.webhooks.iter().map(|webhook| async move {
            if let Err(e) = self
                .bounded(webhook.send_webhook_message(&message.blocks, summary))
                .await
            {
                error!(
                    request.id = %request_id,
                    webhook = %webhook.describe(),
                    error = %e,
                    "failed to send message to webhook"
                );
            }
        });
        join_all(sends).await;
    }

    async fn lookup_slack_id(&self, slack: &dyn MessagingTransport, user: &User) -> Option<String> {
        match self.bounded(slack.lookup_user_by_email(&user.email)).await {
            Ok(id) => Some(id),
            Err(e) => {
                info!(user.id = %user.id, error = %e, "couldn't resolve chat user for requestor, falling back to email");
                None
            }
        }
    }

    async fn render_arguments(&self, request: &Request, rule: &AccessRule) -> Vec<RenderedArgument> {
        match self.renderer.render(request, rule).await {
            Ok(args) => args,
            Err(e) => {
                error!(error = %e, "failed to render request arguments, leaving them out of the message");
                Vec::new()
            }
        }
    }

    async fn bounded<T>(&self, fut: impl Future<Output = anyhow::Result<T>>) -> anyhow::Result<T> {
        let limit = self.settings.delivery_timeout;
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| anyhow::anyhow!("timed out after {:?}", limit))?
    }
}
