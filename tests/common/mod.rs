//! Hand-written test doubles for the capability traits.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use approvals::access::service::AccessService;
use approvals::access::workflow::GrantWorkflow;
use approvals::clock::MockClock;
use approvals::events::EventPublisher;
use approvals::models::event::RequestEvent;
use approvals::models::identity::{Group, User};
use approvals::models::provider::CachedProviderOption;
use approvals::models::request::{Grant, Request, RequestStatus};
use approvals::models::reviewer::{MessageHandle, Reviewer};
use approvals::models::rule::{AccessRule, Approval, TimeConstraints};
use approvals::notification::slack::{MessagingTransport, SlackMessage};
use approvals::notification::webhook::WebhookSender;
use approvals::store::memory::MemoryStore;
use approvals::store::{GroupLookup, Store, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

pub fn user(id: &str, groups: &[&str]) -> User {
    User {
        id: id.into(),
        email: format!("{}@example.com", id),
        groups: groups.iter().map(|g| g.to_string()).collect(),
    }
}

pub fn rule(id: &str, groups: &[&str], approval: Approval, max_secs: u64) -> AccessRule {
    AccessRule {
        id: id.into(),
        version: "v1".into(),
        name: format!("Rule {}", id),
        groups: groups.iter().map(|g| g.to_string()).collect(),
        approval,
        time_constraints: TimeConstraints {
            max_duration_seconds: max_secs,
        },
        ..Default::default()
    }
}

pub fn approvers(users: &[&str], groups: &[&str]) -> Approval {
    Approval {
        users: users.iter().map(|u| u.to_string()).collect(),
        groups: groups.iter().map(|g| g.to_string()).collect(),
    }
}

pub fn group(id: &str, users: &[&str]) -> Group {
    Group {
        id: id.into(),
        users: users.iter().map(|u| u.to_string()).collect(),
    }
}

// ── Grant workflow ───────────────────────────────────────────

#[derive(Default)]
pub struct FakeWorkflow {
    pub fail: bool,
    /// How long each grant takes.
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl FakeWorkflow {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GrantWorkflow for FakeWorkflow {
    async fn grant(&self, request: &Request, rule: &AccessRule) -> anyhow::Result<Grant> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            anyhow::bail!("provisioner unavailable");
        }
        let (start, end) = request.timing.window(request.created_at);
        Ok(Grant {
            id: format!("gra_{}", request.id),
            provider: rule.target.provider_id.clone(),
            subject: request.requested_by.clone(),
            start: Some(start),
            end: Some(end),
        })
    }
}

// ── Event publisher ──────────────────────────────────────────

#[derive(Default)]
pub struct RecordingPublisher {
    pub fail: bool,
    pub events: Mutex<Vec<RequestEvent>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<RequestEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn put(&self, event: RequestEvent) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("event bus down");
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

// ── Chat transport ───────────────────────────────────────────

/// Resolves `x@example.com` to chat id `U-x`. Sends to ids listed in
/// `fail_send` and lookups of emails in `fail_lookup` fail.
#[derive(Default)]
pub struct FakeSlack {
    pub fail_lookup: HashSet<String>,
    pub fail_send: HashSet<String>,
    pub fail_update: bool,
    pub sent: Mutex<Vec<(String, SlackMessage)>>,
    pub scheduled: Mutex<Vec<(String, SlackMessage, DateTime<Utc>)>>,
    pub updated: Mutex<Vec<(MessageHandle, SlackMessage)>>,
    pub counter: AtomicUsize,
}

impl FakeSlack {
    pub fn sent_to(&self) -> Vec<String> {
        let mut to: Vec<String> = self.sent.lock().unwrap().iter().map(|(c, _)| c.clone()).collect();
        to.sort();
        to
    }

    pub fn sent_text_to(&self, channel: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, m)| m.text.clone())
            .collect()
    }
}

#[async_trait]
impl MessagingTransport for FakeSlack {
    async fn lookup_user_by_email(&self, email: &str) -> anyhow::Result<String> {
        if self.fail_lookup.contains(email) {
            anyhow::bail!("users_not_found");
        }
        let local = email.split('@').next().unwrap_or(email);
        Ok(format!("U-{}", local))
    }

    async fn send_message(&self, channel: &str, message: &SlackMessage) -> anyhow::Result<MessageHandle> {
        if self.fail_send.contains(channel) {
            anyhow::bail!("channel_not_found");
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .unwrap()
            .push((channel.to_string(), message.clone()));
        Ok(MessageHandle {
            channel: format!("D-{}", channel),
            ts: format!("1700000000.{:06}", n),
        })
    }

    async fn schedule_message(
        &self,
        channel: &str,
        message: &SlackMessage,
        post_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.scheduled
            .lock()
            .unwrap()
            .push((channel.to_string(), message.clone(), post_at));
        Ok(())
    }

    async fn update_message(&self, handle: &MessageHandle, message: &SlackMessage) -> anyhow::Result<()> {
        if self.fail_update {
            anyhow::bail!("message_not_found");
        }
        self.updated
            .lock()
            .unwrap()
            .push((handle.clone(), message.clone()));
        Ok(())
    }
}

// ── Webhook ──────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeWebhook {
    pub fail: bool,
    pub messages: Mutex<Vec<(Vec<Value>, String)>>,
}

impl FakeWebhook {
    pub fn summaries(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s)| s.clone())
            .collect()
    }
}

#[async_trait]
impl WebhookSender for FakeWebhook {
    async fn send_webhook_message(&self, blocks: &[Value], summary: &str) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("webhook returned 500");
        }
        self.messages
            .lock()
            .unwrap()
            .push((blocks.to_vec(), summary.to_string()));
        Ok(())
    }

    fn describe(&self) -> String {
        "fake://webhook".into()
    }
}

// ── Service harness ──────────────────────────────────────────

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub workflow: Arc<FakeWorkflow>,
    pub events: Arc<RecordingPublisher>,
    pub clock: Arc<MockClock>,
    pub service: AccessService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeWorkflow::default(), RecordingPublisher::default())
    }

    pub fn with(workflow: FakeWorkflow, events: RecordingPublisher) -> Self {
        let store = Arc::new(MemoryStore::new());
        let workflow = Arc::new(workflow);
        let events = Arc::new(events);
        let clock = Arc::new(MockClock::new(t0()));
        let service = AccessService::new(
            store.clone(),
            store.clone(),
            workflow.clone(),
            events.clone(),
            clock.clone(),
        );
        Self {
            store,
            workflow,
            events,
            clock,
            service,
        }
    }
}

// ── Store with failing writes ────────────────────────────────

/// Delegates to a [`MemoryStore`] but rejects request writes while
/// `fail_writes` is set.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_writes: std::sync::atomic::AtomicBool,
}

impl FlakyStore {
    pub fn set_failing(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!("disk full")));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn get_current_rule(&self, id: &str) -> StoreResult<AccessRule> {
        self.inner.get_current_rule(id).await
    }

    async fn get_rule_version(&self, id: &str, version: &str) -> StoreResult<AccessRule> {
        self.inner.get_rule_version(id, version).await
    }

    async fn get_user(&self, id: &str) -> StoreResult<User> {
        self.inner.get_user(id).await
    }

    async fn get_request(&self, id: &str) -> StoreResult<Request> {
        self.inner.get_request(id).await
    }

    async fn put_request(&self, request: &Request) -> StoreResult<()> {
        self.check()?;
        self.inner.put_request(request).await
    }

    async fn update_request_if_status(
        &self,
        expected: RequestStatus,
        request: &Request,
    ) -> StoreResult<()> {
        self.check()?;
        self.inner.update_request_if_status(expected, request).await
    }

    async fn put_request_with_reviewers(
        &self,
        request: &Request,
        reviewers: &[Reviewer],
    ) -> StoreResult<()> {
        self.check()?;
        self.inner.put_request_with_reviewers(request, reviewers).await
    }

    async fn list_request_reviewers(&self, request_id: &str) -> StoreResult<Vec<Reviewer>> {
        self.inner.list_request_reviewers(request_id).await
    }

    async fn set_reviewer_message(
        &self,
        request_id: &str,
        reviewer_id: &str,
        handle: MessageHandle,
    ) -> StoreResult<()> {
        self.inner
            .set_reviewer_message(request_id, reviewer_id, handle)
            .await
    }

    async fn list_cached_provider_options(
        &self,
        provider_id: &str,
    ) -> StoreResult<Vec<CachedProviderOption>> {
        self.inner.list_cached_provider_options(provider_id).await
    }
}

#[async_trait]
impl GroupLookup for FlakyStore {
    async fn get_group(&self, id: &str) -> StoreResult<Group> {
        self.inner.get_group(id).await
    }
}
