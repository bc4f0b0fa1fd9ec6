//! Request creation and the review/cancel state machine.
//!
//! Every hard failure (rule lookup, group membership, validation, grant,
//! persistence) is returned to the caller. Event publication happens after the
//! state change is stored and is best-effort.
//!
//! Decisions on one request are serialized in-process, and every status change
//! is written with a status-conditional store update, so a request leaves
//! PENDING exactly once. The grant backend is called before the request is
//! stored; if that write then fails, access exists with no request recording
//! it. Those grants are logged at error level with the request and grant ids
//! for manual revocation.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::policy;
use super::reviewers::resolve_reviewers;
use super::workflow::GrantWorkflow;
use super::AccessError;
use crate::clock::Clock;
use crate::events::EventPublisher;
use crate::models::event::RequestEvent;
use crate::models::identity::User;
use crate::models::request::{
    ApprovalMethod, InvalidTransition, Request, RequestStatus, RequestTiming,
};
use crate::models::reviewer::Reviewer;
use crate::store::{GroupLookup, Store, StoreError};

/// One access request to create.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateRequest {
    pub access_rule_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub timing: RequestTiming,
    /// Argument key → selected option value.
    #[serde(default)]
    pub with: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CreateRequestsOpts {
    pub user: User,
    pub create: Vec<CreateRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateRequestResult {
    pub request: Request,
    /// Empty for automatically approved requests.
    pub reviewers: Vec<Reviewer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    #[serde(alias = "approved")]
    Approve,
    #[serde(alias = "declined", alias = "deny")]
    Decline,
}

pub struct AccessService {
    store: Arc<dyn Store>,
    groups: Arc<dyn GroupLookup>,
    workflow: Arc<dyn GrantWorkflow>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    /// request id → lock held while a decision on that request is in flight
    decisions: DashMap<String, Arc<Mutex<()>>>,
}

impl AccessService {
    pub fn new(
        store: Arc<dyn Store>,
        groups: Arc<dyn GroupLookup>,
        workflow: Arc<dyn GrantWorkflow>,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            groups,
            workflow,
            events,
            clock,
            decisions: DashMap::new(),
        }
    }

    /// Creates each request independently; one result per input, in order.
    /// A failure on one item never affects the others.
    pub async fn create_requests(
        &self,
        opts: CreateRequestsOpts,
    ) -> Vec<Result<CreateRequestResult, AccessError>> {
        let mut results = Vec::with_capacity(opts.create.len());
        for create in &opts.create {
            results.push(self.create_request(&opts.user, create).await);
        }
        results
    }

    #[instrument(skip_all, fields(user.id = %user.id, rule.id = %create.access_rule_id))]
    pub async fn create_request(
        &self,
        user: &User,
        create: &CreateRequest,
    ) -> Result<CreateRequestResult, AccessError> {
        let rule = self
            .store
            .get_current_rule(&create.access_rule_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AccessError::RuleNotFound,
                other => AccessError::Store(other),
            })?;

        if !rule.allows_any_group(&user.groups) {
            return Err(AccessError::NoMatchingGroup);
        }

        policy::validate_timing(&create.timing, &rule)?;

        let cached = match self
            .store
            .list_cached_provider_options(&rule.target.provider_id)
            .await
        {
            Ok(options) => options,
            Err(e) => {
                warn!(provider.id = %rule.target.provider_id, error = %e, "failed to load cached provider options, labels fall back to values");
                Vec::new()
            }
        };
        let selected_with = policy::resolve_selections(&create.with, &rule.target, &cached)?;

        let reviewer_ids = resolve_reviewers(&rule.approval, &user.id, self.groups.as_ref()).await?;

        let now = self.clock.now();
        let mut request = Request {
            id: format!("req_{}", Uuid::new_v4().simple()),
            requested_by: user.id.clone(),
            rule: rule.id.clone(),
            rule_version: rule.version.clone(),
            status: RequestStatus::Pending,
            reason: create.reason.clone(),
            timing: create.timing.clone(),
            approval_method: ApprovalMethod::Reviewed,
            grant: None,
            selected_with,
            created_at: now,
            updated_at: now,
        };

        let reviewers = if reviewer_ids.is_empty() {
            request.approval_method = ApprovalMethod::Automatic;
            let grant = self
                .workflow
                .grant(&request, &rule)
                .await
                .map_err(AccessError::Grant)?;
            request.status = RequestStatus::Approved;
            request.grant = Some(grant);
            if let Err(e) = self.store.put_request(&request).await {
                log_orphaned_grant(&request, &e);
                return Err(e.into());
            }
            info!(request.id = %request.id, "request automatically approved");
            Vec::new()
        } else {
            let reviewers: Vec<Reviewer> = reviewer_ids
                .iter()
                .map(|id| Reviewer::new(id.as_str(), &request))
                .collect();
            self.store
                .put_request_with_reviewers(&request, &reviewers)
                .await?;
            info!(
                request.id = %request.id,
                reviewers = reviewers.len(),
                "request pending review"
            );
            reviewers
        };

        self.publish(RequestEvent::created(request.clone())).await;

        Ok(CreateRequestResult { request, reviewers })
    }

    /// Applies a reviewer's decision to a pending request.
    ///
    /// Approval provisions the grant first; if that fails the request stays
    /// pending and nothing is written. Of several concurrent decisions exactly
    /// one succeeds; the others fail with [`AccessError::InvalidTransition`].
    #[instrument(skip(self, reviewer), fields(reviewer.id = %reviewer.id))]
    pub async fn review_request(
        &self,
        reviewer: &User,
        request_id: &str,
        decision: ReviewDecision,
    ) -> Result<Request, AccessError> {
        let gate = self.decision_gate(request_id);
        let result = {
            let _held = gate.lock().await;
            self.decide(reviewer, request_id, decision).await
        };
        drop(gate);
        self.release_decision_gate(request_id);

        let request = result?;
        let event = match decision {
            ReviewDecision::Approve => RequestEvent::approved(request.clone(), &reviewer.id),
            ReviewDecision::Decline => RequestEvent::declined(request.clone(), &reviewer.id),
        };
        self.publish(event).await;
        Ok(request)
    }

    async fn decide(
        &self,
        reviewer: &User,
        request_id: &str,
        decision: ReviewDecision,
    ) -> Result<Request, AccessError> {
        let mut request = self.get_request(request_id).await?;

        let reviewers = self.store.list_request_reviewers(request_id).await?;
        if !reviewers.iter().any(|r| r.reviewer_id == reviewer.id) {
            return Err(AccessError::NotAReviewer);
        }

        let next = match decision {
            ReviewDecision::Approve => RequestStatus::Approved,
            ReviewDecision::Decline => RequestStatus::Declined,
        };
        let from = request.status;
        request.transition(next, self.clock.now())?;

        if next == RequestStatus::Approved {
            let rule = self
                .store
                .get_rule_version(&request.rule, &request.rule_version)
                .await
                .map_err(|e| match e {
                    StoreError::NotFound => AccessError::RuleNotFound,
                    other => AccessError::Store(other),
                })?;
            let grant = self
                .workflow
                .grant(&request, &rule)
                .await
                .map_err(AccessError::Grant)?;
            request.grant = Some(grant);
        }

        if let Err(e) = self.store.update_request_if_status(from, &request).await {
            if request.grant.is_some() {
                log_orphaned_grant(&request, &e);
            }
            return Err(conflict_or_store(e, next));
        }
        info!(request.id = %request.id, status = %request.status, "request reviewed");
        Ok(request)
    }

    /// Withdraws a pending request. Only the requester may cancel.
    #[instrument(skip(self, user), fields(user.id = %user.id))]
    pub async fn cancel_request(&self, user: &User, request_id: &str) -> Result<Request, AccessError> {
        let gate = self.decision_gate(request_id);
        let result = {
            let _held = gate.lock().await;
            self.withdraw(user, request_id).await
        };
        drop(gate);
        self.release_decision_gate(request_id);

        let request = result?;
        self.publish(RequestEvent::cancelled(request.clone())).await;
        Ok(request)
    }

    async fn withdraw(&self, user: &User, request_id: &str) -> Result<Request, AccessError> {
        let mut request = self.get_request(request_id).await?;
        if request.requested_by != user.id {
            return Err(AccessError::NotRequester);
        }

        let from = request.status;
        request.transition(RequestStatus::Cancelled, self.clock.now())?;
        self.store
            .update_request_if_status(from, &request)
            .await
            .map_err(|e| conflict_or_store(e, RequestStatus::Cancelled))?;
        info!(request.id = %request.id, "request cancelled");
        Ok(request)
    }

    fn decision_gate(&self, request_id: &str) -> Arc<Mutex<()>> {
        self.decisions
            .entry(request_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the request's lock once nobody else holds or awaits it.
    fn release_decision_gate(&self, request_id: &str) {
        self.decisions
            .remove_if(request_id, |_, gate| Arc::strong_count(gate) == 1);
    }

    async fn get_request(&self, id: &str) -> Result<Request, AccessError> {
        self.store.get_request(id).await.map_err(|e| match e {
            StoreError::NotFound => AccessError::RequestNotFound,
            other => AccessError::Store(other),
        })
    }

    async fn publish(&self, event: RequestEvent) {
        let event_type = event.event_type;
        let request_id = event.request.id.clone();
        if let Err(e) = self.events.put(event).await {
            warn!(
                request.id = %request_id,
                event_type = event_type.as_str(),
                error = %e,
                "failed to publish request event"
            );
        }
    }
}

fn conflict_or_store(e: StoreError, to: RequestStatus) -> AccessError {
    match e {
        StoreError::StatusConflict { current } => InvalidTransition { from: current, to }.into(),
        StoreError::NotFound => AccessError::RequestNotFound,
        other => AccessError::Store(other),
    }
}

fn log_orphaned_grant(request: &Request, e: &StoreError) {
    let grant_id = request.grant.as_ref().map(|g| g.id.as_str()).unwrap_or_default();
    error!(
        request.id = %request.id,
        grant.id = grant_id,
        error = %e,
        "access was granted but the request could not be stored; revoke the grant manually"
    );
}
