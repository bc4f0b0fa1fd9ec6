//! Persistence capabilities consumed by the request engine and notifier.
//!
//! Storage mechanics live behind these traits; the
//! in-memory implementation in [`memory`] backs the binary and the tests.

pub mod memory;

use async_trait::async_trait;

use crate::models::identity::{Group, User};
use crate::models::provider::CachedProviderOption;
use crate::models::request::{Request, RequestStatus};
use crate::models::reviewer::{MessageHandle, Reviewer};
use crate::models::rule::AccessRule;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("item not found")]
    NotFound,

    /// A conditional write found the record in a different status.
    #[error("request is {current}, not the expected status")]
    StatusConflict { current: RequestStatus },

    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Latest version of a rule.
    async fn get_current_rule(&self, id: &str) -> StoreResult<AccessRule>;

    /// A specific, immutable rule version.
    async fn get_rule_version(&self, id: &str, version: &str) -> StoreResult<AccessRule>;

    async fn get_user(&self, id: &str) -> StoreResult<User>;

    async fn get_request(&self, id: &str) -> StoreResult<Request>;

    async fn put_request(&self, request: &Request) -> StoreResult<()>;

    /// Replaces a stored request only while its current status is still
    /// `expected`; otherwise fails with [`StoreError::StatusConflict`].
    async fn update_request_if_status(
        &self,
        expected: RequestStatus,
        request: &Request,
    ) -> StoreResult<()>;

    /// Writes a request and its reviewer records as a single batch: either all
    /// records are stored or none are.
    async fn put_request_with_reviewers(
        &self,
        request: &Request,
        reviewers: &[Reviewer],
    ) -> StoreResult<()>;

    /// Reviewer records for a request. A request without reviewers yields an
    /// empty list, not `NotFound`.
    async fn list_request_reviewers(&self, request_id: &str) -> StoreResult<Vec<Reviewer>>;

    /// Records the message handle on a single reviewer, leaving the rest of the
    /// record untouched.
    async fn set_reviewer_message(
        &self,
        request_id: &str,
        reviewer_id: &str,
        handle: MessageHandle,
    ) -> StoreResult<()>;

    /// Cached argument options for a provider. Empty when nothing is cached.
    async fn list_cached_provider_options(
        &self,
        provider_id: &str,
    ) -> StoreResult<Vec<CachedProviderOption>>;
}

/// Resolves group membership for approval-group expansion.
#[async_trait]
pub trait GroupLookup: Send + Sync {
    async fn get_group(&self, id: &str) -> StoreResult<Group>;
}
