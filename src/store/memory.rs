use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{GroupLookup, Store, StoreError, StoreResult};
use crate::models::identity::{Group, User};
use crate::models::provider::CachedProviderOption;
use crate::models::request::{Request, RequestStatus};
use crate::models::reviewer::{MessageHandle, Reviewer};
use crate::models::rule::AccessRule;

/// DashMap-backed store. Cheap to clone; clones share the same maps.
#[derive(Clone, Default)]
pub struct MemoryStore {
    /// rule id → versions, oldest first
    rules: Arc<DashMap<String, Vec<AccessRule>>>,
    users: Arc<DashMap<String, User>>,
    groups: Arc<DashMap<String, Group>>,
    requests: Arc<DashMap<String, Request>>,
    /// request id → reviewer records
    reviewers: Arc<DashMap<String, Vec<Reviewer>>>,
    /// provider id → cached options
    provider_options: Arc<DashMap<String, Vec<CachedProviderOption>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule version; it becomes the current version of that rule.
    pub fn insert_rule(&self, rule: AccessRule) {
        self.rules.entry(rule.id.clone()).or_default().push(rule);
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn insert_group(&self, group: Group) {
        self.groups.insert(group.id.clone(), group);
    }

    pub fn insert_provider_option(&self, option: CachedProviderOption) {
        self.provider_options
            .entry(option.provider_id.clone())
            .or_default()
            .push(option);
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn reviewer_count(&self) -> usize {
        self.reviewers.iter().map(|e| e.value().len()).sum()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_current_rule(&self, id: &str) -> StoreResult<AccessRule> {
        self.rules
            .get(id)
            .and_then(|versions| versions.last().cloned())
            .ok_or(StoreError::NotFound)
    }

    async fn get_rule_version(&self, id: &str, version: &str) -> StoreResult<AccessRule> {
        self.rules
            .get(id)
            .and_then(|versions| versions.iter().find(|r| r.version == version).cloned())
            .ok_or(StoreError::NotFound)
    }

    async fn get_user(&self, id: &str) -> StoreResult<User> {
        self.users
            .get(id)
            .map(|u| u.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn get_request(&self, id: &str) -> StoreResult<Request> {
        self.requests
            .get(id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn put_request(&self, request: &Request) -> StoreResult<()> {
        self.requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn update_request_if_status(
        &self,
        expected: RequestStatus,
        request: &Request,
    ) -> StoreResult<()> {
        // the entry guard holds the shard lock across compare and replace
        let mut stored = self.requests.get_mut(&request.id).ok_or(StoreError::NotFound)?;
        if stored.status != expected {
            return Err(StoreError::StatusConflict {
                current: stored.status,
            });
        }
        *stored = request.clone();
        Ok(())
    }

    async fn put_request_with_reviewers(
        &self,
        request: &Request,
        reviewers: &[Reviewer],
    ) -> StoreResult<()> {
        self.reviewers
            .insert(request.id.clone(), reviewers.to_vec());
        self.requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn list_request_reviewers(&self, request_id: &str) -> StoreResult<Vec<Reviewer>> {
        Ok(self
            .reviewers
            .get(request_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn set_reviewer_message(
        &self,
        request_id: &str,
        reviewer_id: &str,
        handle: MessageHandle,
    ) -> StoreResult<()> {
        let mut records = self.reviewers.get_mut(request_id).ok_or(StoreError::NotFound)?;
        let reviewer = records
            .iter_mut()
            .find(|r| r.reviewer_id == reviewer_id)
            .ok_or(StoreError::NotFound)?;
        reviewer.notifications.slack_message_id = Some(handle);
        Ok(())
    }

    async fn list_cached_provider_options(
        &self,
        provider_id: &str,
    ) -> StoreResult<Vec<CachedProviderOption>> {
        Ok(self
            .provider_options
            .get(provider_id)
            .map(|o| o.value().clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl GroupLookup for MemoryStore {
    async fn get_group(&self, id: &str) -> StoreResult<Group> {
        self.groups
            .get(id)
            .map(|g| g.value().clone())
            .ok_or(StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_current_rule_is_latest_version() {
        let store = MemoryStore::new();
        for version in ["v1", "v2"] {
            store.insert_rule(AccessRule {
                id: "rul_1".into(),
                version: version.into(),
                ..Default::default()
            });
        }
        assert_eq!(store.get_current_rule("rul_1").await.unwrap().version, "v2");
        assert_eq!(
            store.get_rule_version("rul_1", "v1").await.unwrap().version,
            "v1"
        );
        assert!(store.get_current_rule("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_set_reviewer_message_requires_record() {
        let store = MemoryStore::new();
        let handle = MessageHandle {
            channel: "D1".into(),
            ts: "1.0".into(),
        };
        let err = store
            .set_reviewer_message("req_1", "b", handle)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    fn pending(id: &str) -> Request {
        let now = chrono::Utc::now();
        Request {
            id: id.into(),
            requested_by: "a".into(),
            rule: "rul_1".into(),
            rule_version: "v1".into(),
            status: RequestStatus::Pending,
            reason: None,
            timing: Default::default(),
            approval_method: crate::models::request::ApprovalMethod::Reviewed,
            grant: None,
            selected_with: Default::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_conditional_update_rejects_stale_status() {
        let store = MemoryStore::new();
        let request = pending("req_1");
        store.put_request(&request).await.unwrap();

        let mut declined = request.clone();
        declined.status = RequestStatus::Declined;
        store
            .update_request_if_status(RequestStatus::Pending, &declined)
            .await
            .unwrap();

        let mut approved = request.clone();
        approved.status = RequestStatus::Approved;
        let err = store
            .update_request_if_status(RequestStatus::Pending, &approved)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::StatusConflict {
                current: RequestStatus::Declined
            }
        ));
        assert_eq!(
            store.get_request("req_1").await.unwrap().status,
            RequestStatus::Declined
        );

        let err = store
            .update_request_if_status(RequestStatus::Pending, &pending("req_missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_missing_reviewers_list_is_empty() {
        let store = MemoryStore::new();
        assert!(store.list_request_reviewers("req_x").await.unwrap().is_empty());
        assert!(store.list_cached_provider_options("p").await.unwrap().is_empty());
    }
}
