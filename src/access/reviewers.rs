use std::collections::BTreeSet;

use super::AccessError;
use crate::models::rule::Approval;
use crate::store::GroupLookup;

/// Expands a rule's approval settings into the set of human reviewers.
///
/// Approval groups are resolved through `groups`; any lookup failure fails the
/// whole resolution. The requester is always removed from the result, even
/// when listed directly or through a group.
pub async fn resolve_reviewers(
    approval: &Approval,
    requested_by: &str,
    groups: &dyn GroupLookup,
) -> Result<BTreeSet<String>, AccessError> {
    let mut reviewers: BTreeSet<String> = approval.users.iter().cloned().collect();

    for group_id in &approval.groups {
        let group = groups
            .get_group(group_id)
            .await
            .map_err(|source| AccessError::GroupLookup {
                group: group_id.clone(),
                source,
            })?;
        reviewers.extend(group.users);
    }

    reviewers.remove(requested_by);
    Ok(reviewers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::identity::Group;
    use crate::store::memory::MemoryStore;

    fn store_with_group(id: &str, users: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_group(Group {
            id: id.into(),
            users: users.iter().map(|u| u.to_string()).collect(),
        });
        store
    }

    #[tokio::test]
    async fn test_requester_removed_from_direct_users() {
        let approval = Approval {
            users: vec!["a".into(), "b".into()],
            groups: vec![],
        };
        let got = resolve_reviewers(&approval, "a", &MemoryStore::new())
            .await
            .unwrap();
        assert_eq!(got.into_iter().collect::<Vec<_>>(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_groups_expanded_and_deduplicated() {
        let store = store_with_group("admins", &["a", "b", "c"]);
        let approval = Approval {
            users: vec!["b".into()],
            groups: vec!["admins".into()],
        };
        let got = resolve_reviewers(&approval, "a", &store).await.unwrap();
        assert_eq!(got.into_iter().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_missing_group_fails_resolution() {
        let approval = Approval {
            users: vec!["b".into()],
            groups: vec!["ghost".into()],
        };
        let err = resolve_reviewers(&approval, "a", &MemoryStore::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::GroupLookup { ref group, .. } if group == "ghost"));
    }

    #[tokio::test]
    async fn test_only_requester_listed_yields_empty_set() {
        let store = store_with_group("self", &["a"]);
        let approval = Approval {
            users: vec!["a".into()],
            groups: vec!["self".into()],
        };
        assert!(resolve_reviewers(&approval, "a", &store).await.unwrap().is_empty());
    }
}
