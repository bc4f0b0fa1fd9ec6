use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A policy template describing who may request access to a target, who
/// reviews those requests and for how long access may be held.
///
/// Rules are immutable per version; requests reference `id` + `version`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessRule {
    pub id: String,
    #[serde(default)]
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Groups whose members may request this rule.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub approval: Approval,
    #[serde(default)]
    pub time_constraints: TimeConstraints,
    #[serde(default)]
    pub target: Target,
    /// Optional shared channel for review messages.
    #[serde(default)]
    pub broadcast: Option<BroadcastChannel>,
}

impl AccessRule {
    /// True when any of `groups` is eligible to request this rule.
    pub fn allows_any_group(&self, groups: &[String]) -> bool {
        groups.iter().any(|g| self.groups.contains(g))
    }

    /// Returns the broadcast channel and mention tag, if configured.
    pub fn broadcast_info(&self) -> (Option<&str>, Option<&str>) {
        match &self.broadcast {
            Some(b) => (Some(b.channel.as_str()), b.mention.as_deref()),
            None => (None, None),
        }
    }
}

/// Reviewer specification. Empty on both sides means no approval required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Approval {
    pub fn is_required(&self) -> bool {
        !self.users.is_empty() || !self.groups.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeConstraints {
    pub max_duration_seconds: u64,
}

/// The provisioning backend a rule grants access against, plus its arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub provider_id: String,
    /// Short provider type used to look up the argument schema (e.g. `aws-sso`).
    #[serde(default)]
    pub provider_type: String,
    /// Fixed argument values applied to every request.
    #[serde(default)]
    pub with: BTreeMap<String, String>,
    /// Arguments the requester picks from a fixed list of values.
    #[serde(default)]
    pub with_selectable: BTreeMap<String, Vec<String>>,
    /// Arguments whose options come from provider groups: key → group → values.
    #[serde(default)]
    pub with_argument_group_options: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl Target {
    /// Every argument key the requester is expected to select.
    pub fn selectable_keys(&self) -> BTreeSet<&str> {
        self.with_selectable
            .keys()
            .chain(self.with_argument_group_options.keys())
            .map(String::as_str)
            .collect()
    }

    /// Whether `value` is an allowed option for the selectable argument `key`.
    /// `None` means `key` is not selectable at all.
    pub fn allows_option(&self, key: &str, value: &str) -> Option<bool> {
        let listed = self.with_selectable.get(key);
        let grouped = self.with_argument_group_options.get(key);
        if listed.is_none() && grouped.is_none() {
            return None;
        }
        let in_list = listed.is_some_and(|vals| vals.iter().any(|v| v == value));
        let in_group = grouped.is_some_and(|groups| {
            groups.values().any(|vals| vals.iter().any(|v| v == value))
        });
        Some(in_list || in_group)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastChannel {
    pub channel: String,
    /// Mention prepended to the review message, e.g. `@platform-oncall`.
    #[serde(default)]
    pub mention: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approval_required_only_when_reviewers_listed() {
        assert!(!Approval::default().is_required());
        assert!(Approval { users: vec!["u".into()], groups: vec![] }.is_required());
        assert!(Approval { users: vec![], groups: vec!["g".into()] }.is_required());
    }

    #[test]
    fn test_allows_option_checks_list_and_groups() {
        let mut target = Target::default();
        target
            .with_selectable
            .insert("accountId".into(), vec!["123".into(), "456".into()]);
        let mut groups = BTreeMap::new();
        groups.insert("ou-prod".into(), vec!["789".into()]);
        target
            .with_argument_group_options
            .insert("accountId".into(), groups);

        assert_eq!(target.allows_option("accountId", "123"), Some(true));
        assert_eq!(target.allows_option("accountId", "789"), Some(true));
        assert_eq!(target.allows_option("accountId", "000"), Some(false));
        assert_eq!(target.allows_option("permissionSetArn", "x"), None);
    }

    #[test]
    fn test_allows_any_group() {
        let rule = AccessRule {
            groups: vec!["eng".into(), "ops".into()],
            ..Default::default()
        };
        assert!(rule.allows_any_group(&["sales".into(), "ops".into()]));
        assert!(!rule.allows_any_group(&["sales".into()]));
        assert!(!rule.allows_any_group(&[]));
    }
}
