use serde::{Deserialize, Serialize};

use super::request::Request;

/// A user assigned to approve or decline a specific request.
///
/// One record exists per (request, reviewer) pair. `request` is a snapshot
/// taken at assignment time; only `notifications` changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reviewer {
    pub reviewer_id: String,
    pub request: Request,
    #[serde(default)]
    pub notifications: Notifications,
}

impl Reviewer {
    pub fn new(reviewer_id: impl Into<String>, request: &Request) -> Self {
        Self {
            reviewer_id: reviewer_id.into(),
            request: request.clone(),
            notifications: Notifications::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notifications {
    /// Handle of the review message sent to this reviewer, used for in-place edits.
    #[serde(default)]
    pub slack_message_id: Option<MessageHandle>,
}

/// Identifies a posted chat message: the conversation it lives in and its timestamp id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHandle {
    pub channel: String,
    pub ts: String,
}
