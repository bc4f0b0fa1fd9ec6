use serde::{Deserialize, Serialize};

use super::request::Request;

/// Lifecycle event emitted whenever a request is created or reaches a final state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub event_type: RequestEventType,
    pub request: Request,
    /// The reviewer who made the decision, for approved/declined events.
    #[serde(default)]
    pub reviewer_id: Option<String>,
}

impl RequestEvent {
    pub fn created(request: Request) -> Self {
        Self {
            event_type: RequestEventType::Created,
            request,
            reviewer_id: None,
        }
    }

    pub fn approved(request: Request, reviewer_id: impl Into<String>) -> Self {
        Self {
            event_type: RequestEventType::Approved,
            request,
            reviewer_id: Some(reviewer_id.into()),
        }
    }

    pub fn declined(request: Request, reviewer_id: impl Into<String>) -> Self {
        Self {
            event_type: RequestEventType::Declined,
            request,
            reviewer_id: Some(reviewer_id.into()),
        }
    }

    pub fn cancelled(request: Request) -> Self {
        Self {
            event_type: RequestEventType::Cancelled,
            request,
            reviewer_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestEventType {
    #[serde(rename = "request.created")]
    Created,
    #[serde(rename = "request.approved")]
    Approved,
    #[serde(rename = "request.declined")]
    Declined,
    #[serde(rename = "request.cancelled")]
    Cancelled,
}

impl RequestEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestEventType::Created => "request.created",
            RequestEventType::Approved => "request.approved",
            RequestEventType::Declined => "request.declined",
            RequestEventType::Cancelled => "request.cancelled",
        }
    }
}
