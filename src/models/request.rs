use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A single instance of a user asking to exercise an access rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub requested_by: String,
    pub rule: String,
    pub rule_version: String,
    pub status: RequestStatus,
    #[serde(default)]
    pub reason: Option<String>,
    pub timing: RequestTiming,
    pub approval_method: ApprovalMethod,
    /// Present iff `status == Approved`.
    #[serde(default)]
    pub grant: Option<Grant>,
    /// Argument key → chosen option.
    #[serde(default)]
    pub selected_with: BTreeMap<String, SelectedOption>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    /// Move to `next`, stamping `updated_at`. Rejects anything but
    /// `PENDING → {APPROVED, DECLINED, CANCELLED}`.
    pub fn transition(
        &mut self,
        next: RequestStatus,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Declined,
    Cancelled,
}

impl RequestStatus {
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (
                RequestStatus::Pending,
                RequestStatus::Approved | RequestStatus::Declined | RequestStatus::Cancelled
            )
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Declined => "DECLINED",
            RequestStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot move request from {from} to {to}")]
pub struct InvalidTransition {
    pub from: RequestStatus,
    pub to: RequestStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalMethod {
    Automatic,
    Reviewed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestTiming {
    pub duration_seconds: u64,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
}

impl RequestTiming {
    /// Start and end of the access window. Requests without an explicit
    /// start begin at `fallback_start`.
    pub fn window(&self, fallback_start: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.start_time.unwrap_or(fallback_start);
        let secs = i64::try_from(self.duration_seconds).unwrap_or(i64::MAX);
        let end = Duration::try_seconds(secs)
            .and_then(|d| start.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (start, end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedOption {
    pub value: String,
    pub label: String,
}

/// Opaque handle returned by the provisioning backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub id: String,
    pub provider: String,
    pub subject: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}
