//! Request creation, approval policy and the request state machine.

pub mod policy;
pub mod reviewers;
pub mod service;
pub mod workflow;

use serde::Serialize;

use crate::models::request::InvalidTransition;
use crate::store::StoreError;

/// A validation failure scoped to one input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub error: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("request validation failed")]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

impl From<FieldError> for ValidationError {
    fn from(field: FieldError) -> Self {
        Self {
            fields: vec![field],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("access rule not found")]
    RuleNotFound,

    #[error("user is not in a group that may request this access rule")]
    NoMatchingGroup,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("request not found")]
    RequestNotFound,

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("user is not a reviewer of this request")]
    NotAReviewer,

    #[error("only the requester may cancel a request")]
    NotRequester,

    #[error("approval group {group} could not be resolved: {source}")]
    GroupLookup {
        group: String,
        #[source]
        source: StoreError,
    },

    #[error("granting access failed: {0}")]
    Grant(#[source] anyhow::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}
