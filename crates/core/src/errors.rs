use thiserror::Error;

use crate::domain::quote::QuoteStatus;
use crate::workflow::WorkflowAction;

/// Failures raised by the domain engines. The variants map onto the three
/// caller-visible rejection classes: validation (field or line level),
/// not-permitted (wrong status or insufficient role, state untouched), and
/// referential (unknown product aborts the whole rebuild).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed for `{field}`: {message}")]
    Validation { field: &'static str, message: String },
    #[error("line {index}: {reason}")]
    LineValidation { index: usize, reason: String },
    #[error("line {index}: unknown product id {product_id}")]
    UnknownProduct { index: usize, product_id: i64 },
    #[error("{action} is not allowed while the quote is {status:?}")]
    TransitionRejected { action: WorkflowAction, status: QuoteStatus },
    #[error("actor is not permitted to {action}")]
    Forbidden { action: WorkflowAction },
    #[error("assigned user is missing the name parts needed for quote initials")]
    MissingActorName,
}

impl DomainError {
    /// Not-permitted outcomes are reported distinctly from validation
    /// failures so callers can tell "fix your input" from "wrong state or
    /// role".
    pub fn is_not_permitted(&self) -> bool {
        matches!(
            self,
            DomainError::TransitionRejected { .. } | DomainError::Forbidden { .. }
        )
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}
