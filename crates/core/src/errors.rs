use thiserror::Error;

use crate::currency::ConversionError;
use crate::domain::expense::ExpenseStatus;
use crate::domain::{ExpenseId, UserId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("expense {expense_id} is {status:?}, expected Pending")]
    InvalidExpenseState { expense_id: ExpenseId, status: ExpenseStatus },
    #[error("approver {approver_id} has no pending approval step on expense {expense_id}")]
    NoPendingApprovalForApprover { expense_id: ExpenseId, approver_id: UserId },
    #[error("approval workflow for expense {expense_id} already exists")]
    WorkflowAlreadyBuilt { expense_id: ExpenseId },
    #[error("assigning manager {manager_id} to user {user_id} would create a reporting cycle")]
    ManagerCycle { user_id: UserId, manager_id: UserId },
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error(transparent)]
    Currency(#[from] ConversionError),
}

/// Coarse classification used by interfaces and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    ConstraintViolation,
    Forbidden,
    StorageFailure,
    Unavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidState => "invalid_state",
            Self::ConstraintViolation => "constraint_violation",
            Self::Forbidden => "forbidden",
            Self::StorageFailure => "storage_failure",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("access denied: {0}")]
    Forbidden(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Domain(DomainError::InvalidExpenseState { .. })
            | Self::Domain(DomainError::NoPendingApprovalForApprover { .. })
            | Self::Domain(DomainError::WorkflowAlreadyBuilt { .. }) => ErrorKind::InvalidState,
            Self::Domain(DomainError::ManagerCycle { .. })
            | Self::Domain(DomainError::ConstraintViolation(_)) => ErrorKind::ConstraintViolation,
            Self::Domain(DomainError::Currency(_)) | Self::Integration(_) => ErrorKind::Unavailable,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Persistence(_) => ErrorKind::StorageFailure,
            Self::Configuration(_) => ErrorKind::Internal,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "You are not allowed to perform this action.",
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => "The record changed state and this action no longer applies.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        let message = value.to_string();
        match value.kind() {
            ErrorKind::ConstraintViolation => Self::BadRequest { message, correlation_id },
            ErrorKind::Forbidden => Self::Forbidden { message, correlation_id },
            ErrorKind::NotFound => Self::NotFound { message, correlation_id },
            ErrorKind::InvalidState => Self::Conflict { message, correlation_id },
            ErrorKind::StorageFailure | ErrorKind::Unavailable => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ErrorKind::Internal => Self::Internal { message, correlation_id },
        }
    }
}
