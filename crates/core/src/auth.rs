//! Caller identity and role checks.
//!
//! Entry points receive a `Caller` resolved by the session layer and call
//! [`authorize`] before dispatching; the core itself keeps no notion of a
//! current user.

use serde::{Deserialize, Serialize};

use crate::domain::user::{Role, User};
use crate::domain::{CompanyId, UserId};
use crate::errors::ApplicationError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: UserId,
    pub company_id: CompanyId,
    pub role: Role,
}

impl Caller {
    pub fn from_user(user: &User) -> Self {
        Self { user_id: user.id, company_id: user.company_id, role: user.role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for Caller {
    fn from(user: &User) -> Self {
        Self::from_user(user)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny { reason: String },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn into_result(self) -> Result<(), ApplicationError> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny { reason } => Err(ApplicationError::Forbidden(reason)),
        }
    }
}

pub fn authorize(caller: &Caller, required_roles: &[Role]) -> AccessDecision {
    if required_roles.contains(&caller.role) {
        return AccessDecision::Allow;
    }

    let allowed = required_roles.iter().map(Role::as_str).collect::<Vec<_>>().join("|");
    AccessDecision::Deny {
        reason: format!("role `{}` is not one of [{allowed}]", caller.role.as_str()),
    }
}

/// Tenant isolation: callers only ever touch rows of their own company.
pub fn authorize_company(caller: &Caller, company_id: CompanyId) -> AccessDecision {
    if caller.company_id == company_id {
        AccessDecision::Allow
    } else {
        AccessDecision::Deny {
            reason: format!("user {} does not belong to company {company_id}", caller.user_id),
        }
    }
}
