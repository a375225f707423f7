use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ApprovalRuleId, CompanyId, ExpenseApprovalId, ExpenseId, UserId};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// An approver's verdict on one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_status(&self) -> ApprovalStatus {
        match self {
            Self::Approved => ApprovalStatus::Approved,
            Self::Rejected => ApprovalStatus::Rejected,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Some(Self::Approved),
            "rejected" | "reject" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Company-level configured step, shared by every expense of the company.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: ApprovalRuleId,
    pub company_id: CompanyId,
    pub name: String,
    pub sequence_order: i64,
    pub approver_id: UserId,
    pub is_manager_approver: bool,
    pub percentage_rule: Option<u8>,
    pub specific_approver_rule: bool,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRule {
    pub fn is_conditional(&self) -> bool {
        self.specific_approver_rule || self.percentage_rule.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApprovalRule {
    pub company_id: CompanyId,
    pub name: String,
    pub approver_id: UserId,
    pub sequence_order: i64,
    #[serde(default)]
    pub percentage_rule: Option<i64>,
    #[serde(default)]
    pub specific_approver_rule: bool,
    #[serde(default)]
    pub is_manager_approver: bool,
}

impl NewApprovalRule {
    /// Returns the trimmed name and the percentage narrowed to `0..=100`.
    pub fn validated(&self) -> Result<(String, Option<u8>), DomainError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::ConstraintViolation("rule name is required".to_string()));
        }

        if self.sequence_order < 1 {
            return Err(DomainError::ConstraintViolation(format!(
                "sequence_order must be positive, got {}",
                self.sequence_order
            )));
        }

        let percentage_rule = match self.percentage_rule {
            Some(value) if (0..=100).contains(&value) => Some(value as u8),
            Some(value) => {
                return Err(DomainError::ConstraintViolation(format!(
                    "percentage_rule must be within 0..=100, got {value}"
                )));
            }
            None => None,
        };

        Ok((name, percentage_rule))
    }
}

/// One approver's stake in one expense.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseApproval {
    pub id: ExpenseApprovalId,
    pub expense_id: ExpenseId,
    pub approver_id: UserId,
    pub sequence_order: i64,
    pub status: ApprovalStatus,
    pub comments: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ExpenseApproval {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}
