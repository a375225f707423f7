use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::company::normalize_currency_code;
use crate::domain::{CompanyId, ExpenseId, UserId};
use crate::errors::DomainError;

pub const EXPENSE_CATEGORIES: &[&str] = &[
    "Travel",
    "Meals & Entertainment",
    "Office Supplies",
    "Transportation",
    "Accommodation",
    "Communication",
    "Training & Education",
    "Software & Subscriptions",
    "Medical",
    "Miscellaneous",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    Pending,
    Approved,
    Rejected,
}

impl ExpenseStatus {
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

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub employee_id: UserId,
    pub company_id: CompanyId,
    pub amount: Decimal,
    pub currency: String,
    pub converted_amount: Decimal,
    pub category: String,
    pub description: String,
    pub expense_date: NaiveDate,
    pub receipt_ref: Option<String>,
    pub status: ExpenseStatus,
    pub created_at: DateTime<Utc>,
}

/// Submission payload before currency conversion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExpense {
    pub amount: Decimal,
    pub currency: String,
    pub category: String,
    pub description: String,
    pub expense_date: NaiveDate,
    #[serde(default)]
    pub receipt_ref: Option<String>,
}

impl NewExpense {
    pub fn validated(self, today: NaiveDate) -> Result<Self, DomainError> {
        if self.amount <= Decimal::ZERO {
            return Err(DomainError::ConstraintViolation(
                "expense amount must be greater than zero".to_string(),
            ));
        }

        let currency = normalize_currency_code(&self.currency)?;

        let category = EXPENSE_CATEGORIES
            .iter()
            .find(|known| known.eq_ignore_ascii_case(self.category.trim()))
            .map(|known| (*known).to_string())
            .ok_or_else(|| {
                DomainError::ConstraintViolation(format!(
                    "unknown expense category `{}`",
                    self.category
                ))
            })?;

        let description = self.description.trim().to_string();
        if description.is_empty() {
            return Err(DomainError::ConstraintViolation(
                "expense description is required".to_string(),
            ));
        }

        if self.expense_date > today {
            return Err(DomainError::ConstraintViolation(format!(
                "expense date {} is in the future",
                self.expense_date
            )));
        }

        let receipt_ref = self
            .receipt_ref
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Ok(Self {
            amount: self.amount,
            currency,
            category,
            description,
            expense_date: self.expense_date,
            receipt_ref,
        })
    }
}
