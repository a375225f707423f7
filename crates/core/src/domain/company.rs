use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::CompanyId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub default_currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCompany {
    pub name: String,
    pub default_currency: String,
}

impl NewCompany {
    /// Trims the name and upper-cases the currency code.
    pub fn normalized(self) -> Result<Self, DomainError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::ConstraintViolation("company name is required".to_string()));
        }

        let default_currency = normalize_currency_code(&self.default_currency)?;
        Ok(Self { name, default_currency })
    }
}

pub fn normalize_currency_code(raw: &str) -> Result<String, DomainError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(DomainError::ConstraintViolation(format!(
            "currency `{raw}` must be a three-letter ISO code"
        )));
    }
    Ok(code)
}
