use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;

use tallyflow_core::domain::expense::Expense;
use tallyflow_core::domain::user::User;
use tallyflow_core::domain::{ExpenseId, UserId};
use tallyflow_core::errors::{ApplicationError, DomainError};

pub mod company;
pub mod expense;
pub mod query;
pub mod rule;
pub mod user;
pub mod workflow;

pub use expense::SqlExpenseRepository;
pub use query::{
    CompanyOverview, DecisionRecord, HistoryEntry, PendingApproval, PendingOrder, RuleView,
    SqlExpenseQueries, TeamMemberSummary,
};
pub use user::SqlUserRepository;
pub use workflow::SqlWorkflowStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    /// Maps unique-constraint failures onto a domain constraint violation
    /// described by `message`; every other error passes through.
    pub(crate) fn on_unique_violation(error: sqlx::Error, message: impl Into<String>) -> Self {
        let unique = error.as_database_error().map(|db| db.is_unique_violation()).unwrap_or(false);
        if unique {
            Self::Domain(DomainError::ConstraintViolation(message.into()))
        } else {
            Self::Database(error)
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Domain(domain) => Self::Domain(domain),
            RepositoryError::NotFound { entity, id } => Self::NotFound { entity, id },
            RepositoryError::Database(error) => Self::Persistence(error.to_string()),
            RepositoryError::Decode(message) => Self::Persistence(message),
        }
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
}

#[async_trait]
pub trait ExpenseRepository: Send + Sync {
    async fn find_by_id(&self, id: ExpenseId) -> Result<Option<Expense>, RepositoryError>;
    async fn list_for_employee(&self, employee_id: UserId)
        -> Result<Vec<Expense>, RepositoryError>;
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|error| RepositoryError::Decode(format!("{name}: {error}")))
}

pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("timestamp `{raw}`: {error}")))
}

pub(crate) fn decode_decimal(raw: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("decimal `{raw}`: {error}")))
}

pub(crate) fn encode_date(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

pub(crate) fn decode_date(raw: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|error| RepositoryError::Decode(format!("date `{raw}`: {error}")))
}

/// Sums decimal strings exactly; SQLite's `SUM` would coerce them to floats.
pub(crate) fn sum_decimals<'a>(
    values: impl IntoIterator<Item = &'a str>,
) -> Result<Decimal, RepositoryError> {
    values.into_iter().try_fold(Decimal::ZERO, |total, raw| Ok(total + decode_decimal(raw)?))
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use tallyflow_core::domain::approval::{ApprovalRule, NewApprovalRule};
    use tallyflow_core::domain::company::{Company, NewCompany};
    use tallyflow_core::domain::expense::{Expense, NewExpense};
    use tallyflow_core::domain::user::{NewUser, Role, User};
    use tallyflow_core::domain::{CompanyId, UserId};

    use crate::repositories::{company, expense, rule, user};
    use crate::{connect_with_settings, migrations, DbPool};

    pub async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    pub async fn company(pool: &DbPool, name: &str) -> Company {
        let mut conn = pool.acquire().await.expect("conn");
        company::insert_company(
            &mut conn,
            &NewCompany { name: name.to_string(), default_currency: "USD".to_string() },
            Utc::now(),
        )
        .await
        .expect("insert company")
    }

    pub async fn user(
        pool: &DbPool,
        company_id: CompanyId,
        name: &str,
        role: Role,
        manager_id: Option<UserId>,
    ) -> User {
        let mut conn = pool.acquire().await.expect("conn");
        user::insert_user(
            &mut conn,
            &NewUser {
                name: name.to_string(),
                email: format!("{}@{}.test", name.to_ascii_lowercase(), company_id),
                role,
                company_id,
                manager_id,
            },
            Utc::now(),
        )
        .await
        .expect("insert user")
    }

    pub async fn rule(
        pool: &DbPool,
        company_id: CompanyId,
        sequence_order: i64,
        approver_id: UserId,
    ) -> ApprovalRule {
        rule_with(pool, company_id, sequence_order, approver_id, |_| {}).await
    }

    pub async fn rule_with(
        pool: &DbPool,
        company_id: CompanyId,
        sequence_order: i64,
        approver_id: UserId,
        customize: impl FnOnce(&mut NewApprovalRule),
    ) -> ApprovalRule {
        let mut new_rule = NewApprovalRule {
            company_id,
            name: format!("step {sequence_order}"),
            approver_id,
            sequence_order,
            percentage_rule: None,
            specific_approver_rule: false,
            is_manager_approver: false,
        };
        customize(&mut new_rule);
        let mut conn = pool.acquire().await.expect("conn");
        rule::insert_rule(&mut conn, &new_rule, Utc::now()).await.expect("insert rule")
    }

    pub fn submission(description: &str) -> NewExpense {
        NewExpense {
            amount: Decimal::new(12_000, 2),
            currency: "USD".to_string(),
            category: "Travel".to_string(),
            description: description.to_string(),
            expense_date: NaiveDate::from_ymd_opt(2026, 2, 10).expect("date"),
            receipt_ref: None,
        }
    }

    pub async fn expense(pool: &DbPool, employee: &User, description: &str) -> Expense {
        let submission = submission(description);
        let mut conn = pool.acquire().await.expect("conn");
        expense::insert_expense(
            &mut conn,
            employee,
            &submission,
            submission.amount,
            Utc::now(),
        )
        .await
        .expect("insert expense")
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{
        decode_date, decode_timestamp, encode_date, encode_timestamp, sum_decimals,
        RepositoryError,
    };
    use tallyflow_core::errors::{ApplicationError, DomainError, ErrorKind};

    #[test]
    fn timestamps_round_trip_with_millisecond_precision() {
        let value = Utc.with_ymd_and_hms(2026, 4, 2, 13, 5, 9).single().expect("timestamp");
        let encoded = encode_timestamp(value);

        assert_eq!(encoded, "2026-04-02T13:05:09.000Z");
        assert_eq!(decode_timestamp(&encoded).expect("decode"), value);
        assert!(decode_timestamp("yesterday").is_err());
    }

    #[test]
    fn dates_use_iso_calendar_form() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 31).expect("date");
        assert_eq!(encode_date(date), "2026-01-31");
        assert_eq!(decode_date("2026-01-31").expect("decode"), date);
    }

    #[test]
    fn decimal_sums_are_exact() {
        let total = sum_decimals(["0.10", "0.20", "1000.05"]).expect("sum");
        assert_eq!(total, Decimal::new(100_035, 2));
        assert!(matches!(sum_decimals(["abc"]), Err(RepositoryError::Decode(_))));
    }

    #[test]
    fn repository_errors_classify_for_callers() {
        let missing = ApplicationError::from(RepositoryError::not_found("expense", 7));
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let storage = ApplicationError::from(RepositoryError::Decode("bad row".to_string()));
        assert_eq!(storage.kind(), ErrorKind::StorageFailure);

        let domain = ApplicationError::from(RepositoryError::Domain(
            DomainError::ConstraintViolation("duplicate".to_string()),
        ));
        assert_eq!(domain.kind(), ErrorKind::ConstraintViolation);
    }
}
