use sqlx::Executor;

use tallyflow_core::approvals::derive_expense_status;
use tallyflow_core::domain::expense::ExpenseStatus;
use tallyflow_core::domain::ExpenseId;

use crate::connection::{begin_write, DbPool};
use crate::repositories::workflow::steps_in;
use crate::repositories::RepositoryError;

/// Expected state of every seeded expense.
const SEED_EXPENSES: &[SeedExpenseContract] = &[
    SeedExpenseContract {
        expense_id: 9301,
        label: "expense-9301-pending-untouched",
        status: ExpenseStatus::Pending,
        step_count: 3,
        description: "EUR travel claim awaiting its first approver",
    },
    SeedExpenseContract {
        expense_id: 9302,
        label: "expense-9302-approved",
        status: ExpenseStatus::Approved,
        step_count: 3,
        description: "Meal claim approved by every step",
    },
    SeedExpenseContract {
        expense_id: 9303,
        label: "expense-9303-rejected",
        status: ExpenseStatus::Rejected,
        step_count: 3,
        description: "Software claim rejected by finance with cascade",
    },
    SeedExpenseContract {
        expense_id: 9304,
        label: "expense-9304-pending-partial",
        status: ExpenseStatus::Pending,
        step_count: 3,
        description: "Supplies claim approved by the manager, waiting on finance",
    },
];

const SEED_COMPANY_IDS: &[i64] = &[9001];
const SEED_USER_IDS: &[i64] = &[9101, 9102, 9103, 9104, 9105];
const SEED_RULE_IDS: &[i64] = &[9201, 9202];

/// Deterministic demo dataset: one company, a manager hierarchy, two
/// conditional rules and expenses in every workflow state.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    /// Loads the dataset. Rows that already exist are left untouched.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = begin_write(pool).await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let expenses_seeded = SEED_EXPENSES
            .iter()
            .map(|expense| SeedExpenseInfo {
                expense_id: ExpenseId(expense.expense_id),
                status: expense.status,
                description: expense.description,
            })
            .collect();

        Ok(SeedResult { expenses_seeded })
    }

    /// Checks that the seeded rows exist and that every seeded expense status
    /// agrees with its approval steps.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();
        let mut conn = pool.acquire().await?;

        checks.push((
            "companies",
            count_ids(&mut conn, "companies", SEED_COMPANY_IDS).await? == SEED_COMPANY_IDS.len(),
        ));
        checks.push((
            "users",
            count_ids(&mut conn, "users", SEED_USER_IDS).await? == SEED_USER_IDS.len(),
        ));
        checks.push((
            "approval-rules",
            count_ids(&mut conn, "approval_rules", SEED_RULE_IDS).await? == SEED_RULE_IDS.len(),
        ));

        for expense in SEED_EXPENSES {
            let stored: Option<String> =
                sqlx::query_scalar("SELECT status FROM expenses WHERE id = ?")
                    .bind(expense.expense_id)
                    .fetch_optional(&mut *conn)
                    .await?;
            let steps = steps_in(&mut conn, ExpenseId(expense.expense_id)).await?;

            let consistent = stored.as_deref() == Some(expense.status.as_str())
                && steps.len() == expense.step_count
                && derive_expense_status(&steps) == expense.status;
            checks.push((expense.label, consistent));
        }

        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes every seeded row, children first.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = begin_write(pool).await?;

        let expenses = sql_array_from_ids(SEED_EXPENSES.iter().map(|expense| expense.expense_id));
        let companies = sql_array_from_ids(SEED_COMPANY_IDS.iter().copied());
        let users = sql_array_from_ids(SEED_USER_IDS.iter().copied());
        let rules = sql_array_from_ids(SEED_RULE_IDS.iter().copied());

        for statement in [
            format!("DELETE FROM expense_approvals WHERE expense_id IN {expenses}"),
            format!("DELETE FROM expenses WHERE id IN {expenses}"),
            format!("DELETE FROM approval_rules WHERE id IN {rules}"),
            format!("UPDATE users SET manager_id = NULL WHERE id IN {users}"),
            format!("DELETE FROM users WHERE id IN {users}"),
            format!("DELETE FROM companies WHERE id IN {companies}"),
        ] {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedExpenseContract {
    expense_id: i64,
    label: &'static str,
    status: ExpenseStatus,
    step_count: usize,
    description: &'static str,
}

async fn count_ids(
    conn: &mut sqlx::SqliteConnection,
    table: &str,
    ids: &[i64],
) -> Result<usize, RepositoryError> {
    let quoted = sql_array_from_ids(ids.iter().copied());
    let count: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(1) FROM {table} WHERE id IN {quoted}"))
            .fetch_one(&mut *conn)
            .await?;
    Ok(usize::try_from(count).unwrap_or_default())
}

fn sql_array_from_ids(ids: impl IntoIterator<Item = i64>) -> String {
    let joined = ids.into_iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
    format!("({joined})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub expenses_seeded: Vec<SeedExpenseInfo>,
}

#[derive(Debug)]
pub struct SeedExpenseInfo {
    pub expense_id: ExpenseId,
    pub status: ExpenseStatus,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    async fn migrated_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    #[test]
    fn sql_fixture_is_valid() {
        assert!(!DemoSeedDataset::SQL.is_empty());
        assert!(DemoSeedDataset::SQL.contains("INSERT OR IGNORE"));
    }

    #[tokio::test]
    async fn seed_contract_holds_and_loading_is_idempotent() {
        let pool = migrated_pool().await;

        let first = DemoSeedDataset::load(&pool).await.expect("load seed fixtures");
        assert_eq!(first.expenses_seeded.len(), 4);
        let verification = DemoSeedDataset::verify(&pool).await.expect("verify seed fixtures");
        assert!(verification.all_present, "failed checks: {:?}", verification.checks);

        DemoSeedDataset::load(&pool).await.expect("second load");
        let again = DemoSeedDataset::verify(&pool).await.expect("verify again");
        assert!(again.all_present);

        let (expenses,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM expenses").fetch_one(&pool).await.expect("count");
        assert_eq!(expenses, 4);
    }

    #[tokio::test]
    async fn clean_removes_the_dataset() {
        let pool = migrated_pool().await;
        DemoSeedDataset::load(&pool).await.expect("load");
        DemoSeedDataset::clean(&pool).await.expect("clean");

        let verification = DemoSeedDataset::verify(&pool).await.expect("verify");
        assert!(!verification.all_present);
        assert!(verification.checks.iter().all(|(_, passed)| !passed));
    }

    #[tokio::test]
    async fn tampered_status_fails_verification() {
        let pool = migrated_pool().await;
        DemoSeedDataset::load(&pool).await.expect("load");

        sqlx::query("UPDATE expenses SET status = 'approved' WHERE id = 9304")
            .execute(&pool)
            .await
            .expect("tamper");

        let verification = DemoSeedDataset::verify(&pool).await.expect("verify");
        assert!(!verification.all_present);
        assert!(verification.checks.contains(&("expense-9304-pending-partial", false)));
    }
}
