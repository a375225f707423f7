use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use tallyflow_core::domain::expense::{Expense, ExpenseStatus, NewExpense};
use tallyflow_core::domain::user::User;
use tallyflow_core::domain::{CompanyId, ExpenseId, UserId};

use super::{
    column, decode_date, decode_decimal, decode_timestamp, encode_date, encode_timestamp,
    ExpenseRepository, RepositoryError,
};
use crate::DbPool;

pub(crate) const EXPENSE_COLUMNS: &str = "id, employee_id, company_id, amount, currency, \
     converted_amount, category, description, expense_date, receipt_ref, status, created_at";

pub struct SqlExpenseRepository {
    pool: DbPool,
}

impl SqlExpenseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn row_to_expense(row: &SqliteRow) -> Result<Expense, RepositoryError> {
    let status: String = column(row, "status")?;
    Ok(Expense {
        id: ExpenseId(column(row, "id")?),
        employee_id: UserId(column(row, "employee_id")?),
        company_id: CompanyId(column(row, "company_id")?),
        amount: decode_decimal(&column::<String>(row, "amount")?)?,
        currency: column(row, "currency")?,
        converted_amount: decode_decimal(&column::<String>(row, "converted_amount")?)?,
        category: column(row, "category")?,
        description: column(row, "description")?,
        expense_date: decode_date(&column::<String>(row, "expense_date")?)?,
        receipt_ref: column(row, "receipt_ref")?,
        status: ExpenseStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown expense status `{status}`")))?,
        created_at: decode_timestamp(&column::<String>(row, "created_at")?)?,
    })
}

/// Inserts a pending expense on behalf of `employee`, in the employee's company.
pub(crate) async fn insert_expense(
    conn: &mut SqliteConnection,
    employee: &User,
    expense: &NewExpense,
    converted_amount: Decimal,
    created_at: DateTime<Utc>,
) -> Result<Expense, RepositoryError> {
    let id = sqlx::query(
        "INSERT INTO expenses (employee_id, company_id, amount, currency, converted_amount,
                               category, description, expense_date, receipt_ref, status,
                               created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
    )
    .bind(employee.id.0)
    .bind(employee.company_id.0)
    .bind(expense.amount.to_string())
    .bind(&expense.currency)
    .bind(converted_amount.to_string())
    .bind(&expense.category)
    .bind(&expense.description)
    .bind(encode_date(expense.expense_date))
    .bind(&expense.receipt_ref)
    .bind(encode_timestamp(created_at))
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    fetch_expense(conn, ExpenseId(id)).await
}

pub(crate) async fn fetch_expense(
    conn: &mut SqliteConnection,
    id: ExpenseId,
) -> Result<Expense, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| RepositoryError::not_found("expense", id))?;
    row_to_expense(&row)
}

/// Takes SQLite's write lock for the current transaction by touching the
/// expense row. Concurrent deciders block here until the holder commits.
/// Returns false when the expense does not exist.
pub(crate) async fn lock_expense(
    conn: &mut SqliteConnection,
    id: ExpenseId,
) -> Result<bool, RepositoryError> {
    let affected = sqlx::query("UPDATE expenses SET status = status WHERE id = ?")
        .bind(id.0)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(affected == 1)
}

pub(crate) async fn set_status(
    conn: &mut SqliteConnection,
    id: ExpenseId,
    status: ExpenseStatus,
) -> Result<(), RepositoryError> {
    sqlx::query("UPDATE expenses SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait::async_trait]
impl ExpenseRepository for SqlExpenseRepository {
    async fn find_by_id(&self, id: ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_expense).transpose()
    }

    async fn list_for_employee(
        &self,
        employee_id: UserId,
    ) -> Result<Vec<Expense>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expenses
             WHERE employee_id = ?
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(employee_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_expense).collect()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use tallyflow_core::domain::expense::ExpenseStatus;
    use tallyflow_core::domain::user::Role;
    use tallyflow_core::domain::ExpenseId;

    use super::{lock_expense, set_status, SqlExpenseRepository};
    use crate::repositories::test_support::{company, expense, setup, user};
    use crate::repositories::ExpenseRepository;

    #[tokio::test]
    async fn inserted_expense_round_trips_money_and_dates() {
        let pool = setup().await;
        let acme = company(&pool, "Acme").await;
        let bea = user(&pool, acme.id, "Bea", Role::Employee, None).await;
        let created = expense(&pool, &bea, "Flight to Lisbon").await;

        let found = SqlExpenseRepository::new(pool)
            .find_by_id(created.id)
            .await
            .expect("find")
            .expect("should exist");

        assert_eq!(found, created);
        assert_eq!(found.amount, Decimal::new(12_000, 2));
        assert_eq!(found.status, ExpenseStatus::Pending);
        assert_eq!(found.company_id, acme.id);
    }

    #[tokio::test]
    async fn employee_listing_is_newest_first() {
        let pool = setup().await;
        let acme = company(&pool, "Acme").await;
        let bea = user(&pool, acme.id, "Bea", Role::Employee, None).await;
        let first = expense(&pool, &bea, "first").await;
        let second = expense(&pool, &bea, "second").await;

        let ids = SqlExpenseRepository::new(pool)
            .list_for_employee(bea.id)
            .await
            .expect("list")
            .into_iter()
            .map(|expense| expense.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn lock_reports_missing_rows_and_status_updates_persist() {
        let pool = setup().await;
        let acme = company(&pool, "Acme").await;
        let bea = user(&pool, acme.id, "Bea", Role::Employee, None).await;
        let created = expense(&pool, &bea, "Taxi").await;

        let mut conn = pool.acquire().await.expect("conn");
        assert!(lock_expense(&mut conn, created.id).await.expect("lock"));
        assert!(!lock_expense(&mut conn, ExpenseId(404)).await.expect("lock"));
        set_status(&mut conn, created.id, ExpenseStatus::Rejected).await.expect("status");
        drop(conn);

        let found = SqlExpenseRepository::new(pool).find_by_id(created.id).await.expect("find");
        assert_eq!(found.map(|expense| expense.status), Some(ExpenseStatus::Rejected));
    }
}
