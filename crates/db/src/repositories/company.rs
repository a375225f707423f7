use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use tallyflow_core::domain::company::{Company, NewCompany};
use tallyflow_core::domain::CompanyId;

use super::{column, decode_timestamp, encode_timestamp, RepositoryError};

const COMPANY_COLUMNS: &str = "id, name, default_currency, created_at";

fn row_to_company(row: &SqliteRow) -> Result<Company, RepositoryError> {
    Ok(Company {
        id: CompanyId(column(row, "id")?),
        name: column(row, "name")?,
        default_currency: column(row, "default_currency")?,
        created_at: decode_timestamp(&column::<String>(row, "created_at")?)?,
    })
}

pub(crate) async fn insert_company(
    conn: &mut SqliteConnection,
    company: &NewCompany,
    created_at: DateTime<Utc>,
) -> Result<Company, RepositoryError> {
    let id = sqlx::query(
        "INSERT INTO companies (name, default_currency, created_at) VALUES (?, ?, ?)",
    )
    .bind(&company.name)
    .bind(&company.default_currency)
    .bind(encode_timestamp(created_at))
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    fetch_company(conn, CompanyId(id)).await
}

pub(crate) async fn fetch_company(
    conn: &mut SqliteConnection,
    id: CompanyId,
) -> Result<Company, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {COMPANY_COLUMNS} FROM companies WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| RepositoryError::not_found("company", id))?;
    row_to_company(&row)
}
