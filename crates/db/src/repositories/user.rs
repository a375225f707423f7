use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use tallyflow_core::domain::user::{NewUser, Role, User};
use tallyflow_core::domain::{CompanyId, UserId};

use super::{column, decode_timestamp, encode_timestamp, RepositoryError, UserRepository};
use crate::DbPool;

const USER_COLUMNS: &str = "id, name, email, role, company_id, manager_id, created_at";

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &SqliteRow) -> Result<User, RepositoryError> {
    let role: String = column(row, "role")?;
    Ok(User {
        id: UserId(column(row, "id")?),
        name: column(row, "name")?,
        email: column(row, "email")?,
        role: Role::parse(&role)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown role `{role}`")))?,
        company_id: CompanyId(column(row, "company_id")?),
        manager_id: column::<Option<i64>>(row, "manager_id")?.map(UserId),
        created_at: decode_timestamp(&column::<String>(row, "created_at")?)?,
    })
}

pub(crate) async fn insert_user(
    conn: &mut SqliteConnection,
    user: &NewUser,
    created_at: DateTime<Utc>,
) -> Result<User, RepositoryError> {
    let id = sqlx::query(
        "INSERT INTO users (name, email, role, company_id, manager_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(user.role.as_str())
    .bind(user.company_id.0)
    .bind(user.manager_id.map(|id| id.0))
    .bind(encode_timestamp(created_at))
    .execute(&mut *conn)
    .await
    .map_err(|error| {
        RepositoryError::on_unique_violation(
            error,
            format!("email {} is already registered", user.email),
        )
    })?
    .last_insert_rowid();

    fetch_user(conn, UserId(id)).await
}

pub(crate) async fn fetch_user(
    conn: &mut SqliteConnection,
    id: UserId,
) -> Result<User, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| RepositoryError::not_found("user", id))?;
    row_to_user(&row)
}

pub(crate) async fn company_users(
    conn: &mut SqliteConnection,
    company_id: CompanyId,
) -> Result<Vec<User>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE company_id = ? ORDER BY id"
    ))
    .bind(company_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_user).collect()
}

pub(crate) async fn update_manager(
    conn: &mut SqliteConnection,
    user_id: UserId,
    manager_id: Option<UserId>,
) -> Result<User, RepositoryError> {
    let affected = sqlx::query("UPDATE users SET manager_id = ? WHERE id = ?")
        .bind(manager_id.map(|id| id.0))
        .bind(user_id.0)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    if affected == 0 {
        return Err(RepositoryError::not_found("user", user_id));
    }

    fetch_user(conn, user_id).await
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }
}
