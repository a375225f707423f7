use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use tallyflow_core::domain::approval::{ApprovalRule, NewApprovalRule};
use tallyflow_core::domain::{ApprovalRuleId, CompanyId, UserId};

use super::{column, decode_timestamp, encode_timestamp, RepositoryError};

const RULE_COLUMNS: &str = "id, company_id, name, sequence_order, approver_id, \
     is_manager_approver, percentage_rule, specific_approver_rule, created_at";

fn row_to_rule(row: &SqliteRow) -> Result<ApprovalRule, RepositoryError> {
    let percentage_rule = column::<Option<i64>>(row, "percentage_rule")?
        .map(|value| {
            u8::try_from(value)
                .ok()
                .filter(|value| *value <= 100)
                .ok_or_else(|| RepositoryError::Decode(format!("percentage_rule {value}")))
        })
        .transpose()?;

    Ok(ApprovalRule {
        id: ApprovalRuleId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        name: column(row, "name")?,
        sequence_order: column(row, "sequence_order")?,
        approver_id: UserId(column(row, "approver_id")?),
        is_manager_approver: column(row, "is_manager_approver")?,
        percentage_rule,
        specific_approver_rule: column(row, "specific_approver_rule")?,
        created_at: decode_timestamp(&column::<String>(row, "created_at")?)?,
    })
}

/// Validates and inserts a rule. Sequence numbers are unique per company.
pub(crate) async fn insert_rule(
    conn: &mut SqliteConnection,
    rule: &NewApprovalRule,
    created_at: DateTime<Utc>,
) -> Result<ApprovalRule, RepositoryError> {
    let (name, percentage_rule) = rule.validated()?;

    let id = sqlx::query(
        "INSERT INTO approval_rules (company_id, name, sequence_order, approver_id,
                                     is_manager_approver, percentage_rule,
                                     specific_approver_rule, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(rule.company_id.0)
    .bind(&name)
    .bind(rule.sequence_order)
    .bind(rule.approver_id.0)
    .bind(rule.is_manager_approver)
    .bind(percentage_rule.map(i64::from))
    .bind(rule.specific_approver_rule)
    .bind(encode_timestamp(created_at))
    .execute(&mut *conn)
    .await
    .map_err(|error| {
        RepositoryError::on_unique_violation(
            error,
            format!(
                "company {} already has a rule at sequence {}",
                rule.company_id, rule.sequence_order
            ),
        )
    })?
    .last_insert_rowid();

    let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM approval_rules WHERE id = ?"))
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    row_to_rule(&row)
}

/// Company rules in evaluation order.
pub(crate) async fn company_rules(
    conn: &mut SqliteConnection,
    company_id: CompanyId,
) -> Result<Vec<ApprovalRule>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {RULE_COLUMNS} FROM approval_rules
         WHERE company_id = ?
         ORDER BY sequence_order, id"
    ))
    .bind(company_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_rule).collect()
}
