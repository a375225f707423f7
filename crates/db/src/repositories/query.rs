use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyflow_core::domain::approval::{ApprovalRule, ApprovalStatus};
use tallyflow_core::domain::expense::{Expense, ExpenseStatus};
use tallyflow_core::domain::user::Role;
use tallyflow_core::domain::{CompanyId, ExpenseApprovalId, ExpenseId, UserId};

use super::company::fetch_company;
use super::expense::{fetch_expense, row_to_expense};
use super::user::fetch_user;
use super::{
    column, decode_decimal, decode_timestamp, encode_timestamp, sum_decimals, RepositoryError,
};
use crate::DbPool;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl PendingOrder {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "newest" | "newest_first" | "desc" => Some(Self::NewestFirst),
            "oldest" | "oldest_first" | "asc" => Some(Self::OldestFirst),
            _ => None,
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            Self::NewestFirst => "e.created_at DESC, e.id DESC",
            Self::OldestFirst => "e.created_at ASC, e.id ASC",
        }
    }
}

/// An expense waiting on one approver, with the step that is waiting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub approval_id: ExpenseApprovalId,
    pub sequence_order: i64,
    pub employee_name: String,
    pub expense: Expense,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub approval_id: ExpenseApprovalId,
    pub approver_id: UserId,
    pub approver_name: String,
    pub sequence_order: i64,
    pub status: ApprovalStatus,
    pub comments: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub approval_id: ExpenseApprovalId,
    pub expense_id: ExpenseId,
    pub employee_name: String,
    pub category: String,
    pub converted_amount: Decimal,
    pub status: ApprovalStatus,
    pub comments: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMemberSummary {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
    pub approved_total: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyOverview {
    pub company_id: CompanyId,
    pub admins: u64,
    pub managers: u64,
    pub employees: u64,
    pub pending_expenses: u64,
    pub approved_expenses: u64,
    pub rejected_expenses: u64,
    pub approved_total: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleView {
    #[serde(flatten)]
    pub rule: ApprovalRule,
    pub approver_name: String,
}

/// Read-side projections for approver inboxes, histories and dashboards.
#[derive(Clone)]
pub struct SqlExpenseQueries {
    pool: DbPool,
}

impl SqlExpenseQueries {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn pending_for(
        &self,
        approver_id: UserId,
        order: PendingOrder,
    ) -> Result<Vec<PendingApproval>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT a.id AS approval_id, a.sequence_order AS step_sequence, u.name AS employee_name,
                    e.id AS id, e.employee_id AS employee_id, e.company_id AS company_id,
                    e.amount AS amount, e.currency AS currency,
                    e.converted_amount AS converted_amount, e.category AS category,
                    e.description AS description, e.expense_date AS expense_date,
                    e.receipt_ref AS receipt_ref, e.status AS status, e.created_at AS created_at
             FROM expense_approvals a
             JOIN expenses e ON e.id = a.expense_id
             JOIN users u ON u.id = e.employee_id
             WHERE a.approver_id = ? AND a.status = 'pending' AND e.status = 'pending'
             ORDER BY {}",
            order.sql()
        ))
        .bind(approver_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PendingApproval {
                    approval_id: ExpenseApprovalId(column(row, "approval_id")?),
                    sequence_order: column(row, "step_sequence")?,
                    employee_name: column(row, "employee_name")?,
                    expense: row_to_expense(row)?,
                })
            })
            .collect()
    }

    pub async fn history_for(
        &self,
        expense_id: ExpenseId,
    ) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_expense(&mut conn, expense_id).await?;

        let rows = sqlx::query(
            "SELECT a.id AS id, a.approver_id AS approver_id, u.name AS approver_name,
                    a.sequence_order AS sequence_order, a.status AS status,
                    a.comments AS comments, a.approved_at AS approved_at
             FROM expense_approvals a
             JOIN users u ON u.id = a.approver_id
             WHERE a.expense_id = ?
             ORDER BY a.sequence_order, a.id",
        )
        .bind(expense_id.0)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(HistoryEntry {
                    approval_id: ExpenseApprovalId(column(row, "id")?),
                    approver_id: UserId(column(row, "approver_id")?),
                    approver_name: column(row, "approver_name")?,
                    sequence_order: column(row, "sequence_order")?,
                    status: parse_approval_status(&column::<String>(row, "status")?)?,
                    comments: column(row, "comments")?,
                    approved_at: optional_timestamp(column(row, "approved_at")?)?,
                })
            })
            .collect()
    }

    pub async fn next_approver(
        &self,
        expense_id: ExpenseId,
    ) -> Result<Option<UserId>, RepositoryError> {
        let next: Option<(i64,)> = sqlx::query_as(
            "SELECT approver_id FROM expense_approvals
             WHERE expense_id = ? AND status = 'pending'
             ORDER BY sequence_order, id
             LIMIT 1",
        )
        .bind(expense_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(next.map(|(id,)| UserId(id)))
    }

    pub async fn team_size(&self, manager_id: UserId) -> Result<u64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE manager_id = ?")
            .bind(manager_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Steps this approver approved since the first day of `now`'s month (UTC).
    pub async fn approved_this_month(
        &self,
        approver_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM expense_approvals
             WHERE approver_id = ? AND status = 'approved' AND approved_at >= ?",
        )
        .bind(approver_id.0)
        .bind(encode_timestamp(month_start(now)))
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn decisions_by(
        &self,
        approver_id: UserId,
        limit: u32,
    ) -> Result<Vec<DecisionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT a.id AS id, a.expense_id AS expense_id, u.name AS employee_name,
                    e.category AS category, e.converted_amount AS converted_amount,
                    a.status AS status, a.comments AS comments, a.approved_at AS approved_at
             FROM expense_approvals a
             JOIN expenses e ON e.id = a.expense_id
             JOIN users u ON u.id = e.employee_id
             WHERE a.approver_id = ? AND a.status <> 'pending'
             ORDER BY COALESCE(a.approved_at, a.created_at) DESC, a.id DESC
             LIMIT ?",
        )
        .bind(approver_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DecisionRecord {
                    approval_id: ExpenseApprovalId(column(row, "id")?),
                    expense_id: ExpenseId(column(row, "expense_id")?),
                    employee_name: column(row, "employee_name")?,
                    category: column(row, "category")?,
                    converted_amount: decode_decimal(&column::<String>(row, "converted_amount")?)?,
                    status: parse_approval_status(&column::<String>(row, "status")?)?,
                    comments: column(row, "comments")?,
                    decided_at: optional_timestamp(column(row, "approved_at")?)?,
                })
            })
            .collect()
    }

    pub async fn team_overview(
        &self,
        manager_id: UserId,
    ) -> Result<Vec<TeamMemberSummary>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT u.id AS id, u.name AS name, u.email AS email, e.status AS status,
                    e.converted_amount AS converted_amount
             FROM users u
             LEFT JOIN expenses e ON e.employee_id = u.id
             WHERE u.manager_id = ?
             ORDER BY u.name, u.id, e.id",
        )
        .bind(manager_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut team: Vec<(TeamMemberSummary, Vec<String>)> = Vec::new();
        for row in &rows {
            let user_id = UserId(column(row, "id")?);
            if team.last().map(|(member, _)| member.user_id) != Some(user_id) {
                team.push((
                    TeamMemberSummary {
                        user_id,
                        name: column(row, "name")?,
                        email: column(row, "email")?,
                        pending: 0,
                        approved: 0,
                        rejected: 0,
                        approved_total: Decimal::ZERO,
                    },
                    Vec::new(),
                ));
            }

            let Some(status) = column::<Option<String>>(row, "status")? else {
                continue;
            };
            let amount = column::<Option<String>>(row, "converted_amount")?;
            if let Some((member, approved_amounts)) = team.last_mut() {
                match parse_expense_status(&status)? {
                    ExpenseStatus::Pending => member.pending += 1,
                    ExpenseStatus::Rejected => member.rejected += 1,
                    ExpenseStatus::Approved => {
                        member.approved += 1;
                        approved_amounts.extend(amount);
                    }
                }
            }
        }

        team.into_iter()
            .map(|(mut member, approved_amounts)| {
                member.approved_total =
                    sum_decimals(approved_amounts.iter().map(String::as_str))?;
                Ok(member)
            })
            .collect()
    }

    pub async fn company_overview(
        &self,
        company_id: CompanyId,
    ) -> Result<CompanyOverview, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_company(&mut conn, company_id).await?;

        let mut overview = CompanyOverview {
            company_id,
            admins: 0,
            managers: 0,
            employees: 0,
            pending_expenses: 0,
            approved_expenses: 0,
            rejected_expenses: 0,
            approved_total: Decimal::ZERO,
        };

        let roles: Vec<(String, i64)> =
            sqlx::query_as("SELECT role, COUNT(*) FROM users WHERE company_id = ? GROUP BY role")
                .bind(company_id.0)
                .fetch_all(&mut *conn)
                .await?;
        for (role, count) in roles {
            let count = count.max(0) as u64;
            match Role::parse(&role) {
                Some(Role::Admin) => overview.admins = count,
                Some(Role::Manager) => overview.managers = count,
                Some(Role::Employee) => overview.employees = count,
                None => return Err(RepositoryError::Decode(format!("unknown role `{role}`"))),
            }
        }

        let expenses: Vec<(String, String)> =
            sqlx::query_as("SELECT status, converted_amount FROM expenses WHERE company_id = ?")
                .bind(company_id.0)
                .fetch_all(&mut *conn)
                .await?;
        let mut approved_amounts = Vec::new();
        for (status, amount) in &expenses {
            match parse_expense_status(status)? {
                ExpenseStatus::Pending => overview.pending_expenses += 1,
                ExpenseStatus::Rejected => overview.rejected_expenses += 1,
                ExpenseStatus::Approved => {
                    overview.approved_expenses += 1;
                    approved_amounts.push(amount.as_str());
                }
            }
        }
        overview.approved_total = sum_decimals(approved_amounts)?;

        Ok(overview)
    }

    pub async fn list_rules(
        &self,
        company_id: CompanyId,
    ) -> Result<Vec<RuleView>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let rules = super::rule::company_rules(&mut conn, company_id).await?;

        let mut views = Vec::with_capacity(rules.len());
        for rule in rules {
            let approver = fetch_user(&mut conn, rule.approver_id).await?;
            views.push(RuleView { rule, approver_name: approver.name });
        }
        Ok(views)
    }
}

fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(now)
}

fn optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|raw| decode_timestamp(&raw)).transpose()
}

fn parse_approval_status(raw: &str) -> Result<ApprovalStatus, RepositoryError> {
    ApprovalStatus::parse(raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approval status `{raw}`")))
}

fn parse_expense_status(raw: &str) -> Result<ExpenseStatus, RepositoryError> {
    ExpenseStatus::parse(raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown expense status `{raw}`")))
}
