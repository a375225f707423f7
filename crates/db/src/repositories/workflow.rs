use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use tallyflow_core::approvals::{
    evaluate_conditional, ConditionalApprovalMode, ConditionalEvaluation, DecisionOutcome,
    DecisionProcessor, DecisionRequest, StepUpdate, WorkflowBuilder,
};
use tallyflow_core::domain::approval::{ApprovalStatus, ExpenseApproval};
use tallyflow_core::domain::expense::ExpenseStatus;
use tallyflow_core::domain::{CompanyId, ExpenseApprovalId, ExpenseId, UserId};
use tallyflow_core::errors::DomainError;

use super::expense::{fetch_expense, lock_expense, set_status};
use super::rule::company_rules;
use super::user::fetch_user;
use super::{column, decode_timestamp, encode_timestamp, RepositoryError};
use crate::connection::{begin_write, DbPool};

const STEP_COLUMNS: &str = "id, expense_id, approver_id, sequence_order, status, comments, \
     approved_at, created_at";

/// Transactional writes for approval workflows: building the step list for a
/// new expense and applying decisions to it.
#[derive(Clone)]
pub struct SqlWorkflowStore {
    pool: DbPool,
    processor: DecisionProcessor,
}

impl SqlWorkflowStore {
    pub fn new(pool: DbPool, mode: ConditionalApprovalMode) -> Self {
        Self { pool, processor: DecisionProcessor::new(mode) }
    }

    pub fn mode(&self) -> ConditionalApprovalMode {
        self.processor.mode()
    }

    /// Materializes the approval steps of an existing pending expense. Either
    /// every step is written or none is.
    pub async fn build_workflow(
        &self,
        expense_id: ExpenseId,
        company_id: CompanyId,
    ) -> Result<Vec<ExpenseApproval>, RepositoryError> {
        let mut tx = begin_write(&self.pool).await?;
        let steps = build_workflow_in(&mut tx, expense_id, company_id, Utc::now()).await?;
        tx.commit().await?;
        Ok(steps)
    }

    /// Applies one approver's decision and everything it implies in a single
    /// transaction. The expense row is write-locked before anything is read, so
    /// a concurrent decision on the same expense sees the committed result.
    pub async fn decide(
        &self,
        request: &DecisionRequest,
    ) -> Result<DecisionOutcome, RepositoryError> {
        let mut tx = begin_write(&self.pool).await?;

        if !lock_expense(&mut tx, request.expense_id).await? {
            return Err(RepositoryError::not_found("expense", request.expense_id));
        }

        let expense = fetch_expense(&mut tx, request.expense_id).await?;
        let steps = steps_in(&mut tx, expense.id).await?;
        let rules = match self.processor.mode() {
            ConditionalApprovalMode::AutoApprove => {
                company_rules(&mut tx, expense.company_id).await?
            }
            ConditionalApprovalMode::Informational => Vec::new(),
        };

        let plan = self.processor.plan(&expense, &steps, &rules, request)?;
        let decided_at = Utc::now();

        for update in plan.updates() {
            let applied = apply_step_update(&mut tx, update, decided_at).await?;
            if !applied && update.approval_id == plan.decided.approval_id {
                return Err(DomainError::NoPendingApprovalForApprover {
                    expense_id: expense.id,
                    approver_id: request.approver_id,
                }
                .into());
            }
        }

        if plan.resulting_status != expense.status {
            set_status(&mut tx, expense.id, plan.resulting_status).await?;
        }

        tx.commit().await?;

        debug!(
            event_name = "workflow.decision.persisted",
            expense_id = %expense.id,
            approver_id = %request.approver_id,
            updates = plan.updates().count(),
            "decision persisted"
        );

        Ok(DecisionOutcome::from(&plan))
    }

    /// Read-only check of the company's conditional rules against the
    /// expense's current steps.
    pub async fn conditional_status(
        &self,
        expense_id: ExpenseId,
        company_id: CompanyId,
    ) -> Result<ConditionalEvaluation, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let expense = fetch_expense(&mut conn, expense_id).await?;
        ensure_company(expense.company_id, company_id, expense_id)?;

        let rules = company_rules(&mut conn, company_id).await?;
        let steps = steps_in(&mut conn, expense_id).await?;
        Ok(evaluate_conditional(&rules, &steps))
    }

    pub async fn steps_for(
        &self,
        expense_id: ExpenseId,
    ) -> Result<Vec<ExpenseApproval>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        steps_in(&mut conn, expense_id).await
    }
}

pub(crate) async fn build_workflow_in(
    conn: &mut SqliteConnection,
    expense_id: ExpenseId,
    company_id: CompanyId,
    created_at: DateTime<Utc>,
) -> Result<Vec<ExpenseApproval>, RepositoryError> {
    let expense = fetch_expense(conn, expense_id).await?;
    ensure_company(expense.company_id, company_id, expense_id)?;

    if expense.status != ExpenseStatus::Pending {
        return Err(DomainError::InvalidExpenseState { expense_id, status: expense.status }.into());
    }

    let (existing,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM expense_approvals WHERE expense_id = ?")
            .bind(expense_id.0)
            .fetch_one(&mut *conn)
            .await?;
    if existing > 0 {
        return Err(DomainError::WorkflowAlreadyBuilt { expense_id }.into());
    }

    let employee = fetch_user(conn, expense.employee_id).await?;
    let rules = company_rules(conn, company_id).await?;
    let plan = WorkflowBuilder::plan(employee.manager_id, &rules);

    for step in &plan.steps {
        sqlx::query(
            "INSERT INTO expense_approvals (expense_id, approver_id, sequence_order, status,
                                            created_at)
             VALUES (?, ?, ?, 'pending', ?)",
        )
        .bind(expense_id.0)
        .bind(step.approver_id.0)
        .bind(step.sequence_order)
        .bind(encode_timestamp(created_at))
        .execute(&mut *conn)
        .await?;
    }

    if plan.is_empty() {
        warn!(
            event_name = "workflow.empty",
            expense_id = %expense_id,
            employee_id = %expense.employee_id,
            "expense has no approvers and will stay pending"
        );
    }

    steps_in(conn, expense_id).await
}

pub(crate) async fn steps_in(
    conn: &mut SqliteConnection,
    expense_id: ExpenseId,
) -> Result<Vec<ExpenseApproval>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {STEP_COLUMNS} FROM expense_approvals
         WHERE expense_id = ?
         ORDER BY sequence_order, id"
    ))
    .bind(expense_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_step).collect()
}

fn row_to_step(row: &SqliteRow) -> Result<ExpenseApproval, RepositoryError> {
    let status: String = column(row, "status")?;
    Ok(ExpenseApproval {
        id: ExpenseApprovalId(column(row, "id")?),
        expense_id: ExpenseId(column(row, "expense_id")?),
        approver_id: UserId(column(row, "approver_id")?),
        sequence_order: column(row, "sequence_order")?,
        status: ApprovalStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown approval status `{status}`")))?,
        comments: column(row, "comments")?,
        approved_at: column::<Option<String>>(row, "approved_at")?
            .map(|raw| decode_timestamp(&raw))
            .transpose()?,
        created_at: decode_timestamp(&column::<String>(row, "created_at")?)?,
    })
}

// Conditional on the step still being pending; false means someone got there first.
async fn apply_step_update(
    conn: &mut SqliteConnection,
    update: &StepUpdate,
    decided_at: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let result = if update.stamp_decided_at {
        sqlx::query(
            "UPDATE expense_approvals SET status = ?, comments = ?, approved_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(update.status.as_str())
        .bind(&update.comments)
        .bind(encode_timestamp(decided_at))
        .bind(update.approval_id.0)
        .execute(&mut *conn)
        .await?
    } else {
        sqlx::query(
            "UPDATE expense_approvals SET status = ?, comments = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(update.status.as_str())
        .bind(&update.comments)
        .bind(update.approval_id.0)
        .execute(&mut *conn)
        .await?
    };

    Ok(result.rows_affected() == 1)
}

fn ensure_company(
    actual: CompanyId,
    expected: CompanyId,
    expense_id: ExpenseId,
) -> Result<(), RepositoryError> {
    if actual == expected {
        Ok(())
    } else {
        Err(DomainError::ConstraintViolation(format!(
            "expense {expense_id} does not belong to company {expected}"
        ))
        .into())
    }
}
