use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tallyflow_core::approvals::{
    ConditionalApprovalMode, ConditionalEvaluation, DecisionOutcome, DecisionRequest,
};
use tallyflow_core::auth::{authorize, authorize_company, Caller};
use tallyflow_core::currency::{format_amount, CurrencyConverter};
use tallyflow_core::domain::approval::{ApprovalRule, Decision, ExpenseApproval, NewApprovalRule};
use tallyflow_core::domain::company::{Company, NewCompany};
use tallyflow_core::domain::expense::{Expense, NewExpense};
use tallyflow_core::domain::user::{NewUser, Role, User};
use tallyflow_core::domain::{ExpenseId, UserId};
use tallyflow_core::errors::{ApplicationError, DomainError};
use tallyflow_core::hierarchy::ManagerGraph;

use crate::repositories::company::{fetch_company, insert_company};
use crate::repositories::expense::insert_expense;
use crate::repositories::rule::insert_rule;
use crate::repositories::user::{company_users, fetch_user, insert_user, update_manager};
use crate::repositories::workflow::build_workflow_in;
use crate::repositories::{
    CompanyOverview, DecisionRecord, ExpenseRepository, HistoryEntry, PendingApproval,
    PendingOrder, RuleView, SqlExpenseQueries, SqlExpenseRepository, SqlUserRepository,
    SqlWorkflowStore, TeamMemberSummary, UserRepository,
};
use crate::connection::{begin_write, DbPool};

const APPROVER_ROLES: &[Role] = &[Role::Admin, Role::Manager];
const ADMIN_ONLY: &[Role] = &[Role::Admin];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredCompany {
    pub company: Company,
    pub admin: User,
}

/// A freshly submitted expense and the approval steps built for it. An empty
/// `steps` list means nobody can approve the expense yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedExpense {
    pub expense: Expense,
    pub steps: Vec<ExpenseApproval>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverDashboard {
    pub team_size: u64,
    pub approved_this_month: u64,
    pub pending: u64,
}

/// Entry points for every expense workflow operation. Each call takes the
/// resolved [`Caller`] and checks role and company before touching storage.
#[derive(Clone)]
pub struct ExpenseService {
    pool: DbPool,
    converter: Arc<dyn CurrencyConverter>,
    users: Arc<dyn UserRepository>,
    expenses: Arc<dyn ExpenseRepository>,
    workflow: SqlWorkflowStore,
    queries: SqlExpenseQueries,
}

impl ExpenseService {
    pub fn new(
        pool: DbPool,
        converter: Arc<dyn CurrencyConverter>,
        mode: ConditionalApprovalMode,
    ) -> Self {
        Self {
            users: Arc::new(SqlUserRepository::new(pool.clone())),
            expenses: Arc::new(SqlExpenseRepository::new(pool.clone())),
            workflow: SqlWorkflowStore::new(pool.clone(), mode),
            queries: SqlExpenseQueries::new(pool.clone()),
            pool,
            converter,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn conditional_mode(&self) -> ConditionalApprovalMode {
        self.workflow.mode()
    }

    /// Resolves a user id to the caller identity used by every other entry point.
    pub async fn caller_for(&self, user_id: UserId) -> Result<Caller, ApplicationError> {
        let user = self.users.find_by_id(user_id).await?.ok_or_else(|| {
            ApplicationError::NotFound { entity: "user", id: user_id.to_string() }
        })?;
        Ok(Caller::from_user(&user))
    }

    /// Creates a company together with its first admin.
    pub async fn register_company(
        &self,
        company: NewCompany,
        admin_name: &str,
        admin_email: &str,
    ) -> Result<RegisteredCompany, ApplicationError> {
        let company = company.normalized()?;
        let now = Utc::now();

        let mut tx = begin_write(&self.pool).await.map_err(persistence)?;
        let company = insert_company(&mut tx, &company, now).await?;
        let admin = NewUser {
            name: admin_name.to_string(),
            email: admin_email.to_string(),
            role: Role::Admin,
            company_id: company.id,
            manager_id: None,
        }
        .normalized()?;
        let admin = insert_user(&mut tx, &admin, now).await?;
        tx.commit().await.map_err(persistence)?;

        info!(
            event_name = "company.registered",
            company_id = %company.id,
            admin_id = %admin.id,
            currency = %company.default_currency,
            "company registered"
        );

        Ok(RegisteredCompany { company, admin })
    }

    pub async fn create_user(
        &self,
        caller: &Caller,
        user: NewUser,
    ) -> Result<User, ApplicationError> {
        authorize(caller, ADMIN_ONLY).into_result()?;
        authorize_company(caller, user.company_id).into_result()?;
        let user = user.normalized()?;

        let mut tx = begin_write(&self.pool).await.map_err(persistence)?;
        if let Some(manager_id) = user.manager_id {
            let users = company_users(&mut tx, user.company_id).await?;
            ManagerGraph::new(&users).validate_assignment(None, user.company_id, manager_id)?;
            ensure_can_approve(&users, manager_id)?;
        }
        let created = insert_user(&mut tx, &user, Utc::now()).await?;
        tx.commit().await.map_err(persistence)?;

        info!(
            event_name = "user.created",
            user_id = %created.id,
            role = created.role.as_str(),
            created_by = %caller.user_id,
            "user created"
        );

        Ok(created)
    }

    /// Sets or clears a user's manager, refusing edges that would form a cycle.
    pub async fn assign_manager(
        &self,
        caller: &Caller,
        user_id: UserId,
        manager_id: Option<UserId>,
    ) -> Result<User, ApplicationError> {
        authorize(caller, ADMIN_ONLY).into_result()?;

        let mut tx = begin_write(&self.pool).await.map_err(persistence)?;
        let user = fetch_user(&mut tx, user_id).await?;
        authorize_company(caller, user.company_id).into_result()?;

        if let Some(manager_id) = manager_id {
            let users = company_users(&mut tx, user.company_id).await?;
            ManagerGraph::new(&users).validate_assignment(
                Some(user_id),
                user.company_id,
                manager_id,
            )?;
            ensure_can_approve(&users, manager_id)?;
        }

        let updated = update_manager(&mut tx, user_id, manager_id).await?;
        tx.commit().await.map_err(persistence)?;

        info!(
            event_name = "user.manager_assigned",
            user_id = %user_id,
            manager_id = ?manager_id.map(|id| id.0),
            "manager assignment updated"
        );

        Ok(updated)
    }

    /// Converts the amount into the company currency, then stores the expense
    /// and its approval steps in one transaction.
    pub async fn submit_expense(
        &self,
        caller: &Caller,
        submission: NewExpense,
    ) -> Result<SubmittedExpense, ApplicationError> {
        let now = Utc::now();
        let submission = submission.validated(now.date_naive())?;

        let company = {
            let mut conn = self.pool.acquire().await.map_err(persistence)?;
            fetch_company(&mut conn, caller.company_id).await?
        };

        let converted = self
            .converter
            .convert(submission.amount, &submission.currency, &company.default_currency)
            .await
            .map_err(|error| {
                warn!(
                    event_name = "expense.conversion_failed",
                    from = %submission.currency,
                    to = %company.default_currency,
                    error = %error,
                    "currency conversion failed"
                );
                DomainError::from(error)
            })?;

        let mut tx = begin_write(&self.pool).await.map_err(persistence)?;
        let employee = fetch_user(&mut tx, caller.user_id).await?;
        authorize_company(caller, employee.company_id).into_result()?;
        let expense = insert_expense(&mut tx, &employee, &submission, converted, now).await?;
        let steps = build_workflow_in(&mut tx, expense.id, expense.company_id, now).await?;
        tx.commit().await.map_err(persistence)?;

        info!(
            event_name = "expense.submitted",
            expense_id = %expense.id,
            employee_id = %employee.id,
            amount = %expense.amount,
            currency = %expense.currency,
            converted_amount = %expense.converted_amount,
            display_amount = %format_amount(expense.converted_amount, &company.default_currency),
            steps = steps.len(),
            "expense submitted"
        );

        Ok(SubmittedExpense { expense, steps })
    }

    /// Records the caller's approve/reject decision on their pending step.
    pub async fn decide(
        &self,
        caller: &Caller,
        expense_id: ExpenseId,
        decision: Decision,
        comments: Option<String>,
    ) -> Result<DecisionOutcome, ApplicationError> {
        authorize(caller, APPROVER_ROLES).into_result()?;
        self.ensure_expense_in_company(caller, expense_id).await?;

        let request = DecisionRequest {
            expense_id,
            approver_id: caller.user_id,
            decision,
            comments,
        };
        let outcome = self.workflow.decide(&request).await?;

        info!(
            event_name = "workflow.decision.applied",
            expense_id = %expense_id,
            approver_id = %caller.user_id,
            decision = decision.as_status().as_str(),
            expense_status = outcome.expense_status.as_str(),
            cascaded = outcome.cascaded_rejections.len(),
            auto_approved = outcome.conditional_approvals.len(),
            "approval decision applied"
        );

        Ok(outcome)
    }

    pub async fn create_approval_rule(
        &self,
        caller: &Caller,
        rule: NewApprovalRule,
    ) -> Result<ApprovalRule, ApplicationError> {
        authorize(caller, ADMIN_ONLY).into_result()?;
        authorize_company(caller, rule.company_id).into_result()?;

        let mut tx = begin_write(&self.pool).await.map_err(persistence)?;
        let users = company_users(&mut tx, rule.company_id).await?;
        if !users.iter().any(|user| user.id == rule.approver_id) {
            return Err(DomainError::ConstraintViolation(format!(
                "approver {} is not a member of company {}",
                rule.approver_id, rule.company_id
            ))
            .into());
        }
        ensure_can_approve(&users, rule.approver_id)?;
        let created = insert_rule(&mut tx, &rule, Utc::now()).await?;
        tx.commit().await.map_err(persistence)?;

        info!(
            event_name = "approval_rule.created",
            rule_id = %created.id,
            company_id = %created.company_id,
            sequence_order = created.sequence_order,
            conditional = created.is_conditional(),
            "approval rule created"
        );

        Ok(created)
    }

    pub async fn list_approval_rules(
        &self,
        caller: &Caller,
    ) -> Result<Vec<RuleView>, ApplicationError> {
        Ok(self.queries.list_rules(caller.company_id).await?)
    }

    pub async fn conditional_status(
        &self,
        caller: &Caller,
        expense_id: ExpenseId,
    ) -> Result<ConditionalEvaluation, ApplicationError> {
        authorize(caller, APPROVER_ROLES).into_result()?;
        self.ensure_expense_in_company(caller, expense_id).await?;
        Ok(self.workflow.conditional_status(expense_id, caller.company_id).await?)
    }

    pub async fn pending_for(
        &self,
        caller: &Caller,
        order: PendingOrder,
    ) -> Result<Vec<PendingApproval>, ApplicationError> {
        authorize(caller, APPROVER_ROLES).into_result()?;
        Ok(self.queries.pending_for(caller.user_id, order).await?)
    }

    /// Step history of an expense. Employees may only read their own expenses.
    pub async fn history_for(
        &self,
        caller: &Caller,
        expense_id: ExpenseId,
    ) -> Result<Vec<HistoryEntry>, ApplicationError> {
        let expense = self.ensure_expense_in_company(caller, expense_id).await?;
        if !caller.role.can_approve() && expense.employee_id != caller.user_id {
            return Err(ApplicationError::Forbidden(format!(
                "user {} may not view expense {expense_id}",
                caller.user_id
            )));
        }
        Ok(self.queries.history_for(expense_id).await?)
    }

    pub async fn decisions_by(
        &self,
        caller: &Caller,
        limit: u32,
    ) -> Result<Vec<DecisionRecord>, ApplicationError> {
        authorize(caller, APPROVER_ROLES).into_result()?;
        Ok(self.queries.decisions_by(caller.user_id, limit).await?)
    }

    pub async fn team_overview(
        &self,
        caller: &Caller,
    ) -> Result<Vec<TeamMemberSummary>, ApplicationError> {
        authorize(caller, APPROVER_ROLES).into_result()?;
        Ok(self.queries.team_overview(caller.user_id).await?)
    }

    pub async fn company_overview(
        &self,
        caller: &Caller,
    ) -> Result<CompanyOverview, ApplicationError> {
        authorize(caller, ADMIN_ONLY).into_result()?;
        Ok(self.queries.company_overview(caller.company_id).await?)
    }

    pub async fn expenses_for_employee(
        &self,
        caller: &Caller,
    ) -> Result<Vec<Expense>, ApplicationError> {
        Ok(self.expenses.list_for_employee(caller.user_id).await?)
    }

    pub async fn dashboard(&self, caller: &Caller) -> Result<ApproverDashboard, ApplicationError> {
        authorize(caller, APPROVER_ROLES).into_result()?;
        let team_size = self.queries.team_size(caller.user_id).await?;
        let approved_this_month =
            self.queries.approved_this_month(caller.user_id, Utc::now()).await?;
        let pending = self.queries.pending_for(caller.user_id, PendingOrder::default()).await?;

        Ok(ApproverDashboard {
            team_size,
            approved_this_month,
            pending: pending.len() as u64,
        })
    }

    async fn ensure_expense_in_company(
        &self,
        caller: &Caller,
        expense_id: ExpenseId,
    ) -> Result<Expense, ApplicationError> {
        let expense = self.expenses.find_by_id(expense_id).await?.ok_or_else(|| {
            ApplicationError::NotFound { entity: "expense", id: expense_id.to_string() }
        })?;
        authorize_company(caller, expense.company_id).into_result()?;
        Ok(expense)
    }
}

fn ensure_can_approve(users: &[User], approver_id: UserId) -> Result<(), DomainError> {
    match users.iter().find(|user| user.id == approver_id) {
        Some(user) if user.role.can_approve() => Ok(()),
        Some(user) => Err(DomainError::ConstraintViolation(format!(
            "user {approver_id} has role `{}` and cannot approve expenses",
            user.role.as_str()
        ))),
        None => Err(DomainError::ConstraintViolation(format!(
            "approver {approver_id} does not exist"
        ))),
    }
}

fn persistence(error: sqlx::Error) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}
