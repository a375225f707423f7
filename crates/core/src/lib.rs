pub mod approvals;
pub mod auth;
pub mod config;
pub mod currency;
pub mod domain;
pub mod errors;
pub mod hierarchy;

pub use approvals::{
    derive_expense_status, evaluate_conditional, ConditionalApprovalMode, ConditionalEvaluation,
    ConditionalMatch, DecisionOutcome, DecisionPlan, DecisionProcessor, DecisionRequest,
    WorkflowBuilder, WorkflowPlan,
};
pub use auth::{authorize, authorize_company, AccessDecision, Caller};
pub use currency::{format_amount, CurrencyConverter, ExchangeRate, StaticRateConverter};
pub use domain::approval::{
    ApprovalRule, ApprovalStatus, Decision, ExpenseApproval, NewApprovalRule,
};
pub use domain::company::{Company, NewCompany};
pub use domain::expense::{Expense, ExpenseStatus, NewExpense};
pub use domain::user::{NewUser, Role, User};
pub use domain::{ApprovalRuleId, CompanyId, ExpenseApprovalId, ExpenseId, UserId};
pub use errors::{ApplicationError, DomainError, ErrorKind, InterfaceError};
pub use hierarchy::ManagerGraph;
