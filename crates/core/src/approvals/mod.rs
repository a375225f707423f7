//! Approval workflow engine.
//!
//! Everything in here is pure: the db crate loads rows, asks these types what
//! should change, and writes the answer back inside one transaction.

pub mod builder;
pub mod conditional;
pub mod decision;
pub mod status;

pub use builder::{PlannedStep, StepSource, WorkflowBuilder, WorkflowPlan};
pub use conditional::{evaluate_conditional, ConditionalEvaluation, ConditionalMatch};
pub use decision::{
    ConditionalApprovalMode, DecisionOutcome, DecisionPlan, DecisionProcessor, DecisionRequest,
    StepUpdate, CASCADE_REJECTION_COMMENT, CONDITIONAL_APPROVAL_COMMENT,
};
pub use status::{derive_expense_status, next_pending_approver, StepTally};
