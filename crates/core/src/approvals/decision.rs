use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::approvals::conditional::{evaluate_conditional, ConditionalMatch};
use crate::approvals::status::{derive_expense_status, next_pending_approver};
use crate::domain::approval::{ApprovalRule, ApprovalStatus, Decision, ExpenseApproval};
use crate::domain::expense::{Expense, ExpenseStatus};
use crate::domain::{ExpenseApprovalId, ExpenseId, UserId};
use crate::errors::DomainError;

pub const CASCADE_REJECTION_COMMENT: &str = "Auto-rejected due to earlier rejection";
pub const CONDITIONAL_APPROVAL_COMMENT: &str = "Auto-approved by conditional rule";

/// What a satisfied conditional rule does to the remaining steps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionalApprovalMode {
    /// Rules are reported but never change state.
    #[default]
    Informational,
    /// A satisfied rule approves every remaining pending step.
    AutoApprove,
}

impl ConditionalApprovalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Informational => "informational",
            Self::AutoApprove => "auto_approve",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "informational" => Some(Self::Informational),
            "auto_approve" => Some(Self::AutoApprove),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub expense_id: ExpenseId,
    pub approver_id: UserId,
    pub decision: Decision,
    pub comments: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepUpdate {
    pub approval_id: ExpenseApprovalId,
    pub approver_id: UserId,
    pub status: ApprovalStatus,
    pub comments: Option<String>,
    /// Only the acting approver's own step records a decision timestamp.
    pub stamp_decided_at: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionPlan {
    pub expense_id: ExpenseId,
    pub decided: StepUpdate,
    pub cascaded: Vec<StepUpdate>,
    pub conditionally_approved: Vec<StepUpdate>,
    pub conditional_match: Option<ConditionalMatch>,
    pub resulting_status: ExpenseStatus,
    pub next_approver: Option<UserId>,
}

impl DecisionPlan {
    /// Every step write in the order it must be applied.
    pub fn updates(&self) -> impl Iterator<Item = &StepUpdate> {
        std::iter::once(&self.decided)
            .chain(self.cascaded.iter())
            .chain(self.conditionally_approved.iter())
    }

    pub fn apply(&self, steps: &mut [ExpenseApproval], decided_at: DateTime<Utc>) {
        for update in self.updates() {
            if let Some(step) = steps.iter_mut().find(|step| step.id == update.approval_id) {
                step.status = update.status;
                step.comments = update.comments.clone();
                if update.stamp_decided_at {
                    step.approved_at = Some(decided_at);
                }
            }
        }
    }
}

/// What a committed decision did, as reported to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub expense_id: ExpenseId,
    pub expense_status: ExpenseStatus,
    pub cascaded_rejections: Vec<UserId>,
    pub conditional_approvals: Vec<UserId>,
    pub conditional_match: Option<ConditionalMatch>,
    pub next_approver: Option<UserId>,
}

impl From<&DecisionPlan> for DecisionOutcome {
    fn from(plan: &DecisionPlan) -> Self {
        Self {
            expense_id: plan.expense_id,
            expense_status: plan.resulting_status,
            cascaded_rejections: plan.cascaded.iter().map(|update| update.approver_id).collect(),
            conditional_approvals: plan
                .conditionally_approved
                .iter()
                .map(|update| update.approver_id)
                .collect(),
            conditional_match: plan.conditional_match.clone(),
            next_approver: plan.next_approver,
        }
    }
}

/// Turns one approver's verdict into the full set of step and expense changes.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecisionProcessor {
    mode: ConditionalApprovalMode,
}

impl DecisionProcessor {
    pub fn new(mode: ConditionalApprovalMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ConditionalApprovalMode {
        self.mode
    }

    pub fn plan(
        &self,
        expense: &Expense,
        steps: &[ExpenseApproval],
        rules: &[ApprovalRule],
        request: &DecisionRequest,
    ) -> Result<DecisionPlan, DomainError> {
        if expense.status != ExpenseStatus::Pending {
            return Err(DomainError::InvalidExpenseState {
                expense_id: expense.id,
                status: expense.status,
            });
        }

        let target = steps
            .iter()
            .find(|step| step.approver_id == request.approver_id && step.is_pending())
            .ok_or(DomainError::NoPendingApprovalForApprover {
                expense_id: expense.id,
                approver_id: request.approver_id,
            })?;

        let decided = StepUpdate {
            approval_id: target.id,
            approver_id: target.approver_id,
            status: request.decision.as_status(),
            comments: normalize_comments(request.comments.as_deref()),
            stamp_decided_at: true,
        };

        let mut projected = steps.to_vec();
        let mut plan = DecisionPlan {
            expense_id: expense.id,
            decided,
            cascaded: Vec::new(),
            conditionally_approved: Vec::new(),
            conditional_match: None,
            resulting_status: ExpenseStatus::Pending,
            next_approver: None,
        };
        plan.apply(&mut projected, Utc::now());

        match request.decision {
            Decision::Rejected => {
                plan.cascaded = remaining_pending(
                    &projected,
                    ApprovalStatus::Rejected,
                    CASCADE_REJECTION_COMMENT,
                );
            }
            Decision::Approved => {
                let still_pending = projected.iter().any(ExpenseApproval::is_pending);
                if still_pending && self.mode == ConditionalApprovalMode::AutoApprove {
                    let evaluation = evaluate_conditional(rules, &projected);
                    if evaluation.satisfied {
                        plan.conditionally_approved = remaining_pending(
                            &projected,
                            ApprovalStatus::Approved,
                            CONDITIONAL_APPROVAL_COMMENT,
                        );
                        plan.conditional_match = evaluation.matched;
                    }
                }
            }
        }

        plan.apply(&mut projected, Utc::now());
        plan.resulting_status = derive_expense_status(&projected);
        plan.next_approver = next_pending_approver(&projected);

        Ok(plan)
    }
}

fn remaining_pending(
    steps: &[ExpenseApproval],
    status: ApprovalStatus,
    comment: &str,
) -> Vec<StepUpdate> {
    let mut pending = steps.iter().filter(|step| step.is_pending()).collect::<Vec<_>>();
    pending.sort_by_key(|step| (step.sequence_order, step.id));
    pending
        .into_iter()
        .map(|step| StepUpdate {
            approval_id: step.id,
            approver_id: step.approver_id,
            status,
            comments: Some(comment.to_string()),
            stamp_decided_at: false,
        })
        .collect()
}

fn normalize_comments(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|comments| !comments.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{
        ConditionalApprovalMode, DecisionProcessor, DecisionRequest, CASCADE_REJECTION_COMMENT,
        CONDITIONAL_APPROVAL_COMMENT,
    };
    use crate::approvals::builder::fixtures::rule;
    use crate::approvals::status::derive_expense_status;
    use crate::approvals::status::fixtures::step;
    use crate::domain::approval::ApprovalStatus::{Approved, Pending, Rejected};
    use crate::domain::approval::{Decision, ExpenseApproval};
    use crate::domain::expense::{Expense, ExpenseStatus};
    use crate::domain::{CompanyId, ExpenseId, UserId};
    use crate::errors::DomainError;

    fn expense(status: ExpenseStatus) -> Expense {
        Expense {
            id: ExpenseId(1),
            employee_id: UserId(5),
            company_id: CompanyId(1),
            amount: Decimal::new(4_250, 2),
            currency: "USD".to_string(),
            converted_amount: Decimal::new(4_250, 2),
            category: "Meals & Entertainment".to_string(),
            description: "Team lunch".to_string(),
            expense_date: NaiveDate::from_ymd_opt(2026, 3, 1).expect("date"),
            receipt_ref: None,
            status,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("timestamp"),
        }
    }

    fn three_steps() -> Vec<ExpenseApproval> {
        vec![step(1, 10, 1, Pending), step(2, 11, 2, Pending), step(3, 12, 3, Pending)]
    }

    fn request(approver: i64, decision: Decision) -> DecisionRequest {
        DecisionRequest {
            expense_id: ExpenseId(1),
            approver_id: UserId(approver),
            decision,
            comments: Some("  looks fine  ".to_string()),
        }
    }

    #[test]
    fn approvals_walk_the_chain_until_the_last_step() {
        let processor = DecisionProcessor::default();
        let mut steps = three_steps();
        let now = Utc::now();

        for (approver, expected_next) in [(10, Some(UserId(11))), (11, Some(UserId(12))), (12, None)] {
            let plan = processor
                .plan(&expense(ExpenseStatus::Pending), &steps, &[], &request(approver, Decision::Approved))
                .expect("approval plan");
            plan.apply(&mut steps, now);

            assert_eq!(plan.next_approver, expected_next);
            assert_eq!(plan.resulting_status, derive_expense_status(&steps));
        }

        assert_eq!(derive_expense_status(&steps), ExpenseStatus::Approved);
        assert!(steps.iter().all(|step| step.approved_at == Some(now)));
        assert_eq!(steps[0].comments.as_deref(), Some("looks fine"));
    }

    #[test]
    fn rejection_cascades_to_every_pending_step() {
        let mut steps = three_steps();
        steps[0].status = Approved;

        let plan = DecisionProcessor::default()
            .plan(&expense(ExpenseStatus::Pending), &steps, &[], &request(11, Decision::Rejected))
            .expect("rejection plan");

        assert_eq!(plan.resulting_status, ExpenseStatus::Rejected);
        assert_eq!(plan.cascaded.len(), 1);
        assert_eq!(plan.cascaded[0].approver_id, UserId(12));
        assert_eq!(plan.next_approver, None);

        plan.apply(&mut steps, Utc::now());
        assert_eq!(steps[0].status, Approved);
        assert_eq!(steps[1].status, Rejected);
        assert_eq!(steps[2].status, Rejected);
        assert_eq!(steps[2].comments.as_deref(), Some(CASCADE_REJECTION_COMMENT));
        assert_eq!(steps[2].approved_at, None);
    }

    #[test]
    fn approvers_need_not_wait_for_their_turn() {
        let plan = DecisionProcessor::default()
            .plan(&expense(ExpenseStatus::Pending), &three_steps(), &[], &request(12, Decision::Approved))
            .expect("out of order approval");

        assert_eq!(plan.resulting_status, ExpenseStatus::Pending);
        assert_eq!(plan.next_approver, Some(UserId(10)));
    }

    #[test]
    fn second_decision_by_same_approver_is_refused() {
        let processor = DecisionProcessor::default();
        let mut steps = three_steps();
        processor
            .plan(&expense(ExpenseStatus::Pending), &steps, &[], &request(10, Decision::Approved))
            .expect("first decision")
            .apply(&mut steps, Utc::now());

        let error = processor
            .plan(&expense(ExpenseStatus::Pending), &steps, &[], &request(10, Decision::Rejected))
            .expect_err("already decided");
        assert_eq!(
            error,
            DomainError::NoPendingApprovalForApprover { expense_id: ExpenseId(1), approver_id: UserId(10) }
        );
    }

    #[test]
    fn decided_expense_is_frozen() {
        for status in [ExpenseStatus::Approved, ExpenseStatus::Rejected] {
            let error = DecisionProcessor::default()
                .plan(&expense(status), &three_steps(), &[], &request(10, Decision::Approved))
                .expect_err("terminal expense");
            assert_eq!(error, DomainError::InvalidExpenseState { expense_id: ExpenseId(1), status });
        }
    }

    #[test]
    fn strangers_have_no_step_to_decide() {
        let error = DecisionProcessor::default()
            .plan(&expense(ExpenseStatus::Pending), &three_steps(), &[], &request(99, Decision::Approved))
            .expect_err("not an approver");
        assert!(matches!(error, DomainError::NoPendingApprovalForApprover { .. }));
    }

    #[test]
    fn informational_mode_leaves_satisfied_rules_alone() {
        let mut cfo = rule(1, 2, 10);
        cfo.specific_approver_rule = true;

        let plan = DecisionProcessor::new(ConditionalApprovalMode::Informational)
            .plan(&expense(ExpenseStatus::Pending), &three_steps(), &[cfo], &request(10, Decision::Approved))
            .expect("plan");

        assert!(plan.conditionally_approved.is_empty());
        assert_eq!(plan.conditional_match, None);
        assert_eq!(plan.resulting_status, ExpenseStatus::Pending);
    }

    #[test]
    fn auto_approve_mode_finishes_the_workflow_when_a_rule_holds() {
        let mut cfo = rule(1, 2, 10);
        cfo.specific_approver_rule = true;
        let mut steps = three_steps();

        let plan = DecisionProcessor::new(ConditionalApprovalMode::AutoApprove)
            .plan(&expense(ExpenseStatus::Pending), &steps, &[cfo], &request(10, Decision::Approved))
            .expect("plan");

        assert_eq!(plan.resulting_status, ExpenseStatus::Approved);
        assert_eq!(plan.conditionally_approved.len(), 2);
        assert_eq!(plan.next_approver, None);
        assert!(plan.conditional_match.is_some());

        plan.apply(&mut steps, Utc::now());
        assert!(steps.iter().all(|step| step.status == Approved));
        assert_eq!(steps[1].comments.as_deref(), Some(CONDITIONAL_APPROVAL_COMMENT));
    }

    #[test]
    fn auto_approve_mode_waits_while_threshold_is_unmet() {
        let mut half = rule(1, 2, 10);
        half.percentage_rule = Some(50);

        let plan = DecisionProcessor::new(ConditionalApprovalMode::AutoApprove)
            .plan(&expense(ExpenseStatus::Pending), &three_steps(), &[half], &request(10, Decision::Approved))
            .expect("plan");

        assert!(plan.conditionally_approved.is_empty());
        assert_eq!(plan.next_approver, Some(UserId(11)));
    }

    #[test]
    fn blank_comments_are_dropped() {
        let mut blank = request(10, Decision::Approved);
        blank.comments = Some("   ".to_string());

        let plan = DecisionProcessor::default()
            .plan(&expense(ExpenseStatus::Pending), &three_steps(), &[], &blank)
            .expect("plan");
        assert_eq!(plan.decided.comments, None);
    }

    #[test]
    fn mode_parses_config_spellings() {
        assert_eq!(ConditionalApprovalMode::parse("auto-approve"), Some(ConditionalApprovalMode::AutoApprove));
        assert_eq!(ConditionalApprovalMode::parse(" Informational "), Some(ConditionalApprovalMode::Informational));
        assert_eq!(ConditionalApprovalMode::parse("always"), None);
    }
}
