use serde::{Deserialize, Serialize};

use crate::approvals::status::StepTally;
use crate::domain::approval::{ApprovalRule, ApprovalStatus, ExpenseApproval};
use crate::domain::{ApprovalRuleId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionalMatch {
    SpecificApprover { rule_id: ApprovalRuleId, approver_id: UserId },
    Percentage { rule_id: ApprovalRuleId, threshold: u8, approved: usize, total: usize },
}

impl ConditionalMatch {
    pub fn rule_id(&self) -> ApprovalRuleId {
        match self {
            Self::SpecificApprover { rule_id, .. } | Self::Percentage { rule_id, .. } => *rule_id,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalEvaluation {
    pub satisfied: bool,
    pub matched: Option<ConditionalMatch>,
}

impl ConditionalEvaluation {
    fn matched(found: ConditionalMatch) -> Self {
        Self { satisfied: true, matched: Some(found) }
    }
}

/// First company rule, in `(sequence_order, id)` order, whose condition holds
/// for the expense's current steps.
pub fn evaluate_conditional(
    rules: &[ApprovalRule],
    steps: &[ExpenseApproval],
) -> ConditionalEvaluation {
    let mut ordered = rules.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|rule| (rule.sequence_order, rule.id));

    let tally = StepTally::from_steps(steps);

    for rule in ordered {
        if rule.specific_approver_rule && approver_has_approved(steps, rule.approver_id) {
            return ConditionalEvaluation::matched(ConditionalMatch::SpecificApprover {
                rule_id: rule.id,
                approver_id: rule.approver_id,
            });
        }

        if let Some(threshold) = rule.percentage_rule {
            if percentage_met(tally, threshold) {
                return ConditionalEvaluation::matched(ConditionalMatch::Percentage {
                    rule_id: rule.id,
                    threshold,
                    approved: tally.approved,
                    total: tally.total,
                });
            }
        }
    }

    ConditionalEvaluation::default()
}

fn approver_has_approved(steps: &[ExpenseApproval], approver_id: UserId) -> bool {
    steps
        .iter()
        .any(|step| step.approver_id == approver_id && step.status == ApprovalStatus::Approved)
}

// Integer form of approved / total * 100 >= threshold.
fn percentage_met(tally: StepTally, threshold: u8) -> bool {
    tally.total > 0 && tally.approved * 100 >= usize::from(threshold) * tally.total
}
