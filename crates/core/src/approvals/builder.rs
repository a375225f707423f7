use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalRule;
use crate::domain::{ApprovalRuleId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepSource {
    Manager,
    Rule { rule_id: ApprovalRuleId },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub approver_id: UserId,
    pub sequence_order: i64,
    pub source: StepSource,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub steps: Vec<PlannedStep>,
}

impl WorkflowPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

/// Lays out the approval chain for a freshly submitted expense.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorkflowBuilder;

impl WorkflowBuilder {
    /// The submitter's manager goes first, then every non-manager rule of the
    /// company in `(sequence_order, id)` order. Sequence numbers are dense from 1
    /// and an approver appears at most once.
    pub fn plan(manager_id: Option<UserId>, rules: &[ApprovalRule]) -> WorkflowPlan {
        let mut ordered = rules.iter().filter(|rule| !rule.is_manager_approver).collect::<Vec<_>>();
        ordered.sort_by_key(|rule| (rule.sequence_order, rule.id));

        let mut seen = HashSet::new();
        let mut steps = Vec::with_capacity(ordered.len() + 1);

        let candidates = manager_id
            .map(|manager_id| (manager_id, StepSource::Manager))
            .into_iter()
            .chain(
                ordered
                    .into_iter()
                    .map(|rule| (rule.approver_id, StepSource::Rule { rule_id: rule.id })),
            );

        for (approver_id, source) in candidates {
            if !seen.insert(approver_id) {
                continue;
            }
            steps.push(PlannedStep {
                approver_id,
                sequence_order: steps.len() as i64 + 1,
                source,
            });
        }

        WorkflowPlan { steps }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{TimeZone, Utc};

    use crate::domain::approval::ApprovalRule;
    use crate::domain::{ApprovalRuleId, CompanyId, UserId};

    pub fn rule(id: i64, sequence: i64, approver: i64) -> ApprovalRule {
        ApprovalRule {
            id: ApprovalRuleId(id),
            company_id: CompanyId(1),
            name: format!("rule-{id}"),
            sequence_order: sequence,
            approver_id: UserId(approver),
            is_manager_approver: false,
            percentage_rule: None,
            specific_approver_rule: false,
            created_at: Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).single().expect("timestamp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::rule;
    use super::{StepSource, WorkflowBuilder};
    use crate::domain::{ApprovalRuleId, UserId};

    fn approvers(plan: &super::WorkflowPlan) -> Vec<(i64, i64)> {
        plan.steps.iter().map(|step| (step.approver_id.0, step.sequence_order)).collect()
    }

    #[test]
    fn manager_first_then_rules_by_sequence_regardless_of_input_order() {
        let rules = vec![rule(3, 30, 103), rule(1, 10, 101), rule(2, 20, 102)];
        let plan = WorkflowBuilder::plan(Some(UserId(50)), &rules);

        assert_eq!(approvers(&plan), vec![(50, 1), (101, 2), (102, 3), (103, 4)]);
        assert_eq!(plan.steps[0].source, StepSource::Manager);
        assert_eq!(plan.steps[1].source, StepSource::Rule { rule_id: ApprovalRuleId(1) });
    }

    #[test]
    fn rules_start_at_one_without_a_manager() {
        let plan = WorkflowBuilder::plan(None, &[rule(1, 5, 101)]);
        assert_eq!(approvers(&plan), vec![(101, 1)]);
    }

    #[test]
    fn manager_approver_rules_are_skipped() {
        let mut manager_rule = rule(1, 1, 101);
        manager_rule.is_manager_approver = true;
        let plan = WorkflowBuilder::plan(Some(UserId(50)), &[manager_rule, rule(2, 2, 102)]);

        assert_eq!(approvers(&plan), vec![(50, 1), (102, 2)]);
    }

    #[test]
    fn duplicate_approvers_keep_their_first_position() {
        let rules = vec![rule(1, 1, 50), rule(2, 2, 101), rule(3, 3, 101)];
        let plan = WorkflowBuilder::plan(Some(UserId(50)), &rules);

        assert_eq!(approvers(&plan), vec![(50, 1), (101, 2)]);
    }

    #[test]
    fn ties_on_sequence_fall_back_to_rule_id() {
        let rules = vec![rule(9, 1, 109), rule(4, 1, 104)];
        let plan = WorkflowBuilder::plan(None, &rules);

        assert_eq!(approvers(&plan), vec![(104, 1), (109, 2)]);
    }

    #[test]
    fn no_manager_and_no_rules_yields_empty_plan() {
        let plan = WorkflowBuilder::plan(None, &[]);
        assert!(plan.is_empty());
        assert_eq!(plan.len(), 0);
    }
}
