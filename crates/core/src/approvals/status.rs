use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalStatus, ExpenseApproval};
use crate::domain::expense::ExpenseStatus;
use crate::domain::UserId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTally {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

impl StepTally {
    pub fn from_steps(steps: &[ExpenseApproval]) -> Self {
        steps.iter().fold(Self::default(), |mut tally, step| {
            tally.total += 1;
            match step.status {
                ApprovalStatus::Pending => tally.pending += 1,
                ApprovalStatus::Approved => tally.approved += 1,
                ApprovalStatus::Rejected => tally.rejected += 1,
            }
            tally
        })
    }
}

/// The expense status implied by its steps. Any rejection wins; an expense
/// with no steps at all never leaves `pending`.
pub fn derive_expense_status(steps: &[ExpenseApproval]) -> ExpenseStatus {
    let tally = StepTally::from_steps(steps);
    if tally.rejected > 0 {
        ExpenseStatus::Rejected
    } else if tally.total > 0 && tally.pending == 0 {
        ExpenseStatus::Approved
    } else {
        ExpenseStatus::Pending
    }
}

/// Approver of the lowest-sequence pending step.
pub fn next_pending_approver(steps: &[ExpenseApproval]) -> Option<UserId> {
    steps
        .iter()
        .filter(|step| step.is_pending())
        .min_by_key(|step| (step.sequence_order, step.id))
        .map(|step| step.approver_id)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{TimeZone, Utc};

    use crate::domain::approval::{ApprovalStatus, ExpenseApproval};
    use crate::domain::{ExpenseApprovalId, ExpenseId, UserId};

    pub fn step(id: i64, approver: i64, sequence: i64, status: ApprovalStatus) -> ExpenseApproval {
        ExpenseApproval {
            id: ExpenseApprovalId(id),
            expense_id: ExpenseId(1),
            approver_id: UserId(approver),
            sequence_order: sequence,
            status,
            comments: None,
            approved_at: None,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("timestamp"),
        }
    }
}
