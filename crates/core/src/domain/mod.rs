pub mod approval;
pub mod company;
pub mod expense;
pub mod user;

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(CompanyId);
numeric_id!(UserId);
numeric_id!(ExpenseId);
numeric_id!(ApprovalRuleId);
numeric_id!(ExpenseApprovalId);
