pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod service;

pub use connection::{begin_write, connect, connect_with_settings, DbPool};
pub use fixtures::{DemoSeedDataset, SeedExpenseInfo, SeedResult, VerificationResult};
pub use repositories::RepositoryError;
pub use service::{ApproverDashboard, ExpenseService, RegisteredCompany, SubmittedExpense};
