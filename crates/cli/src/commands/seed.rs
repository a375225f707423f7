use crate::commands::{prepare, CommandResult};
use tallyflow_db::{connect_with_settings, migrations, DemoSeedDataset, SeedExpenseInfo};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seed_result = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result = if verification.all_present {
            Ok(seed_result.expenses_seeded)
        } else {
            Err(("seed_verification", failed_checks_message(&verification.checks), 6u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(expenses) => CommandResult::success("seed", seeded_message(&expenses)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn seeded_message(expenses: &[SeedExpenseInfo]) -> String {
    let lines = expenses
        .iter()
        .map(|expense| {
            format!(
                "  - expense {}: {} ({})",
                expense.expense_id,
                expense.status.as_str(),
                expense.description
            )
        })
        .collect::<Vec<_>>();
    format!("demo dataset loaded for company 9001 (Northwind):\n{}", lines.join("\n"))
}

fn failed_checks_message(checks: &[(&'static str, bool)]) -> String {
    let failed_checks = checks
        .iter()
        .filter_map(|(check, passed)| (!passed).then_some(*check))
        .collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use tallyflow_core::domain::expense::ExpenseStatus;
    use tallyflow_core::domain::ExpenseId;
    use tallyflow_db::SeedExpenseInfo;

    use super::{failed_checks_message, seeded_message};

    #[test]
    fn verification_error_message_targets_failed_checks() {
        let checks = [
            ("users", true),
            ("expense-9302-approved", false),
            ("expense-9304-pending-partial", false),
        ];

        assert_eq!(
            failed_checks_message(&checks),
            "Seed verification failed for checks: expense-9302-approved, \
             expense-9304-pending-partial"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        let checks = [("companies", true), ("users", true)];
        assert_eq!(failed_checks_message(&checks), "Some seed data failed to load");
    }

    #[test]
    fn seeded_message_lists_each_expense() {
        let message = seeded_message(&[SeedExpenseInfo {
            expense_id: ExpenseId(9301),
            status: ExpenseStatus::Pending,
            description: "EUR travel claim",
        }]);
        assert!(message.ends_with("  - expense 9301: pending (EUR travel claim)"));
    }
}
