use bitquote_db::{migrations, SeedDataset};

use crate::commands::{
    self, CommandResult, StepFailure, EXIT_EXECUTION, EXIT_VERIFICATION,
};

pub fn run() -> CommandResult {
    match execute() {
        Ok(message) => CommandResult::success("seed", message),
        Err(failure) => failure.into_result("seed"),
    }
}

fn execute() -> Result<String, StepFailure> {
    let config = commands::load_config()?;
    let runtime = commands::runtime()?;

    runtime.block_on(async {
        let pool = commands::open_pool(&config).await?;
        let outcome = seed_and_verify(&pool).await;
        pool.close().await;
        outcome
    })
}

async fn seed_and_verify(pool: &bitquote_db::DbPool) -> Result<String, StepFailure> {
    migrations::run_pending(pool)
        .await
        .map_err(|error| StepFailure::new("migration", error.to_string(), EXIT_EXECUTION))?;

    SeedDataset::load(pool)
        .await
        .map_err(|error| StepFailure::new("seed_execution", error.to_string(), EXIT_EXECUTION))?;

    let verification = SeedDataset::verify(pool).await.map_err(|error| {
        StepFailure::new("seed_verification", error.to_string(), EXIT_VERIFICATION)
    })?;

    if !verification.all_present {
        return Err(StepFailure::new(
            "seed_verification",
            failed_checks_message(&verification.checks),
            EXIT_VERIFICATION,
        ));
    }

    Ok("demo directory and catalog fixtures loaded and verified".to_string())
}

fn failed_checks_message(checks: &[(&'static str, bool)]) -> String {
    let failed: Vec<_> =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect();
    if failed.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed.join(", "))
    }
}
