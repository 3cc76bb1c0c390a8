use bitquote_db::migrations;

use crate::commands::{self, CommandResult, StepFailure, EXIT_EXECUTION};

pub fn run() -> CommandResult {
    match execute() {
        Ok(message) => CommandResult::success("migrate", message),
        Err(failure) => failure.into_result("migrate"),
    }
}

fn execute() -> Result<String, StepFailure> {
    let config = commands::load_config()?;
    let runtime = commands::runtime()?;

    runtime.block_on(async {
        let pool = commands::open_pool(&config).await?;
        let outcome = migrations::run_pending(&pool).await;
        pool.close().await;

        outcome.map_err(|error| {
            StepFailure::new("migration", error.to_string(), EXIT_EXECUTION)
        })?;
        Ok(format!("pending migrations applied to `{}`", config.database.url))
    })
}
