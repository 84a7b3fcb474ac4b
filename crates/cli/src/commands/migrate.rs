use serde_json::json;

use crate::commands::{connect_and_migrate, current_thread_runtime, load_config, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("migrate") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match current_thread_runtime("migrate") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let (pool, applied) = connect_and_migrate(&config).await?;
        pool.close().await;
        Ok::<Vec<i64>, (&'static str, String, u8)>(applied)
    });

    match result {
        Ok(applied) if applied.is_empty() => {
            CommandResult::success("migrate", "schema already up to date")
        }
        Ok(applied) => CommandResult::success_with_details(
            "migrate",
            format!("applied {} pending migration(s)", applied.len()),
            Some(json!({ "applied_versions": applied })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
