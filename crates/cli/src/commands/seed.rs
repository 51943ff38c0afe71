use huddle_db::RoomSeedDataset;

use crate::commands::{async_runtime, load_config, open_database, CommandResult, StepFailure};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match async_runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;

        let seeded = RoomSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = RoomSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let outcome = if verification.all_present {
            Ok::<_, StepFailure>(seeded.rooms_seeded)
        } else {
            let missing = verification
                .checks
                .iter()
                .filter_map(|(room, present)| (!present).then_some(*room))
                .collect::<Vec<_>>();
            Err(("seed_verification", verification_message(&missing), 6u8))
        };

        pool.close().await;
        outcome
    });

    match result {
        Ok(rooms) => {
            let lines: Vec<String> =
                rooms.iter().map(|(id, name)| format!("  - room {id}: {name}")).collect();
            CommandResult::success(
                "seed",
                format!("meeting rooms available ({}):\n{}", rooms.len(), lines.join("\n")),
            )
        }
        Err(failure) => CommandResult::from_step("seed", failure),
    }
}

fn verification_message(missing: &[&str]) -> String {
    if missing.is_empty() {
        "some rooms failed to load".to_string()
    } else {
        format!("room verification failed for: {}", missing.join(", "))
    }
}
