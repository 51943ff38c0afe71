use std::sync::Arc;

use huddle_agent::{booking_registry, system_clock, Safety};
use huddle_db::InMemoryBookingStore;

use crate::commands::CommandResult;

/// Prints the safe/sensitive permissions table. Handlers are never invoked,
/// so an empty booking store is enough to build the registry.
pub fn run() -> CommandResult {
    let registry = match booking_registry(Arc::new(InMemoryBookingStore::default()), system_clock()) {
        Ok(registry) => registry,
        Err(error) => return CommandResult::failure("actions", "registry", error.to_string(), 7),
    };

    let permissions = registry.permissions_table();
    let width = permissions.iter().map(|row| row.name.len()).max().unwrap_or(0);
    let mut lines = vec![format!("{} registered actions:", permissions.len())];
    lines.extend(permissions.iter().map(|row| {
        let gate = match row.safety {
            Safety::Safe => "runs immediately",
            Safety::Sensitive => "requires confirmation",
        };
        format!(
            "  {:<width$}  {:<9}  {:<9}  {gate}",
            row.name,
            row.safety.as_str(),
            row.effect.as_str()
        )
    }));

    CommandResult::success_with_data("actions", lines.join("\n"), serde_json::to_value(&permissions).ok())
}
