use crate::{
    admin::{AuditFilters, AuditTrail},
    auth::{ConsoleNavigator, Role, RoleGate},
    cli::globals::GlobalArgs,
    config::DEFAULT_LANDING_PATH,
};
use anyhow::Result;
use std::sync::Arc;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub filters: AuditFilters,
    pub json: bool,
}

/// # Errors
/// Returns an error if the caller is not a superuser or the query fails.
pub async fn execute(args: Args) -> Result<()> {
    let backend = args.globals.backend()?;
    let session = args.globals.session(backend.clone()).await?;
    let gate = RoleGate::new(session, Arc::new(ConsoleNavigator), DEFAULT_LANDING_PATH);
    let caller = gate.enter(Role::Superuser).await?;

    let page = AuditTrail::new(backend).query(&caller, &args.filters).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&page.entries)?);
        return Ok(());
    }

    for entry in &page.entries {
        println!(
            "{} {:<8} {:<20} {} {}",
            entry
                .timestamp
                .map_or_else(|| "-".to_string(), |ts| ts.to_rfc3339()),
            entry.severity.as_deref().unwrap_or("-"),
            entry.service.as_deref().unwrap_or("-"),
            entry.correlation_id.as_deref().unwrap_or("-"),
            entry.message.as_deref().unwrap_or(""),
        );
    }
    eprintln!(
        "{} of {} entries (last {} hours)",
        page.entries.len(),
        page.count.max(page.entries.len()),
        args.filters.hours()
    );

    Ok(())
}
