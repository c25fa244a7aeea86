use crate::{
    admin::{AuditTrail, RoleManager},
    auth::{ConsoleNavigator, Role, RoleGate},
    cli::globals::GlobalArgs,
    config::DEFAULT_LANDING_PATH,
};
use anyhow::Result;
use std::sync::Arc;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub subject_id: String,
    pub role: Role,
}

/// # Errors
/// Returns an error if the caller is not a superuser or the backend refuses.
pub async fn execute(args: Args) -> Result<()> {
    let backend = args.globals.backend()?;
    let session = args.globals.session(backend.clone()).await?;
    let gate = RoleGate::new(
        session.clone(),
        Arc::new(ConsoleNavigator),
        DEFAULT_LANDING_PATH,
    );
    let caller = gate.enter(Role::Superuser).await?;

    let audit = Arc::new(AuditTrail::new(backend.clone()));
    let manager = RoleManager::new(backend, session, audit);
    let change = manager.set_role(&caller, &args.subject_id, args.role).await?;

    println!(
        "{}: [{}] -> [{}]",
        change.target_subject_id,
        change.old_roles.join(", "),
        change.new_roles.join(", ")
    );
    if let Some(message) = change.message {
        println!("{message}");
    }

    Ok(())
}
