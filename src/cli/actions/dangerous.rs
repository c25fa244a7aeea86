use crate::{
    admin::{
        AuditTrail, ConfirmOutcome, ConfirmationWorkflow, DangerousOperation, LogNotifier,
        OperationKind, OperationState,
    },
    auth::{ConsoleNavigator, Role, RoleGate},
    cli::globals::GlobalArgs,
    config::DEFAULT_LANDING_PATH,
    error::PortalError,
};
use anyhow::{bail, Context, Result};
use std::{
    io::{IsTerminal, Write},
    sync::Arc,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub kind: OperationKind,
    pub target_id: Option<String>,
}

/// The phrase must be typed by a person after the cooldown, so piped or
/// redirected input is refused before anything is opened.
fn require_terminal(interactive: bool) -> Result<()> {
    if interactive {
        Ok(())
    } else {
        bail!("irreversible operations need an interactive terminal on stdin")
    }
}

/// Drive one irreversible operation through cooldown, phrase and confirm.
///
/// # Errors
/// Returns an error if the caller is not a superuser, the phrase does not
/// match, or the backend refuses the operation.
pub async fn execute(args: Args) -> Result<()> {
    require_terminal(std::io::stdin().is_terminal())?;
    let operation = DangerousOperation::new(args.kind, args.target_id.as_deref())?;

    let backend = args.globals.backend()?;
    let session = args.globals.session(backend.clone()).await?;
    let gate = RoleGate::new(session, Arc::new(ConsoleNavigator), DEFAULT_LANDING_PATH);
    let caller = gate.enter(Role::Superuser).await?;

    if operation.kind() == OperationKind::Purge {
        let counts = backend.deleted_counts(&caller).await?;
        eprintln!(
            "Soft-deleted records: {} members, {} votes",
            counts.members, counts.votes
        );
    }

    let audit = Arc::new(AuditTrail::new(backend.clone()));
    let workflow = ConfirmationWorkflow::new(backend, audit, Arc::new(LogNotifier));
    let mut updates = workflow.subscribe();
    let kind = operation.kind();
    let target = operation.target_id().unwrap_or("all soft-deleted records").to_string();
    workflow.open(operation, &caller)?;

    eprintln!("{kind} of {target} cannot be undone.");
    loop {
        let snapshot = updates.borrow_and_update().clone();
        match snapshot.state {
            OperationState::Cooldown => {
                eprint!("\rConfirmation opens in {}s ", snapshot.remaining_ticks);
                std::io::stderr().flush().ok();
                updates
                    .changed()
                    .await
                    .context("confirmation workflow stopped")?;
            }
            OperationState::AwaitingPhrase => break,
            other => bail!("unexpected confirmation state: {other:?}"),
        }
    }
    eprintln!();

    let phrase = prompt(kind.required_phrase()).await?;
    if workflow.enter_phrase(&phrase) != OperationState::Armed {
        workflow.cancel();
        return Err(PortalError::ConfirmationPhraseMismatch.into());
    }

    match workflow.confirm().await? {
        ConfirmOutcome::Completed { message } => println!("{message}"),
        ConfirmOutcome::Ignored => bail!("{kind} was not executed"),
    }

    Ok(())
}

async fn prompt(phrase: &str) -> Result<String> {
    eprint!("Type \"{phrase}\" to confirm: ");
    std::io::stderr().flush().ok();
    let line = BufReader::new(tokio::io::stdin())
        .lines()
        .next_line()
        .await
        .context("failed to read confirmation phrase")?;
    debug!("confirmation phrase read from stdin");
    line.context("no confirmation phrase given")
}
