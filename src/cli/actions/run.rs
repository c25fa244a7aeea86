use crate::cli::{
    actions::{audit, dangerous, login, roles, whoami, Action},
    telemetry,
};
use anyhow::Result;

/// Execute the provided action.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    let result = match action {
        Action::Login(args) => login::execute(args).await,
        Action::WhoAmI(args) => whoami::execute(args).await,
        Action::SetRole(args) => roles::execute(args).await,
        Action::Dangerous(args) => dangerous::execute(args).await,
        Action::Audit(args) => audit::execute(args).await,
    };
    telemetry::shutdown_tracer();
    result
}
