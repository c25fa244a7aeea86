pub mod audit;
pub mod dangerous;
pub mod login;
pub mod roles;
pub mod whoami;

// The match over `Action` lives in `run` so this file only lists the variants.
mod run;

#[derive(Debug)]
pub enum Action {
    Login(login::Args),
    WhoAmI(whoami::Args),
    SetRole(roles::Args),
    Dangerous(dangerous::Args),
    Audit(audit::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
