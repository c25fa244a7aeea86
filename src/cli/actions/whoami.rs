use crate::{
    auth::membership::verify_membership, cli::globals::GlobalArgs, validators::format_phone,
};
use anyhow::Result;

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub verify_membership: bool,
}

/// Print the claims behind the session token.
///
/// # Errors
/// Returns an error if the token is missing or rejected.
pub async fn execute(args: Args) -> Result<()> {
    let backend = args.globals.backend()?;
    let session = args.globals.session(backend.clone()).await?;
    let credential = session.resolve_session().await?;

    let claims = if args.verify_membership {
        verify_membership(backend.as_ref(), &session, &credential).await?
    } else {
        credential.claims().clone()
    };

    println!("subject:  {}", claims.subject_id);
    if let Some(name) = &claims.display_name {
        println!("name:     {name}");
    }
    if let Some(masked) = claims.masked_national_id() {
        println!("kennitala: {masked}");
    }
    if let Some(phone) = &claims.phone {
        println!("phone:    {}", format_phone(phone));
    }
    println!("member:   {}", if claims.is_member { "yes" } else { "no" });
    let roles: Vec<&str> = claims.roles.iter().map(|role| role.as_str()).collect();
    println!(
        "roles:    {}",
        if roles.is_empty() {
            "member".to_string()
        } else {
            roles.join(", ")
        }
    );
    println!("expires:  {}", credential.expires_at().to_rfc3339());

    Ok(())
}
