use crate::{
    admin::{AuditFilters, OperationKind},
    auth::{FlowPurpose, Role},
    cli::{
        actions::{audit, dangerous, login, roles, whoami, Action},
        commands::DEFAULT_CALLBACK_PORT,
        globals::GlobalArgs,
    },
};
use anyhow::{anyhow, bail, Context, Result};
use clap::ArgMatches;
use secrecy::SecretString;
use std::time::Duration;

/// # Errors
/// Returns an error if required arguments are missing or invalid.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let globals = globals(matches)?;

    let action = match matches.subcommand() {
        Some(("login", sub)) => Action::Login(login_args(globals, sub, FlowPurpose::Login)?),
        Some(("reactivate", sub)) => {
            Action::Login(login_args(globals, sub, FlowPurpose::Reactivation)?)
        }
        Some(("whoami", sub)) => Action::WhoAmI(whoami::Args {
            globals,
            verify_membership: sub.get_flag("verify-membership"),
        }),
        Some(("set-role", sub)) => {
            let subject_id = sub
                .get_one::<String>("subject")
                .cloned()
                .context("missing required argument: <subject>")?;
            let role = sub
                .get_one::<String>("role")
                .context("missing required argument: <role>")?
                .parse::<Role>()
                .map_err(|e| anyhow!(e))?;
            Action::SetRole(roles::Args {
                globals,
                subject_id,
                role,
            })
        }
        Some(("hard-delete", sub)) => {
            dangerous_action(globals, sub, OperationKind::HardDelete)?
        }
        Some(("anonymize", sub)) => dangerous_action(globals, sub, OperationKind::Anonymize)?,
        Some(("purge", sub)) => dangerous_action(globals, sub, OperationKind::Purge)?,
        Some(("audit", sub)) => Action::Audit(audit::Args {
            globals,
            filters: audit_filters(sub)?,
            json: sub.get_flag("json"),
        }),
        Some((other, _)) => bail!("unknown command: {other}"),
        None => bail!("missing command, see --help"),
    };

    Ok(action)
}

fn globals(matches: &ArgMatches) -> Result<GlobalArgs> {
    let api_url = matches
        .get_one::<String>("api-url")
        .cloned()
        .context("missing required argument: --api-url")?;
    let timeout = matches.get_one::<u64>("timeout").copied().unwrap_or(10);

    let mut globals = GlobalArgs::new(api_url, Duration::from_secs(timeout));
    if let Some(token) = matches.get_one::<String>("token") {
        globals.set_token(SecretString::from(token.clone()));
    }
    Ok(globals)
}

fn login_args(globals: GlobalArgs, sub: &ArgMatches, purpose: FlowPurpose) -> Result<login::Args> {
    Ok(login::Args {
        globals,
        issuer: sub
            .get_one::<String>("issuer")
            .cloned()
            .context("missing required argument: --issuer")?,
        client_id: sub
            .get_one::<String>("client-id")
            .cloned()
            .context("missing required argument: --client-id")?,
        callback_port: sub
            .get_one::<u16>("callback-port")
            .copied()
            .unwrap_or(DEFAULT_CALLBACK_PORT),
        purpose,
    })
}

fn dangerous_action(globals: GlobalArgs, sub: &ArgMatches, kind: OperationKind) -> Result<Action> {
    let target_id = if kind.requires_target() {
        Some(
            sub.get_one::<String>("target")
                .cloned()
                .context("missing required argument: <target>")?,
        )
    } else {
        None
    };
    Ok(Action::Dangerous(dangerous::Args {
        globals,
        kind,
        target_id,
    }))
}

fn audit_filters(sub: &ArgMatches) -> Result<AuditFilters> {
    let mut filters = AuditFilters::new();
    if let Some(service) = sub.get_one::<String>("service") {
        filters = filters.with_service(service)?;
    }
    if let Some(severity) = sub.get_one::<String>("severity") {
        filters = filters.with_severity(severity)?;
    }
    if let Some(correlation_id) = sub.get_one::<String>("correlation-id") {
        filters = filters.with_correlation_id(correlation_id)?;
    }
    if let Some(hours) = sub.get_one::<u32>("hours") {
        filters = filters.with_hours(*hours);
    }
    if let Some(limit) = sub.get_one::<u32>("limit") {
        filters = filters.with_limit(*limit);
    }
    Ok(filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use secrecy::ExposeSecret;

    fn parse(args: &[&str]) -> Result<Action> {
        let matches = commands::new().get_matches_from(args);
        handler(&matches)
    }

    #[test]
    fn test_missing_api_url() {
        temp_env::with_vars([("EKKLESIA_API_URL", None::<&str>)], || {
            let err = parse(&["ekklesia", "whoami"]).unwrap_err();
            assert!(err.to_string().contains("--api-url"));
        });
    }

    #[test]
    fn test_reactivate_uses_reactivation_purpose() {
        temp_env::with_vars(
            [
                ("EKKLESIA_API_URL", Some("https://api.ekklesia.is")),
                ("EKKLESIA_ISSUER", Some("https://idp.example.is")),
                ("EKKLESIA_CLIENT_ID", Some("portal")),
                ("EKKLESIA_CALLBACK_PORT", Some("9000")),
            ],
            || match parse(&["ekklesia", "reactivate"]).unwrap() {
                Action::Login(args) => {
                    assert_eq!(args.purpose, FlowPurpose::Reactivation);
                    assert_eq!(args.callback_port, 9000);
                    assert_eq!(args.issuer, "https://idp.example.is");
                }
                other => panic!("unexpected action: {other:?}"),
            },
        );
    }

    #[test]
    fn test_token_and_set_role() {
        temp_env::with_vars(
            [
                ("EKKLESIA_API_URL", Some("https://api.ekklesia.is")),
                ("EKKLESIA_TOKEN", Some("tok")),
            ],
            || match parse(&["ekklesia", "set-role", "U1", "admin"]).unwrap() {
                Action::SetRole(args) => {
                    assert_eq!(args.subject_id, "U1");
                    assert_eq!(args.role, Role::Admin);
                    assert_eq!(args.globals.token.expose_secret(), "tok");
                    assert_eq!(args.globals.timeout, Duration::from_secs(10));
                }
                other => panic!("unexpected action: {other:?}"),
            },
        );
    }

    #[test]
    fn test_dangerous_targets() {
        temp_env::with_vars([("EKKLESIA_API_URL", Some("https://api.ekklesia.is"))], || {
            match parse(&["ekklesia", "hard-delete", "T123"]).unwrap() {
                Action::Dangerous(args) => {
                    assert_eq!(args.kind, OperationKind::HardDelete);
                    assert_eq!(args.target_id.as_deref(), Some("T123"));
                }
                other => panic!("unexpected action: {other:?}"),
            }
            match parse(&["ekklesia", "purge"]).unwrap() {
                Action::Dangerous(args) => {
                    assert_eq!(args.kind, OperationKind::Purge);
                    assert_eq!(args.target_id, None);
                }
                other => panic!("unexpected action: {other:?}"),
            }
        });
    }

    #[test]
    fn test_audit_filters_are_validated() {
        temp_env::with_vars([("EKKLESIA_API_URL", Some("https://api.ekklesia.is"))], || {
            assert!(parse(&["ekklesia", "audit", "--correlation-id", "not valid!"]).is_err());

            match parse(&["ekklesia", "audit", "--hours", "500", "--limit", "9000"]).unwrap() {
                Action::Audit(args) => {
                    assert_eq!(args.filters.hours(), 24);
                    assert_eq!(args.filters.limit(), 500);
                    assert!(!args.json);
                }
                other => panic!("unexpected action: {other:?}"),
            }
        });
    }
}
