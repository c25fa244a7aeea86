use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        PossibleValuesParser, ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};

pub const DEFAULT_CALLBACK_PORT: u16 = 8910;

/// Accepts `0..=5` or a level name.
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

fn target_arg() -> Arg {
    Arg::new("target")
        .help("National id (kennitala) of the member record")
        .required(true)
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    Command::new("ekklesia")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("api-url")
                .long("api-url")
                .help("Base URL of the backend callables, example: https://europe-west2-ekklesia.cloudfunctions.net")
                .env("EKKLESIA_API_URL")
                .global(true),
        )
        .arg(
            Arg::new("token")
                .long("token")
                .help("Session token for authenticated commands")
                .env("EKKLESIA_TOKEN")
                .hide_env_values(true)
                .global(true),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .help("Backend request timeout in seconds")
                .default_value("10")
                .env("EKKLESIA_TIMEOUT")
                .value_parser(clap::value_parser!(u64).range(1..=300))
                .global(true),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("EKKLESIA_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .subcommand(login_command("login", "Log in through the national identity provider"))
        .subcommand(login_command(
            "reactivate",
            "Re-enable a soft-deleted account with a fresh identity proof",
        ))
        .subcommand(
            Command::new("whoami")
                .about("Show the claims of the current session")
                .arg(
                    Arg::new("verify-membership")
                        .long("verify-membership")
                        .help("Re-check membership with the registry before printing")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("set-role")
                .about("Assign a role to a member (superuser only)")
                .arg(
                    Arg::new("subject")
                        .help("Subject id of the member")
                        .required(true),
                )
                .arg(
                    Arg::new("role")
                        .help("Role to assign")
                        .required(true)
                        .value_parser(PossibleValuesParser::new(["member", "admin", "superuser"])),
                ),
        )
        .subcommand(
            Command::new("hard-delete")
                .about("Permanently delete a member record (superuser only)")
                .arg(target_arg()),
        )
        .subcommand(
            Command::new("anonymize")
                .about("Strip personal data from a member record (superuser only)")
                .arg(target_arg()),
        )
        .subcommand(
            Command::new("purge")
                .about("Remove every soft-deleted member and vote (superuser only)"),
        )
        .subcommand(
            Command::new("audit")
                .about("Query the audit log (superuser only)")
                .arg(Arg::new("service").long("service").help("Backend service name"))
                .arg(
                    Arg::new("severity")
                        .long("severity")
                        .help("Minimum severity: DEBUG, INFO, WARNING, ERROR, CRITICAL"),
                )
                .arg(
                    Arg::new("hours")
                        .long("hours")
                        .help("Look-back window in hours (1-168)")
                        .default_value("24")
                        .value_parser(clap::value_parser!(u32)),
                )
                .arg(
                    Arg::new("correlation-id")
                        .long("correlation-id")
                        .help("Only entries carrying this correlation id"),
                )
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .help("Maximum number of entries (capped at 500)")
                        .default_value("100")
                        .value_parser(clap::value_parser!(u32)),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print entries as JSON")
                        .action(ArgAction::SetTrue),
                ),
        )
}

fn login_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(
            Arg::new("issuer")
                .long("issuer")
                .help("Identity provider issuer URL")
                .env("EKKLESIA_ISSUER")
                .required(true),
        )
        .arg(
            Arg::new("client-id")
                .long("client-id")
                .help("OAuth client id registered with the identity provider")
                .env("EKKLESIA_CLIENT_ID")
                .required(true),
        )
        .arg(
            Arg::new("callback-port")
                .long("callback-port")
                .help("Loopback port receiving the authorization callback")
                .default_value("8910")
                .env("EKKLESIA_CALLBACK_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
}
