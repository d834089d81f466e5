use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ColorChoice, Command,
};

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

fn numeric<T>(
    name: &'static str,
    env: &'static str,
    help: &'static str,
    default: &'static str,
) -> Arg
where
    T: Clone + Send + Sync + 'static + std::str::FromStr,
    <T as std::str::FromStr>::Err: std::fmt::Display,
{
    Arg::new(name)
        .long(name)
        .help(help)
        .default_value(default)
        .env(env)
        .value_parser(ValueParser::new(|value: &str| -> Result<T, String> {
            value.trim().parse::<T>().map_err(|err| err.to_string())
        }))
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("credvault")
        .about("Credential lifecycle and token trust engine")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("CREDVAULT_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .env("CREDVAULT_DSN")
                .required(true),
        )
        .arg(
            Arg::new("signing-key")
                .long("signing-key")
                .help("Base64 encoded HMAC key for bearer tokens, at least 32 bytes")
                .env("CREDVAULT_SIGNING_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(numeric::<i64>(
            "access-ttl-seconds",
            "CREDVAULT_ACCESS_TTL_SECONDS",
            "Access token lifetime in seconds",
            "1800",
        ))
        .arg(numeric::<i64>(
            "refresh-ttl-seconds",
            "CREDVAULT_REFRESH_TTL_SECONDS",
            "Refresh token lifetime in seconds",
            "604800",
        ))
        .arg(numeric::<i64>(
            "reset-code-ttl-minutes",
            "CREDVAULT_RESET_CODE_TTL_MINUTES",
            "Password reset code lifetime in minutes",
            "30",
        ))
        .arg(numeric::<u32>(
            "reset-rate-limit-per-minute",
            "CREDVAULT_RESET_RATE_LIMIT_PER_MINUTE",
            "Reset requests allowed per identity and per origin each minute, 0 disables",
            "1",
        ))
        .arg(numeric::<u32>(
            "reset-max-attempts",
            "CREDVAULT_RESET_MAX_ATTEMPTS",
            "Redemption attempts allowed per reset code, 0 disables",
            "5",
        ))
        .arg(
            Arg::new("rate-limit-disclosure")
                .long("rate-limit-disclosure")
                .help("Answer for rate-limited reset requests of known accounts")
                .default_value("distinct")
                .env("CREDVAULT_RATE_LIMIT_DISCLOSURE")
                .value_parser(["generic", "distinct"]),
        )
        .arg(numeric::<i64>(
            "verification-code-ttl-minutes",
            "CREDVAULT_VERIFICATION_CODE_TTL_MINUTES",
            "Email verification code lifetime in minutes",
            "10",
        ))
        .arg(numeric::<usize>(
            "verification-code-length",
            "CREDVAULT_VERIFICATION_CODE_LENGTH",
            "Digits in an email verification code",
            "6",
        ))
        .arg(numeric::<i64>(
            "ledger-retention-hours",
            "CREDVAULT_LEDGER_RETENTION_HOURS",
            "How long revoked tokens are remembered",
            "168",
        ))
        .arg(numeric::<u64>(
            "ledger-sweep-seconds",
            "CREDVAULT_LEDGER_SWEEP_SECONDS",
            "Interval between revocation ledger sweeps",
            "3600",
        ))
        .arg(numeric::<u64>(
            "code-expiry-sweep-seconds",
            "CREDVAULT_CODE_EXPIRY_SWEEP_SECONDS",
            "Interval between expired code sweeps",
            "300",
        ))
        .arg(numeric::<u64>(
            "code-age-sweep-seconds",
            "CREDVAULT_CODE_AGE_SWEEP_SECONDS",
            "Interval between aged code sweeps",
            "7200",
        ))
        .arg(numeric::<i64>(
            "code-max-age-hours",
            "CREDVAULT_CODE_MAX_AGE_HOURS",
            "Codes older than this are deleted regardless of state",
            "24",
        ))
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("CREDVAULT_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}
