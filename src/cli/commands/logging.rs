use clap::{Arg, ArgMatches, Command, builder::PossibleValuesParser, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_FORMAT: &str = "log-format";

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Shape of the lines written to stderr.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

impl LogFormat {
    #[must_use]
    pub fn from_matches(matches: &ArgMatches) -> Self {
        match matches.get_one::<String>(ARG_LOG_FORMAT).map(String::as_str) {
            Some("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// `DOORGATE_LOG_LEVEL` takes a level name or its index in [`LEVELS`].
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(|level: &str| -> Result<u8, String> {
        let level = level.trim().to_ascii_lowercase();
        level
            .parse::<u8>()
            .ok()
            .filter(|index| usize::from(*index) <= LEVELS.len())
            .or_else(|| {
                LEVELS
                    .iter()
                    .position(|name| *name == level)
                    .and_then(|index| u8::try_from(index).ok())
            })
            .ok_or_else(|| format!("invalid log level {level:?}, expected one of {LEVELS:?}"))
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Repeat to raise the level: -v WARN, -vv INFO, -vvv DEBUG, -vvvv TRACE (default: ERROR)")
                .env("DOORGATE_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .arg(
            Arg::new(ARG_LOG_FORMAT)
                .long(ARG_LOG_FORMAT)
                .help("Log line format")
                .env("DOORGATE_LOG_FORMAT")
                .global(true)
                .default_value("pretty")
                .value_parser(PossibleValuesParser::new(["pretty", "json"])),
        )
}
