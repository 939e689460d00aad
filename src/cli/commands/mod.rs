pub mod actuator;
pub mod gate;
pub mod logging;
pub mod oidc;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_PUBLIC_BASE_URL: &str = "public-base-url";

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

    let command = Command::new("doorgate")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("DOORGATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_PUBLIC_BASE_URL)
                .long(ARG_PUBLIC_BASE_URL)
                .help("URL browsers use to reach the service")
                .long_help(
                    "URL browsers use to reach the service. Cookies are marked Secure when it is https, and the OIDC redirect URI defaults to <url>/callback.",
                )
                .default_value("http://localhost:8080")
                .env("DOORGATE_PUBLIC_BASE_URL"),
        );

    let command = gate::with_args(command);
    let command = oidc::with_args(command);
    let command = actuator::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "doorgate");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some(env!("CARGO_PKG_DESCRIPTION").to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_check_args() {
        let command = new();
        let matches = command.get_matches_from(vec![
            "doorgate",
            "--port",
            "9090",
            "--pins",
            "alice=1234",
            "--max-attempts",
            "3",
            "--oidc-enabled",
            "--oidc-issuer",
            "https://sso.example.test",
            "--test-mode",
        ]);

        assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(9090));
        assert_eq!(
            matches.get_one::<String>(gate::ARG_PINS).cloned(),
            Some("alice=1234".to_string())
        );
        assert_eq!(
            matches.get_one::<u32>(gate::ARG_MAX_ATTEMPTS).copied(),
            Some(3)
        );
        assert!(matches.get_flag(oidc::ARG_OIDC_ENABLED));
        assert!(!matches.get_flag(oidc::ARG_OIDC_REQUIRE_PIN));
        assert!(matches.get_flag(actuator::ARG_TEST_MODE));
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("DOORGATE_PORT", Some("443")),
                ("DOORGATE_PUBLIC_BASE_URL", Some("https://door.example.test")),
                ("DOORGATE_PINS", Some("alice=1234,bob=5678")),
                ("DOORGATE_BLOCK_TIME_MINUTES", Some("10")),
                ("DOORGATE_OIDC_ENABLED", Some("true")),
                ("DOORGATE_OIDC_USER_GROUP", Some("door,admins")),
                ("DOORGATE_OIDC_REQUIRE_PIN", Some("false")),
                ("DOORGATE_TEST_MODE", Some("1")),
                ("DOORGATE_LOG_LEVEL", Some("info")),
            ],
            || {
                let command = new();
                let matches = command.get_matches_from(vec!["doorgate"]);
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(443));
                assert_eq!(
                    matches.get_one::<String>(ARG_PUBLIC_BASE_URL).cloned(),
                    Some("https://door.example.test".to_string())
                );
                assert_eq!(
                    matches.get_one::<i64>(gate::ARG_BLOCK_TIME_MINUTES).copied(),
                    Some(10)
                );
                assert!(matches.get_flag(oidc::ARG_OIDC_ENABLED));
                assert!(!matches.get_flag(oidc::ARG_OIDC_REQUIRE_PIN));
                assert!(matches.get_flag(actuator::ARG_TEST_MODE));
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    Some(2)
                );
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        // loop cover all possible value_parse
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars([("DOORGATE_LOG_LEVEL", Some(level))], || {
                let command = new();
                let matches = command.get_matches_from(vec!["doorgate"]);
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, _) in levels.iter().enumerate() {
            temp_env::with_vars([("DOORGATE_LOG_LEVEL", None::<String>)], || {
                let mut args = vec!["doorgate".to_string()];

                // Add the appropriate number of "-v" flags based on the index
                if index > 0 {
                    args.push(format!("-{}", "v".repeat(index)));
                }

                let matches = new().get_matches_from(args);
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn rejects_negative_block_time() {
        let result = new().try_get_matches_from(vec!["doorgate", "--block-time-minutes", "-1"]);
        assert!(result.is_err());
    }
}
