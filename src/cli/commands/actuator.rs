use clap::{Arg, ArgAction, ArgMatches, Command, builder::BoolishValueParser};
use secrecy::SecretString;

pub const ARG_TEST_MODE: &str = "test-mode";
pub const ARG_HA_URL: &str = "ha-url";
pub const ARG_HA_TOKEN: &str = "ha-token";
pub const ARG_HA_ENTITY: &str = "ha-entity";
pub const ARG_HA_BATTERY_ENTITY: &str = "ha-battery-entity";

/// Which door actuator to drive.
#[derive(Debug)]
pub enum Options {
    /// Log instead of calling Home Assistant.
    Simulated,
    HomeAssistant {
        url: String,
        token: SecretString,
        entity_id: String,
        /// Defaults to `sensor.<object id>_battery`.
        battery_entity: Option<String>,
    },
}

impl Options {
    /// # Errors
    /// Returns an error if test mode is off and a Home Assistant setting is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        if matches.get_flag(ARG_TEST_MODE) {
            return Ok(Self::Simulated);
        }

        let required = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    anyhow::anyhow!("missing required argument: --{id} (or enable --{ARG_TEST_MODE})")
                })
        };

        Ok(Self::HomeAssistant {
            url: required(ARG_HA_URL)?,
            token: SecretString::from(required(ARG_HA_TOKEN)?),
            entity_id: required(ARG_HA_ENTITY)?,
            battery_entity: required(ARG_HA_BATTERY_ENTITY).ok(),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TEST_MODE)
                .long(ARG_TEST_MODE)
                .help("Simulate the door actuator instead of calling Home Assistant")
                .env("DOORGATE_TEST_MODE")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_HA_URL)
                .long(ARG_HA_URL)
                .help("Home Assistant base URL, e.g. http://homeassistant.local:8123")
                .env("DOORGATE_HA_URL"),
        )
        .arg(
            Arg::new(ARG_HA_TOKEN)
                .long(ARG_HA_TOKEN)
                .help("Home Assistant long-lived access token")
                .env("DOORGATE_HA_TOKEN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_HA_ENTITY)
                .long(ARG_HA_ENTITY)
                .help("Entity that opens the door: switch.*, lock.* or input_boolean.*")
                .env("DOORGATE_HA_ENTITY"),
        )
        .arg(
            Arg::new(ARG_HA_BATTERY_ENTITY)
                .long(ARG_HA_BATTERY_ENTITY)
                .help("Battery sensor of the door device [default: sensor.<entity>_battery]")
                .env("DOORGATE_HA_BATTERY_ENTITY"),
        )
}
