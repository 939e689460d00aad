//! Door actuators.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span};
use url::Url;

const HOME_ASSISTANT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("actuator request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("actuator returned status {0}")]
    Status(u16),
    #[error("invalid actuator url: {0}")]
    Url(#[from] url::ParseError),
    #[error("no open service for entity {0}")]
    UnsupportedEntity(String),
}

#[async_trait]
pub trait Actuator: Send + Sync {
    /// Open the door.
    ///
    /// # Errors
    /// Returns an error if the actuator could not be reached or refused.
    async fn trigger(&self) -> Result<(), ActuatorError>;

    /// Battery charge of the door device in percent. `None` when the device
    /// reports nothing usable.
    ///
    /// # Errors
    /// Returns an error if the device could not be asked.
    async fn battery_level(&self) -> Result<Option<u8>, ActuatorError> {
        Ok(None)
    }

    /// True when no physical device is driven.
    fn is_simulated(&self) -> bool {
        false
    }
}

/// `(domain, service)` that opens `entity_id`.
///
/// # Errors
/// Returns `UnsupportedEntity` for domains without an opening service.
pub fn open_service(entity_id: &str) -> Result<(&'static str, &'static str), ActuatorError> {
    let domain = entity_id.split_once('.').map_or("", |(domain, _)| domain);
    match domain {
        "switch" => Ok(("switch", "turn_on")),
        "lock" => Ok(("lock", "unlock")),
        "input_boolean" => Ok(("input_boolean", "turn_on")),
        _ => Err(ActuatorError::UnsupportedEntity(entity_id.to_string())),
    }
}

/// Battery sensor paired with `entity_id`: `switch.front_door` reports through
/// `sensor.front_door_battery`.
#[must_use]
pub fn default_battery_entity(entity_id: &str) -> String {
    let object_id = entity_id
        .split_once('.')
        .map_or(entity_id, |(_, object_id)| object_id);
    format!("sensor.{object_id}_battery")
}

/// Percent from a sensor state; anything outside `0..=100` is not a level.
#[must_use]
pub fn parse_battery_state(state: &Value) -> Option<u8> {
    let level = match state {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !(0.0..=100.0).contains(&level) {
        return None;
    }
    // In range, so the cast cannot truncate.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let percent = level.round() as u8;
    Some(percent)
}

#[derive(Debug, Deserialize)]
struct EntityState {
    #[serde(default)]
    state: Value,
}

/// Calls the opening service of a Home Assistant entity (`switch`, `lock` or
/// `input_boolean`) and reads its battery sensor.
#[derive(Debug)]
pub struct HomeAssistantActuator {
    client: Client,
    base: Url,
    endpoint: Url,
    token: SecretString,
    entity_id: String,
    battery_entity: String,
}

impl HomeAssistantActuator {
    /// # Errors
    /// Returns an error if the base URL is invalid, the entity domain has no
    /// opening service or the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        token: SecretString,
        entity_id: String,
    ) -> Result<Self, ActuatorError> {
        let mut base = Url::parse(base_url.trim())?;
        // Relative joins keep a path prefix such as `/ha/` only below a trailing slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let (domain, service) = open_service(&entity_id)?;
        let endpoint = base.join(&format!("api/services/{domain}/{service}"))?;
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(HOME_ASSISTANT_TIMEOUT_SECONDS))
            .build()?;
        Ok(Self {
            client,
            base,
            endpoint,
            token,
            battery_entity: default_battery_entity(&entity_id),
            entity_id,
        })
    }

    #[must_use]
    pub fn with_battery_entity(mut self, battery_entity: Option<String>) -> Self {
        if let Some(entity) = battery_entity.filter(|entity| !entity.trim().is_empty()) {
            self.battery_entity = entity;
        }
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    #[must_use]
    pub fn battery_entity(&self) -> &str {
        &self.battery_entity
    }
}

#[async_trait]
impl Actuator for HomeAssistantActuator {
    async fn trigger(&self) -> Result<(), ActuatorError> {
        let span = info_span!(
            "actuator.trigger",
            http.method = "POST",
            url = %self.endpoint,
            entity_id = %self.entity_id
        );
        async {
            let response = self
                .client
                .post(self.endpoint.clone())
                .bearer_auth(self.token.expose_secret())
                .json(&json!({ "entity_id": self.entity_id }))
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                debug!("home assistant rejected the call: {status}");
                return Err(ActuatorError::Status(status.as_u16()));
            }
            info!("door open command sent");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn battery_level(&self) -> Result<Option<u8>, ActuatorError> {
        let url = self.base.join(&format!("api/states/{}", self.battery_entity))?;
        let span = info_span!(
            "actuator.battery",
            http.method = "GET",
            url = %url,
            entity_id = %self.battery_entity
        );
        async {
            let response = self
                .client
                .get(url)
                .bearer_auth(self.token.expose_secret())
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ActuatorError::Status(status.as_u16()));
            }
            let entity: EntityState = response.json().await?;
            let level = parse_battery_state(&entity.state);
            if level.is_none() {
                debug!(state = %entity.state, "battery state is not a level");
            }
            Ok(level)
        }
        .instrument(span)
        .await
    }
}

/// Used in test mode: logs instead of touching hardware.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimulatedActuator;

#[async_trait]
impl Actuator for SimulatedActuator {
    async fn trigger(&self) -> Result<(), ActuatorError> {
        info!("test mode: door open simulated");
        Ok(())
    }

    fn is_simulated(&self) -> bool {
        true
    }
}
