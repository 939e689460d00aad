use crate::api::AppState;
use axum::{
    extract::Extension,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct BatteryLevel {
    /// Percent, `null` when the device reports nothing usable.
    pub level: Option<u8>,
}

#[utoipa::path(
    get,
    path= "/battery",
    responses (
        (status = 200, description = "Battery charge of the door device", body = BatteryLevel)
    ),
    tag = "door",
)]
/// Never fails: an unreachable device reads as an unknown level.
#[instrument(skip_all)]
pub async fn battery(state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let level = match state.actuator.battery_level().await {
        Ok(level) => level,
        Err(err) => {
            warn!("battery level unavailable: {err}");
            None
        }
    };
    Json(BatteryLevel { level })
}
