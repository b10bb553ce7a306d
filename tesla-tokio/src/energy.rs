//! Thin client for the energy-site (solar/battery) API.
//!
//! Energy sites share the account's product list and transport with vehicles
//! but use their own command envelope: success is `code == 201` rather than a
//! `result` flag.

use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::api::{self, endpoint, Api, ApiError};
use crate::error::Error;
use crate::retry::{with_retry, RetryPolicy};

/// An energy site ID for the owner-api endpoint.
#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash)]
pub struct EnergySiteId(u64);

impl EnergySiteId {
    /// Create a new energy site ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for EnergySiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The battery's default operating strategy.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    /// Store solar surplus, discharge to cover the house load.
    SelfConsumption,

    /// Let the site optimise against a tariff.
    Autonomous,

    /// Hold the full charge for grid outages.
    Backup,
}

impl OperationMode {
    const fn wire_name(self) -> &'static str {
        match self {
            OperationMode::SelfConsumption => "self_consumption",
            OperationMode::Autonomous => "autonomous",
            OperationMode::Backup => "backup",
        }
    }
}

/// The command envelope used by energy-site endpoints.
#[derive(Debug, Deserialize)]
struct EnergyCommandResponse {
    code: u16,

    #[serde(default)]
    message: Option<String>,
}

const ENERGY_COMMAND_ACCEPTED: u16 = 201;

/// A view over one energy site, caching its last live-status payload.
#[derive(Debug)]
pub struct EnergySite {
    api: Arc<dyn Api>,
    retry: RetryPolicy,
    id: EnergySiteId,
    live_status: Mutex<Option<Value>>,
}

impl EnergySite {
    /// Create a view over the given site.
    #[must_use]
    pub fn new(api: Arc<dyn Api>, id: EnergySiteId) -> Self {
        Self {
            api,
            retry: RetryPolicy::default(),
            id,
            live_status: Mutex::new(None),
        }
    }

    /// The site ID.
    #[must_use]
    pub const fn id(&self) -> EnergySiteId {
        self.id
    }

    fn cached(&self) -> MutexGuard<'_, Option<Value>> {
        self.live_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch the live power readings and cache them.
    ///
    /// # Errors
    ///
    /// Propagates transport failures; the cached payload is left untouched.
    pub async fn refresh_live_status(&self) -> Result<Value, Error> {
        let path = endpoint::site_live_status(self.id);
        let raw = with_retry(self.retry, "live_status", || self.api.get(&path)).await?;
        let status: Value = api::parse_response(raw)?;

        *self.cached() = Some(status.clone());
        Ok(status)
    }

    /// The last-fetched live status, if any.
    #[must_use]
    pub fn live_status(&self) -> Option<Value> {
        self.cached().clone()
    }

    /// Fetch the site configuration.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub async fn site_info(&self) -> Result<Value, Error> {
        let path = endpoint::site_info(self.id);
        let raw = with_retry(self.retry, "site_info", || self.api.get(&path)).await?;
        api::parse_response(raw).map_err(Error::from)
    }

    fn live_field(&self, field: &str) -> Option<Value> {
        self.cached().as_ref()?.get(field).cloned()
    }

    /// Current solar generation in watts.
    #[must_use]
    pub fn solar_power(&self) -> Option<f64> {
        self.live_field("solar_power")?.as_f64()
    }

    /// Current battery flow in watts, negative while charging.
    #[must_use]
    pub fn battery_power(&self) -> Option<f64> {
        self.live_field("battery_power")?.as_f64()
    }

    /// Current grid flow in watts.
    #[must_use]
    pub fn grid_power(&self) -> Option<f64> {
        self.live_field("grid_power")?.as_f64()
    }

    /// Battery state of charge in percent.
    #[must_use]
    pub fn percentage_charged(&self) -> Option<f64> {
        self.live_field("percentage_charged")?.as_f64()
    }

    /// The raw grid status string.
    #[must_use]
    pub fn grid_status(&self) -> Option<String> {
        self.live_field("grid_status")
            .and_then(|value| value.as_str().map(str::to_string))
    }

    async fn command(&self, name: &str, path: String, body: Value) -> Result<(), Error> {
        let raw = with_retry(self.retry, name, || self.api.post(&path, &body)).await?;
        let response: EnergyCommandResponse = api::parse_response(raw)?;

        if response.code == ENERGY_COMMAND_ACCEPTED {
            info!("Energy site {id}: {name} accepted", id = self.id);
            Ok(())
        } else {
            Err(Error::Api(ApiError::Status {
                code: response.code,
                reason: response.message.unwrap_or_default(),
            }))
        }
    }

    /// Change the percentage of the battery held back for outages.
    ///
    /// # Errors
    ///
    /// Returns `Error::Api` if the site refused the change.
    pub async fn set_backup_reserve(&self, percent: u8) -> Result<(), Error> {
        self.command(
            "backup_reserve",
            endpoint::backup_reserve(self.id),
            json!({"backup_reserve_percent": percent}),
        )
        .await
    }

    /// Change the battery's default operating strategy.
    ///
    /// # Errors
    ///
    /// Returns `Error::Api` if the site refused the change.
    pub async fn set_operation_mode(&self, mode: OperationMode) -> Result<(), Error> {
        self.command(
            "operation_mode",
            endpoint::operation_mode(self.id),
            json!({"default_real_mode": mode.wire_name()}),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use crate::testing::{FakeApi, FakeResult};

    use super::*;

    fn live_status_response() -> Value {
        json!({
            "response": {
                "solar_power": 3250.0,
                "battery_power": -1200.0,
                "grid_power": 50.0,
                "percentage_charged": 87.5,
                "grid_status": "Active",
            }
        })
    }

    #[tokio::test]
    async fn test_live_status_is_cached() {
        let api = Arc::new(FakeApi::new());
        api.queue(
            "api/1/energy_sites/90210/live_status",
            FakeResult::Ok(live_status_response()),
        );

        let site = EnergySite::new(api, EnergySiteId::new(90210));
        assert!(site.live_status().is_none());

        site.refresh_live_status().await.unwrap();
        assert_eq!(site.solar_power(), Some(3250.0));
        assert_eq!(site.battery_power(), Some(-1200.0));
        assert_eq!(site.percentage_charged(), Some(87.5));
        assert_eq!(site.grid_status().as_deref(), Some("Active"));
    }

    #[tokio::test]
    async fn test_command_requires_accepted_code() {
        let api = Arc::new(FakeApi::new());
        api.queue(
            "api/1/energy_sites/90210/backup",
            FakeResult::Ok(json!({"response": {"code": 201, "message": "Updated"}})),
        );
        api.queue(
            "api/1/energy_sites/90210/operation",
            FakeResult::Ok(json!({"response": {"code": 400, "message": "Invalid mode"}})),
        );

        let site = EnergySite::new(api, EnergySiteId::new(90210));
        site.set_backup_reserve(30).await.unwrap();

        let err = site
            .set_operation_mode(OperationMode::Backup)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Api(ApiError::Status { code: 400, .. })
        ));
    }
}
