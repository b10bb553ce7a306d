//! The polling/caching controller and its wake-retry command protocol.
//!
//! The controller owns the vehicle cache and all of its bookkeeping; device
//! wrappers read through it and mutate vehicle state only via [`Controller::command`].
//! Refreshes are interval-gated by the polling decision and serialized across
//! vehicles; commands against a sleeping vehicle optionally run the wake-retry
//! protocol first.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use tesla_common::config::PollingConfig;
use tesla_common::vehicle::{
    ChargingStateEnum, DataCategory, ShiftState, VehicleIdentity, Vin,
};

use crate::api::{self, endpoint, Api, CommandResponse, VehicleListing, WakeUpResponse};
use crate::cache::{VehicleCache, VehicleKey};
use crate::error::Error;
use crate::polling::{self, PollingContext};
use crate::retry::{with_retry, RetryPolicy};

/// Wake-loop settings.
///
/// The wake loop uses a steeper backoff than the generic retry policy, since
/// waking a vehicle can take tens of seconds.
#[derive(Debug, Clone, Copy)]
pub struct WakeConfig {
    /// Number of wake requests to send before giving up.
    pub attempts: u32,

    /// Exponential base of the wake backoff curve.
    pub base: f64,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            base: 2.0,
        }
    }
}

/// The wake-retry protocol's states.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum WakeState {
    Asleep,
    Waking { attempt: u32 },
    Awake,
    Failed,
}

/// The polling/caching controller.
pub struct Controller {
    api: Arc<dyn Api>,
    retry: RetryPolicy,
    wake: WakeConfig,
    config: PollingConfig,
    state: Mutex<VehicleCache>,
    refresh_lock: AsyncMutex<()>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("retry", &self.retry)
            .field("wake", &self.wake)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Create a new controller over the given transport.
    #[must_use]
    pub fn new(api: Arc<dyn Api>, config: PollingConfig) -> Self {
        Self {
            api,
            retry: RetryPolicy::default(),
            wake: WakeConfig::default(),
            config,
            state: Mutex::new(VehicleCache::new()),
            refresh_lock: AsyncMutex::new(()),
        }
    }

    /// Replace the transient-failure retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the wake-loop settings.
    #[must_use]
    pub const fn with_wake_config(mut self, wake: WakeConfig) -> Self {
        self.wake = wake;
        self
    }

    /// The polling configuration this controller runs under.
    #[must_use]
    pub const fn polling_config(&self) -> &PollingConfig {
        &self.config
    }

    // The cache lock is never held across an await point; a poisoned lock only
    // means a reader panicked mid-read, so the data is still usable.
    fn state(&self) -> MutexGuard<'_, VehicleCache> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch the product list and register every vehicle on the account.
    ///
    /// The identity map entry for a vehicle is established on first sight and
    /// never changes; calling this again only picks up new vehicles.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the product list cannot be fetched.
    pub async fn discover_vehicles(&self) -> Result<Vec<VehicleIdentity>, Error> {
        let path = endpoint::products();
        let raw = with_retry(self.retry, "products", || self.api.get(&path)).await?;
        let products: Vec<Value> = api::parse_response(raw)?;

        let now = Utc::now();
        let mut identities = Vec::new();
        {
            let mut state = self.state();
            for product in products {
                // Energy sites share the products list but carry no VIN.
                if product.get("vin").is_none() {
                    continue;
                }

                let listing: VehicleListing = serde_json::from_value(product)
                    .map_err(api::ApiError::from)?;
                let identity = VehicleIdentity {
                    id: listing.id,
                    vin: listing.vin.clone(),
                    display_name: listing.display_name.clone(),
                };

                state.insert_vehicle(identity.clone());
                state.set_online(&VehicleKey::from(&listing.vin), listing.state == "online", now)?;
                identities.push(identity);
            }
        }

        info!("Discovered {} vehicles", identities.len());
        Ok(identities)
    }

    /// All known VINs.
    #[must_use]
    pub fn vins(&self) -> Vec<Vin> {
        self.state().vins()
    }

    /// The identity of the vehicle behind either key.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn identity(&self, key: impl Into<VehicleKey>) -> Result<VehicleIdentity, Error> {
        self.state().identity(&key.into())
    }

    /// How long until the next background refresh of this vehicle is due.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn next_poll_interval(&self, key: impl Into<VehicleKey>) -> Result<Duration, Error> {
        let key = key.into();
        let state = self.state();
        let ctx = Self::polling_context(&state, &key)?;
        Ok(polling::next_interval(&self.config, self.config.policy, &ctx))
    }

    fn polling_context(state: &VehicleCache, key: &VehicleKey) -> Result<PollingContext, Error> {
        let runtime = state.runtime(key)?;
        Ok(PollingContext {
            shift_state: shift_state_of(state.read(key, DataCategory::DriveState)?.as_ref()),
            charging_state: charging_state_of(state.read(key, DataCategory::ChargeState)?.as_ref()),
            sentry_mode: sentry_mode_of(state.read(key, DataCategory::VehicleState)?.as_ref()),
            time_since_park: runtime.last_park_time.map(|park| park.elapsed()),
            interval_override: runtime.polling_interval_override,
        })
    }

    /// Refresh the cached vehicle data if the polling window has elapsed.
    ///
    /// Returns `true` if a fetch was issued, `false` for a cache-hit no-op.
    /// With `wake_if_asleep` the window is ignored and a sleeping vehicle is
    /// woken first. Refresh cycles are serialized across all vehicles.
    ///
    /// # Errors
    ///
    /// Failures after retry exhaustion propagate and leave the cache
    /// untouched; this layer never swallows a refresh failure.
    pub async fn refresh(
        &self,
        key: impl Into<VehicleKey> + Send,
        wake_if_asleep: bool,
    ) -> Result<bool, Error> {
        let key = key.into();
        let _refresh_guard = self.refresh_lock.lock().await;

        let (identity, due, online) = {
            let state = self.state();
            let identity = state.identity(&key)?;
            let runtime = state.runtime(&key)?;
            let ctx = Self::polling_context(&state, &key)?;
            let interval = polling::next_interval(&self.config, self.config.policy, &ctx);

            let due = runtime
                .last_update_instant
                .is_none_or(|last| last.elapsed() >= interval);
            (identity, due, runtime.online)
        };
        let name = &identity.display_name;

        if !due && !wake_if_asleep {
            debug!("{name}: refresh inside the polling window, cache hit");
            return Ok(false);
        }

        if wake_if_asleep && !online {
            self.wake_up(&key).await?;
        }

        let path = endpoint::vehicle_data(identity.id);
        let raw = match with_retry(self.retry, "vehicle_data", || self.api.get(&path)).await {
            Ok(raw) => raw,
            Err(err) => {
                // The 408 answer is the canonical asleep signal; record it so
                // the next command knows to wake the car. The data cache
                // itself stays untouched.
                if err.is_vehicle_unavailable() {
                    debug!("{name}: vehicle is asleep");
                    self.state().set_online(&key, false, Utc::now())?;
                }
                return Err(err);
            }
        };
        let response: Value = api::parse_response(raw)?;

        self.apply_vehicle_data(&key, &response)?;
        info!("{name}: refreshed vehicle data");
        Ok(true)
    }

    /// Overwrite the cached categories from one vehicle-data payload.
    fn apply_vehicle_data(&self, key: &VehicleKey, response: &Value) -> Result<(), Error> {
        let now = Utc::now();
        let mut state = self.state();

        let old_shift = shift_state_of(state.read(key, DataCategory::DriveState)?.as_ref());
        let new_shift = shift_state_of(response.get(DataCategory::DriveState.wire_name()));

        for category in DataCategory::ALL {
            if let Some(value) = response.get(category.wire_name()) {
                state.write(key, category, value.clone())?;
            }
        }

        let online = response.get("state").and_then(Value::as_str) == Some("online");
        state.set_online(key, online, now)?;
        state.stamp_update(key, now)?;

        let was_driving = old_shift.is_some_and(ShiftState::is_driving);
        let is_driving = new_shift.is_some_and(ShiftState::is_driving);
        if was_driving && !is_driving {
            state.stamp_park(key)?;
        }

        Ok(())
    }

    /// Run the wake-retry protocol until the vehicle reports online.
    ///
    /// Each attempt that fails — vehicle still asleep, or a retryable
    /// transport failure — is followed by a steeper-than-usual backoff sleep.
    ///
    /// # Errors
    ///
    /// Returns `Error::WakeRetryLimitExceeded` once the attempt ceiling is
    /// reached without the vehicle reporting online; permanent API errors
    /// abort the loop immediately.
    pub async fn wake_up(&self, key: &VehicleKey) -> Result<(), Error> {
        let identity = self.state().identity(key)?;
        let name = &identity.display_name;
        let path = endpoint::wake_up(identity.id);

        let mut wake_state = WakeState::Asleep;
        loop {
            wake_state = match wake_state {
                WakeState::Asleep => WakeState::Waking { attempt: 0 },

                WakeState::Waking { attempt } if attempt >= self.wake.attempts => WakeState::Failed,

                WakeState::Waking { attempt } => {
                    if attempt > 0 {
                        let wait = self.wake_backoff(attempt);
                        info!("{name}: not online yet, retrying wake in {wait:?}");
                        tokio::time::sleep(wait).await;
                    }

                    info!("{name}: sending wake up request");
                    match self.api.post(&path, &json!({})).await {
                        Ok(raw) => {
                            let response: WakeUpResponse = api::parse_response(raw)?;
                            if response.state == "online" {
                                WakeState::Awake
                            } else {
                                WakeState::Waking {
                                    attempt: attempt + 1,
                                }
                            }
                        }
                        Err(err) if err.is_retryable() => {
                            warn!("{name}: wake request failed: {err}");
                            WakeState::Waking {
                                attempt: attempt + 1,
                            }
                        }
                        Err(err) => return Err(Error::Api(err)),
                    }
                }

                WakeState::Awake => {
                    self.state().set_online(key, true, Utc::now())?;
                    info!("{name}: vehicle is online");
                    return Ok(());
                }

                WakeState::Failed => {
                    return Err(Error::WakeRetryLimitExceeded {
                        attempts: self.wake.attempts,
                    });
                }
            };
        }
    }

    /// The wait after `attempt` failed wake attempts: `base^(attempt+2)`
    /// seconds, capped at an hour.
    fn wake_backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_add(2)).unwrap_or(i32::MAX);
        let seconds = self.wake.base.powi(exponent);
        if seconds.is_finite() && seconds < 3600.0 {
            Duration::from_secs_f64(seconds)
        } else {
            Duration::from_secs(3600)
        }
    }

    /// Send one command to the vehicle, optionally waking it first.
    ///
    /// A sleeping vehicle with `wake_if_asleep` unset is a soft no-op: the
    /// call returns `Ok(None)` instead of failing, and the cache is left
    /// untouched. A command the API accepts with `result == true` applies its
    /// optimistic cache patch; any other outcome leaves the cache unchanged.
    ///
    /// # Errors
    ///
    /// Returns `Error::WakeRetryLimitExceeded` if the vehicle could not be
    /// woken, or the transport error if the command itself failed.
    pub async fn command(
        &self,
        key: impl Into<VehicleKey> + Send,
        name: &str,
        payload: Value,
        wake_if_asleep: bool,
    ) -> Result<Option<CommandResponse>, Error> {
        let key = key.into();
        let (identity, online) = {
            let state = self.state();
            let identity = state.identity(&key)?;
            let online = state.runtime(&key)?.online;
            (identity, online)
        };
        let display_name = &identity.display_name;

        if wake_if_asleep && !online {
            self.wake_up(&key).await?;
        }

        let path = endpoint::command(identity.id, name);
        let result = with_retry(self.retry, name, || self.api.post(&path, &payload)).await;

        let raw = match result {
            Ok(raw) => raw,
            Err(err) if err.is_vehicle_unavailable() && !wake_if_asleep => {
                debug!("{display_name}: {name}: vehicle asleep, skipping");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let response: CommandResponse = api::parse_response(raw)?;

        if response.result {
            if let Some((category, patch)) = command_effects(name, &payload) {
                self.state().patch(&key, category, patch)?;
            }
        } else {
            info!(
                "{display_name}: {name}: command refused: {:?}",
                response.reason
            );
        }

        Ok(Some(response))
    }

    /// The cached charging data.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn get_charging_params(&self, key: impl Into<VehicleKey>) -> Result<Option<Value>, Error> {
        self.state().read(&key.into(), DataCategory::ChargeState)
    }

    /// The cached climate data.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn get_climate_params(&self, key: impl Into<VehicleKey>) -> Result<Option<Value>, Error> {
        self.state().read(&key.into(), DataCategory::ClimateState)
    }

    /// The cached drive data.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn get_drive_params(&self, key: impl Into<VehicleKey>) -> Result<Option<Value>, Error> {
        self.state().read(&key.into(), DataCategory::DriveState)
    }

    /// The cached vehicle state data.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn get_state_params(&self, key: impl Into<VehicleKey>) -> Result<Option<Value>, Error> {
        self.state().read(&key.into(), DataCategory::VehicleState)
    }

    /// The cached GUI settings.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn get_gui_params(&self, key: impl Into<VehicleKey>) -> Result<Option<Value>, Error> {
        self.state().read(&key.into(), DataCategory::GuiSettings)
    }

    /// The cached vehicle configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn get_config_params(&self, key: impl Into<VehicleKey>) -> Result<Option<Value>, Error> {
        self.state().read(&key.into(), DataCategory::VehicleConfig)
    }

    /// Is the vehicle currently online?
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn is_car_online(&self, key: impl Into<VehicleKey>) -> Result<bool, Error> {
        self.state().runtime(&key.into()).map(|r| r.online)
    }

    /// When the last full refresh landed, if ever.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn get_last_update_time(
        &self,
        key: impl Into<VehicleKey>,
    ) -> Result<Option<DateTime<Utc>>, Error> {
        self.state()
            .runtime(&key.into())
            .map(|r| r.last_update_time)
    }

    /// Enable or disable background polling for one vehicle.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn set_updates(&self, key: impl Into<VehicleKey>, enabled: bool) -> Result<(), Error> {
        self.state().set_polling_enabled(&key.into(), enabled)
    }

    /// Is background polling enabled for this vehicle?
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn get_updates(&self, key: impl Into<VehicleKey>) -> Result<bool, Error> {
        self.state()
            .runtime(&key.into())
            .map(|r| r.polling_enabled)
    }

    /// Set or clear the per-vehicle polling interval override.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn set_polling_interval(
        &self,
        key: impl Into<VehicleKey>,
        interval: Option<Duration>,
    ) -> Result<(), Error> {
        self.state()
            .set_polling_interval_override(&key.into(), interval)
    }
}

fn shift_state_of(drive: Option<&Value>) -> Option<ShiftState> {
    drive?.get("shift_state")?.as_str()?.parse().ok()
}

fn charging_state_of(charge: Option<&Value>) -> Option<ChargingStateEnum> {
    charge?.get("charging_state")?.as_str()?.parse().ok()
}

fn sentry_mode_of(vehicle_state: Option<&Value>) -> bool {
    vehicle_state
        .and_then(|state| state.get("sentry_mode"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// The optimistic cache effect of a successful command: the category and only
/// the fields the command is known to change. Commands with unknowable effects
/// (horn, flash, trunk toggles) patch nothing and wait for the next refresh.
fn command_effects(name: &str, payload: &Value) -> Option<(DataCategory, Value)> {
    match name {
        "door_lock" => Some((DataCategory::VehicleState, json!({"locked": true}))),
        "door_unlock" => Some((DataCategory::VehicleState, json!({"locked": false}))),
        "auto_conditioning_start" => Some((
            DataCategory::ClimateState,
            json!({"is_climate_on": true}),
        )),
        "auto_conditioning_stop" => Some((
            DataCategory::ClimateState,
            json!({"is_climate_on": false}),
        )),
        "charge_start" => Some((
            DataCategory::ChargeState,
            json!({"charging_state": "Charging"}),
        )),
        "charge_stop" => Some((
            DataCategory::ChargeState,
            json!({"charging_state": "Stopped"}),
        )),
        "charge_port_door_open" => Some((
            DataCategory::ChargeState,
            json!({"charge_port_door_open": true}),
        )),
        "charge_port_door_close" => Some((
            DataCategory::ChargeState,
            json!({"charge_port_door_open": false}),
        )),
        "set_charge_limit" => payload
            .get("percent")
            .map(|percent| (DataCategory::ChargeState, json!({"charge_limit_soc": percent}))),
        "set_temps" => {
            let mut fields = serde_json::Map::new();
            if let Some(temp) = payload.get("driver_temp") {
                fields.insert("driver_temp_setting".to_string(), temp.clone());
            }
            if let Some(temp) = payload.get("passenger_temp") {
                fields.insert("passenger_temp_setting".to_string(), temp.clone());
            }
            if fields.is_empty() {
                None
            } else {
                Some((DataCategory::ClimateState, Value::Object(fields)))
            }
        }
        "set_sentry_mode" => payload
            .get("on")
            .map(|on| (DataCategory::VehicleState, json!({"sentry_mode": on}))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    #[test]
    fn test_command_effects_cover_known_commands() {
        let (category, patch) = command_effects("door_lock", &json!({})).unwrap();
        assert_eq!(category, DataCategory::VehicleState);
        assert_eq!(patch, json!({"locked": true}));

        let (category, patch) =
            command_effects("set_charge_limit", &json!({"percent": 80})).unwrap();
        assert_eq!(category, DataCategory::ChargeState);
        assert_eq!(patch, json!({"charge_limit_soc": 80}));

        let (_, patch) = command_effects(
            "set_temps",
            &json!({"driver_temp": 21.5, "passenger_temp": 19.0}),
        )
        .unwrap();
        assert_eq!(
            patch,
            json!({"driver_temp_setting": 21.5, "passenger_temp_setting": 19.0})
        );

        assert!(command_effects("honk_horn", &json!({})).is_none());
        assert!(command_effects("actuate_trunk", &json!({"which_trunk": "rear"})).is_none());
    }

    #[test]
    fn test_state_parsers_tolerate_missing_data() {
        assert_eq!(shift_state_of(None), None);
        assert_eq!(shift_state_of(Some(&json!({"shift_state": null}))), None);
        assert_eq!(
            shift_state_of(Some(&json!({"shift_state": "D"}))),
            Some(ShiftState::D)
        );

        assert_eq!(charging_state_of(Some(&json!({}))), None);
        assert_eq!(
            charging_state_of(Some(&json!({"charging_state": "Complete"}))),
            Some(ChargingStateEnum::Complete)
        );

        assert!(!sentry_mode_of(None));
        assert!(sentry_mode_of(Some(&json!({"sentry_mode": true}))));
    }
}
