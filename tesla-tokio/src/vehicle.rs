//! Read-view and command surface for a single vehicle.
//!
//! A [`Vehicle`] holds a reference to the controller and its own identity,
//! never to the cache itself. Reads are typed projections over the cached
//! JSON; commands are one-line calls into [`Controller::command`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use tesla_common::vehicle::{ChargingStateEnum, DataCategory, ShiftState, VehicleId, Vin};

use crate::api::CommandResponse;
use crate::cache::VehicleKey;
use crate::controller::Controller;
use crate::error::Error;

/// Which trunk to actuate.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Trunk {
    /// The front trunk.
    Front,

    /// The rear trunk.
    Rear,
}

impl Trunk {
    const fn wire_name(self) -> &'static str {
        match self {
            Trunk::Front => "front",
            Trunk::Rear => "rear",
        }
    }
}

/// A read/command view over one discovered vehicle.
#[derive(Debug, Clone)]
pub struct Vehicle {
    controller: Arc<Controller>,
    id: VehicleId,
    vin: Vin,
    display_name: String,
}

impl Vehicle {
    /// Create a view over an already-discovered vehicle.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn new(controller: Arc<Controller>, key: impl Into<VehicleKey>) -> Result<Self, Error> {
        let identity = controller.identity(key)?;
        Ok(Self {
            controller,
            id: identity.id,
            vin: identity.vin,
            display_name: identity.display_name,
        })
    }

    /// The owner-api handle.
    #[must_use]
    pub const fn id(&self) -> VehicleId {
        self.id
    }

    /// The vehicle identification number.
    #[must_use]
    pub const fn vin(&self) -> &Vin {
        &self.vin
    }

    /// The display name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Is the vehicle currently online?
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.controller.is_car_online(self.id).unwrap_or(false)
    }

    /// When the last full refresh landed, if ever.
    #[must_use]
    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        self.controller
            .get_last_update_time(self.id)
            .ok()
            .flatten()
    }

    /// Refresh the cached data if the polling window has elapsed.
    ///
    /// # Errors
    ///
    /// Propagates refresh failures from the controller.
    pub async fn refresh(&self, wake_if_asleep: bool) -> Result<bool, Error> {
        self.controller.refresh(self.id, wake_if_asleep).await
    }

    fn field(&self, category: DataCategory, field: &str) -> Option<Value> {
        let params = match category {
            DataCategory::ChargeState => self.controller.get_charging_params(self.id),
            DataCategory::ClimateState => self.controller.get_climate_params(self.id),
            DataCategory::DriveState => self.controller.get_drive_params(self.id),
            DataCategory::GuiSettings => self.controller.get_gui_params(self.id),
            DataCategory::VehicleState => self.controller.get_state_params(self.id),
            DataCategory::VehicleConfig => self.controller.get_config_params(self.id),
        };
        params.ok().flatten()?.get(field).cloned()
    }

    /// Battery state of charge in percent.
    #[must_use]
    pub fn battery_level(&self) -> Option<u64> {
        self.field(DataCategory::ChargeState, "battery_level")?.as_u64()
    }

    /// Rated battery range.
    #[must_use]
    pub fn battery_range(&self) -> Option<f64> {
        self.field(DataCategory::ChargeState, "battery_range")?.as_f64()
    }

    /// The current charge limit in percent.
    #[must_use]
    pub fn charge_limit_soc(&self) -> Option<u64> {
        self.field(DataCategory::ChargeState, "charge_limit_soc")?.as_u64()
    }

    /// The current charging state.
    #[must_use]
    pub fn charging_state(&self) -> Option<ChargingStateEnum> {
        self.field(DataCategory::ChargeState, "charging_state")?
            .as_str()?
            .parse()
            .ok()
    }

    /// The estimated time to full charge in hours.
    #[must_use]
    pub fn time_to_full_charge(&self) -> Option<f64> {
        self.field(DataCategory::ChargeState, "time_to_full_charge")?.as_f64()
    }

    /// Is the charge port door open?
    #[must_use]
    pub fn charge_port_door_open(&self) -> Option<bool> {
        self.field(DataCategory::ChargeState, "charge_port_door_open")?.as_bool()
    }

    /// Is the HVAC running?
    #[must_use]
    pub fn is_climate_on(&self) -> Option<bool> {
        self.field(DataCategory::ClimateState, "is_climate_on")?.as_bool()
    }

    /// Cabin temperature.
    #[must_use]
    pub fn inside_temp(&self) -> Option<f64> {
        self.field(DataCategory::ClimateState, "inside_temp")?.as_f64()
    }

    /// Outside temperature.
    #[must_use]
    pub fn outside_temp(&self) -> Option<f64> {
        self.field(DataCategory::ClimateState, "outside_temp")?.as_f64()
    }

    /// The driver-side temperature setting.
    #[must_use]
    pub fn driver_temp_setting(&self) -> Option<f64> {
        self.field(DataCategory::ClimateState, "driver_temp_setting")?.as_f64()
    }

    /// Position as (latitude, longitude).
    #[must_use]
    pub fn position(&self) -> Option<(f64, f64)> {
        let latitude = self.field(DataCategory::DriveState, "latitude")?.as_f64()?;
        let longitude = self.field(DataCategory::DriveState, "longitude")?.as_f64()?;
        Some((latitude, longitude))
    }

    /// Compass heading in degrees.
    #[must_use]
    pub fn heading(&self) -> Option<u64> {
        self.field(DataCategory::DriveState, "heading")?.as_u64()
    }

    /// Speed, `None` when parked.
    #[must_use]
    pub fn speed(&self) -> Option<f64> {
        self.field(DataCategory::DriveState, "speed")?.as_f64()
    }

    /// The current gear.
    #[must_use]
    pub fn shift_state(&self) -> Option<ShiftState> {
        self.field(DataCategory::DriveState, "shift_state")?
            .as_str()?
            .parse()
            .ok()
    }

    /// Are the doors locked?
    #[must_use]
    pub fn locked(&self) -> Option<bool> {
        self.field(DataCategory::VehicleState, "locked")?.as_bool()
    }

    /// Is any door open?
    #[must_use]
    pub fn doors_open(&self) -> Option<bool> {
        let state = self.controller.get_state_params(self.id).ok().flatten()?;
        let door = |name: &str| {
            state
                .get(name)
                .and_then(Value::as_u64)
                .is_some_and(|flag| flag != 0)
        };
        Some(door("df") || door("dr") || door("pf") || door("pr"))
    }

    /// Is the front trunk open?
    #[must_use]
    pub fn frunk_open(&self) -> Option<bool> {
        self.field(DataCategory::VehicleState, "ft")
            .and_then(|value| value.as_u64())
            .map(|flag| flag != 0)
    }

    /// Is the rear trunk open?
    #[must_use]
    pub fn trunk_open(&self) -> Option<bool> {
        self.field(DataCategory::VehicleState, "rt")
            .and_then(|value| value.as_u64())
            .map(|flag| flag != 0)
    }

    /// Is sentry mode enabled?
    #[must_use]
    pub fn sentry_mode(&self) -> Option<bool> {
        self.field(DataCategory::VehicleState, "sentry_mode")?.as_bool()
    }

    /// The odometer reading.
    #[must_use]
    pub fn odometer(&self) -> Option<f64> {
        self.field(DataCategory::VehicleState, "odometer")?.as_f64()
    }

    /// The installed software version.
    #[must_use]
    pub fn car_version(&self) -> Option<String> {
        self.field(DataCategory::VehicleState, "car_version")
            .and_then(|value| value.as_str().map(str::to_string))
    }

    /// Run the wake-retry protocol until the vehicle is online.
    ///
    /// # Errors
    ///
    /// Returns `Error::WakeRetryLimitExceeded` if the vehicle never came up.
    pub async fn wake_up(&self) -> Result<(), Error> {
        self.controller.wake_up(&VehicleKey::from(self.id)).await
    }

    async fn command(
        &self,
        name: &str,
        payload: Value,
        wake_if_asleep: bool,
    ) -> Result<Option<CommandResponse>, Error> {
        self.controller
            .command(self.id, name, payload, wake_if_asleep)
            .await
    }

    /// Lock the doors.
    ///
    /// # Errors
    ///
    /// Propagates command failures from the controller.
    pub async fn lock(&self, wake_if_asleep: bool) -> Result<Option<CommandResponse>, Error> {
        self.command("door_lock", json!({}), wake_if_asleep).await
    }

    /// Unlock the doors.
    ///
    /// # Errors
    ///
    /// Propagates command failures from the controller.
    pub async fn unlock(&self, wake_if_asleep: bool) -> Result<Option<CommandResponse>, Error> {
        self.command("door_unlock", json!({}), wake_if_asleep).await
    }

    /// Start the HVAC.
    ///
    /// # Errors
    ///
    /// Propagates command failures from the controller.
    pub async fn climate_on(&self, wake_if_asleep: bool) -> Result<Option<CommandResponse>, Error> {
        self.command("auto_conditioning_start", json!({}), wake_if_asleep)
            .await
    }

    /// Stop the HVAC.
    ///
    /// # Errors
    ///
    /// Propagates command failures from the controller.
    pub async fn climate_off(
        &self,
        wake_if_asleep: bool,
    ) -> Result<Option<CommandResponse>, Error> {
        self.command("auto_conditioning_stop", json!({}), wake_if_asleep)
            .await
    }

    /// Set the cabin temperature targets.
    ///
    /// # Errors
    ///
    /// Propagates command failures from the controller.
    pub async fn set_temps(
        &self,
        driver_temp: f64,
        passenger_temp: f64,
        wake_if_asleep: bool,
    ) -> Result<Option<CommandResponse>, Error> {
        self.command(
            "set_temps",
            json!({"driver_temp": driver_temp, "passenger_temp": passenger_temp}),
            wake_if_asleep,
        )
        .await
    }

    /// Request the car start charging.
    ///
    /// # Errors
    ///
    /// Propagates command failures from the controller.
    pub async fn charge_start(
        &self,
        wake_if_asleep: bool,
    ) -> Result<Option<CommandResponse>, Error> {
        self.command("charge_start", json!({}), wake_if_asleep).await
    }

    /// Request the car stop charging.
    ///
    /// # Errors
    ///
    /// Propagates command failures from the controller.
    pub async fn charge_stop(
        &self,
        wake_if_asleep: bool,
    ) -> Result<Option<CommandResponse>, Error> {
        self.command("charge_stop", json!({}), wake_if_asleep).await
    }

    /// Set the charge limit for the car.
    ///
    /// # Errors
    ///
    /// Propagates command failures from the controller.
    pub async fn set_charge_limit(
        &self,
        percent: u8,
        wake_if_asleep: bool,
    ) -> Result<Option<CommandResponse>, Error> {
        self.command(
            "set_charge_limit",
            json!({"percent": percent}),
            wake_if_asleep,
        )
        .await
    }

    /// Open the charge port door.
    ///
    /// # Errors
    ///
    /// Propagates command failures from the controller.
    pub async fn open_charge_port(
        &self,
        wake_if_asleep: bool,
    ) -> Result<Option<CommandResponse>, Error> {
        self.command("charge_port_door_open", json!({}), wake_if_asleep)
            .await
    }

    /// Enable or disable sentry mode.
    ///
    /// # Errors
    ///
    /// Propagates command failures from the controller.
    pub async fn set_sentry_mode(
        &self,
        on: bool,
        wake_if_asleep: bool,
    ) -> Result<Option<CommandResponse>, Error> {
        self.command("set_sentry_mode", json!({"on": on}), wake_if_asleep)
            .await
    }

    /// Honk the horn.
    ///
    /// # Errors
    ///
    /// Propagates command failures from the controller.
    pub async fn honk_horn(&self, wake_if_asleep: bool) -> Result<Option<CommandResponse>, Error> {
        self.command("honk_horn", json!({}), wake_if_asleep).await
    }

    /// Flash the lights.
    ///
    /// # Errors
    ///
    /// Propagates command failures from the controller.
    pub async fn flash_lights(
        &self,
        wake_if_asleep: bool,
    ) -> Result<Option<CommandResponse>, Error> {
        self.command("flash_lights", json!({}), wake_if_asleep).await
    }

    /// Open or close a trunk.
    ///
    /// # Errors
    ///
    /// Propagates command failures from the controller.
    pub async fn actuate_trunk(
        &self,
        trunk: Trunk,
        wake_if_asleep: bool,
    ) -> Result<Option<CommandResponse>, Error> {
        self.command(
            "actuate_trunk",
            json!({"which_trunk": trunk.wire_name()}),
            wake_if_asleep,
        )
        .await
    }

    /// Trigger the nearest homelink device.
    ///
    /// # Errors
    ///
    /// Propagates command failures from the controller.
    pub async fn trigger_homelink(
        &self,
        latitude: f64,
        longitude: f64,
        wake_if_asleep: bool,
    ) -> Result<Option<CommandResponse>, Error> {
        self.command(
            "trigger_homelink",
            json!({"lat": latitude, "lon": longitude}),
            wake_if_asleep,
        )
        .await
    }
}
