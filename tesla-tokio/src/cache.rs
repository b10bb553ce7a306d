//! Controller-owned vehicle data cache and runtime bookkeeping.
//!
//! One entry per discovered vehicle for the life of the process. Entries hold
//! the last JSON payload per data category with no implicit expiry — staleness
//! is managed by the controller through the bookkeeping timestamps, and stale
//! data is preferable to missing data for read accessors.

use std::collections::HashMap;
use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;

use tesla_common::vehicle::{DataCategory, VehicleId, VehicleIdentity, Vin};

use crate::error::Error;

/// A cache key: either half of the id↔vin pairing.
#[derive(Debug, Clone)]
pub enum VehicleKey {
    /// The numeric owner-api handle.
    Id(VehicleId),

    /// The vehicle identification number.
    Vin(Vin),
}

impl Display for VehicleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VehicleKey::Id(id) => write!(f, "{id}"),
            VehicleKey::Vin(vin) => write!(f, "{vin}"),
        }
    }
}

impl From<VehicleId> for VehicleKey {
    fn from(id: VehicleId) -> Self {
        VehicleKey::Id(id)
    }
}

impl From<Vin> for VehicleKey {
    fn from(vin: Vin) -> Self {
        VehicleKey::Vin(vin)
    }
}

impl From<&Vin> for VehicleKey {
    fn from(vin: &Vin) -> Self {
        VehicleKey::Vin(vin.clone())
    }
}

/// Per-vehicle bookkeeping used by the polling and wake decisions.
///
/// Wall-clock stamps are what callers display; the monotonic instants are the
/// twins the interval gating and idle heuristic run on, so they keep working
/// under a paused test clock and across wall-clock jumps.
#[derive(Debug, Clone)]
pub struct VehicleRuntimeState {
    /// Authoritative wake state used to gate commands.
    pub online: bool,

    /// When the last full refresh landed.
    pub last_update_time: Option<DateTime<Utc>>,

    /// Monotonic twin of `last_update_time`, used for interval gating.
    pub last_update_instant: Option<Instant>,

    /// When the vehicle was last observed transitioning asleep→online.
    pub last_wake_up_time: Option<DateTime<Utc>>,

    /// When the vehicle last left a driving gear.
    pub last_park_time: Option<Instant>,

    /// Caller-controlled opt-out of background polling.
    pub polling_enabled: bool,

    /// Caller-selected replacement for the base polling interval.
    pub polling_interval_override: Option<Duration>,
}

impl Default for VehicleRuntimeState {
    fn default() -> Self {
        Self {
            online: false,
            last_update_time: None,
            last_update_instant: None,
            last_wake_up_time: None,
            last_park_time: None,
            polling_enabled: true,
            polling_interval_override: None,
        }
    }
}

#[derive(Debug)]
struct VehicleEntry {
    identity: VehicleIdentity,
    data: HashMap<DataCategory, Value>,
    runtime: VehicleRuntimeState,
}

/// The per-vehicle data cache plus its id↔vin identity map.
#[derive(Debug, Default)]
pub struct VehicleCache {
    by_vin: HashMap<Vin, VehicleEntry>,
    id_to_vin: HashMap<VehicleId, Vin>,
}

impl VehicleCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a discovered vehicle.
    ///
    /// The identity mapping is established once and never changes; inserting
    /// an already-known VIN leaves the existing entry untouched. The park time
    /// is stamped at discovery so the idle heuristic has a reference point.
    pub fn insert_vehicle(&mut self, identity: VehicleIdentity) {
        if self.by_vin.contains_key(&identity.vin) {
            return;
        }

        self.id_to_vin.insert(identity.id, identity.vin.clone());
        self.by_vin.insert(
            identity.vin.clone(),
            VehicleEntry {
                identity,
                data: HashMap::new(),
                runtime: VehicleRuntimeState {
                    last_park_time: Some(Instant::now()),
                    ..VehicleRuntimeState::default()
                },
            },
        );
    }

    /// All known VINs.
    #[must_use]
    pub fn vins(&self) -> Vec<Vin> {
        self.by_vin.keys().cloned().collect()
    }

    fn resolve(&self, key: &VehicleKey) -> Result<&Vin, Error> {
        match key {
            VehicleKey::Vin(vin) => self
                .by_vin
                .get_key_value(vin)
                .map(|(vin, _)| vin)
                .ok_or_else(|| Error::UnknownVehicle(key.to_string())),
            VehicleKey::Id(id) => self
                .id_to_vin
                .get(id)
                .ok_or_else(|| Error::UnknownVehicle(key.to_string())),
        }
    }

    fn entry(&self, key: &VehicleKey) -> Result<&VehicleEntry, Error> {
        let vin = self.resolve(key)?;
        self.by_vin
            .get(vin)
            .ok_or_else(|| Error::UnknownVehicle(key.to_string()))
    }

    fn entry_mut(&mut self, key: &VehicleKey) -> Result<&mut VehicleEntry, Error> {
        let vin = self.resolve(key)?.clone();
        self.by_vin
            .get_mut(&vin)
            .ok_or_else(|| Error::UnknownVehicle(key.to_string()))
    }

    /// The identity of the vehicle behind either key.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn identity(&self, key: &VehicleKey) -> Result<VehicleIdentity, Error> {
        self.entry(key).map(|entry| entry.identity.clone())
    }

    /// The last-written payload for one category, or `None` if never fetched.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn read(&self, key: &VehicleKey, category: DataCategory) -> Result<Option<Value>, Error> {
        self.entry(key)
            .map(|entry| entry.data.get(&category).cloned())
    }

    /// Overwrite one category with a freshly fetched payload.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn write(
        &mut self,
        key: &VehicleKey,
        category: DataCategory,
        value: Value,
    ) -> Result<(), Error> {
        self.entry_mut(key)?.data.insert(category, value);
        Ok(())
    }

    /// Shallow-merge only the given keys into one category.
    ///
    /// Used for optimistic patches after a successful command: values that are
    /// not JSON objects on both sides fall back to a full overwrite.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn patch(
        &mut self,
        key: &VehicleKey,
        category: DataCategory,
        partial: Value,
    ) -> Result<(), Error> {
        let entry = self.entry_mut(key)?;

        match (entry.data.get_mut(&category), partial) {
            (Some(Value::Object(existing)), Value::Object(partial)) => {
                for (field, value) in partial {
                    existing.insert(field, value);
                }
            }
            (_, partial) => {
                entry.data.insert(category, partial);
            }
        }
        Ok(())
    }

    /// The runtime bookkeeping for one vehicle.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn runtime(&self, key: &VehicleKey) -> Result<VehicleRuntimeState, Error> {
        self.entry(key).map(|entry| entry.runtime.clone())
    }

    /// Record the vehicle's wake state.
    ///
    /// An asleep→online transition also stamps the wake-up time; re-asserting
    /// an already-online vehicle does not restamp it.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn set_online(
        &mut self,
        key: &VehicleKey,
        online: bool,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let entry = self.entry_mut(key)?;
        if online && !entry.runtime.online {
            entry.runtime.last_wake_up_time = Some(now);
        }
        entry.runtime.online = online;
        Ok(())
    }

    /// Stamp the time of the last successful full refresh.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn stamp_update(&mut self, key: &VehicleKey, now: DateTime<Utc>) -> Result<(), Error> {
        let runtime = &mut self.entry_mut(key)?.runtime;
        runtime.last_update_time = Some(now);
        runtime.last_update_instant = Some(Instant::now());
        Ok(())
    }

    /// Stamp the time the vehicle left a driving gear.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn stamp_park(&mut self, key: &VehicleKey) -> Result<(), Error> {
        self.entry_mut(key)?.runtime.last_park_time = Some(Instant::now());
        Ok(())
    }

    /// Enable or disable background polling for one vehicle.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn set_polling_enabled(&mut self, key: &VehicleKey, enabled: bool) -> Result<(), Error> {
        self.entry_mut(key)?.runtime.polling_enabled = enabled;
        Ok(())
    }

    /// Set or clear the per-vehicle polling interval override.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVehicle` if the key is not in the identity map.
    pub fn set_polling_interval_override(
        &mut self,
        key: &VehicleKey,
        interval: Option<Duration>,
    ) -> Result<(), Error> {
        self.entry_mut(key)?.runtime.polling_interval_override = interval;
        Ok(())
    }
}
