//! Vehicle identifiers and state vocabulary.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A vehicle ID for the owner-api endpoint.
#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash)]
pub struct VehicleId(u64);

impl VehicleId {
    /// Create a new vehicle ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A vehicle identification number, the stable human-facing cache key.
#[derive(Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash)]
pub struct Vin(String);

impl Vin {
    /// Create a new VIN.
    #[must_use]
    pub fn new(vin: impl Into<String>) -> Self {
        Self(vin.into())
    }

    /// The VIN as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Vin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Vin {
    fn from(vin: &str) -> Self {
        Self(vin.to_string())
    }
}

/// The id↔vin pairing for one discovered vehicle.
///
/// Established once per vehicle and never changes; every cache accessor can be
/// called with either half of the pair.
#[derive(Clone, Serialize, Deserialize, Debug, Eq, PartialEq)]
pub struct VehicleIdentity {
    /// Vehicle ID for owner-api endpoint paths.
    pub id: VehicleId,

    /// Vehicle identification number.
    pub vin: Vin,

    /// Vehicle display name.
    pub display_name: String,
}

/// Is the car currently charging?
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq)]
pub enum ChargingStateEnum {
    /// Charging is starting
    Starting,

    /// Charging is complete
    Complete,

    /// Charging is in progress
    Charging,

    /// Charging is not in progress and we are disconnected
    Disconnected,

    /// Charging is not in progress
    Stopped,

    /// Charger cable is connected but not getting power
    NoPower,
}

impl ChargingStateEnum {
    /// Is the car currently charging?
    #[must_use]
    pub const fn is_charging(self) -> bool {
        match self {
            ChargingStateEnum::Starting | ChargingStateEnum::Charging => true,
            ChargingStateEnum::Complete
            | ChargingStateEnum::Disconnected
            | ChargingStateEnum::Stopped
            | ChargingStateEnum::NoPower => false,
        }
    }

    /// Is the car plugged in?
    #[must_use]
    pub const fn is_plugged_in(self) -> bool {
        match self {
            ChargingStateEnum::Starting
            | ChargingStateEnum::Charging
            | ChargingStateEnum::Complete
            | ChargingStateEnum::NoPower
            | ChargingStateEnum::Stopped => true,
            ChargingStateEnum::Disconnected => false,
        }
    }
}

/// Charging state error
#[derive(Debug, Error)]
pub enum ChargingStateError {
    /// Invalid charging state.
    #[error("Invalid charging state: {0}")]
    InvalidChargingState(String),
}

impl std::str::FromStr for ChargingStateEnum {
    type Err = ChargingStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Starting" => Ok(Self::Starting),
            "Complete" => Ok(Self::Complete),
            "Charging" => Ok(Self::Charging),
            "Disconnected" => Ok(Self::Disconnected),
            "Stopped" => Ok(Self::Stopped),
            "NoPower" => Ok(Self::NoPower),
            state => Err(ChargingStateError::InvalidChargingState(state.to_string())),
        }
    }
}

/// The gear the car is in, as reported in the drive state.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq)]
pub enum ShiftState {
    /// Park
    P,
    /// Drive
    D,
    /// Reverse
    R,
    /// Neutral
    N,
}

impl ShiftState {
    /// Is the car actively driving in this gear?
    #[must_use]
    pub const fn is_driving(self) -> bool {
        match self {
            ShiftState::D | ShiftState::R => true,
            ShiftState::P | ShiftState::N => false,
        }
    }
}

/// Shift state error
#[derive(Debug, Error)]
pub enum ShiftStateError {
    /// Invalid shift state.
    #[error("Invalid shift state: {0}")]
    InvalidShiftState(String),
}

impl std::str::FromStr for ShiftState {
    type Err = ShiftStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P" => Ok(Self::P),
            "D" => Ok(Self::D),
            "R" => Ok(Self::R),
            "N" => Ok(Self::N),
            state => Err(ShiftStateError::InvalidShiftState(state.to_string())),
        }
    }
}

/// One of the six vehicle-data sub-objects held in the cache.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    /// Battery and charging data.
    ChargeState,

    /// HVAC data.
    ClimateState,

    /// Position, heading, speed and gear data.
    DriveState,

    /// Unit and display settings.
    GuiSettings,

    /// Doors, locks, sentry, software data.
    VehicleState,

    /// Static configuration (car type, options).
    VehicleConfig,
}

impl DataCategory {
    /// All categories, in the order the vehicle-data response carries them.
    pub const ALL: [DataCategory; 6] = [
        DataCategory::ChargeState,
        DataCategory::ClimateState,
        DataCategory::DriveState,
        DataCategory::GuiSettings,
        DataCategory::VehicleState,
        DataCategory::VehicleConfig,
    ];

    /// The key of this category in the vehicle-data response.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            DataCategory::ChargeState => "charge_state",
            DataCategory::ClimateState => "climate_state",
            DataCategory::DriveState => "drive_state",
            DataCategory::GuiSettings => "gui_settings",
            DataCategory::VehicleState => "vehicle_state",
            DataCategory::VehicleConfig => "vehicle_config",
        }
    }
}

impl Display for DataCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_charging_state_from_str() {
        let state: ChargingStateEnum = "Charging".parse().unwrap();
        assert_eq!(state, ChargingStateEnum::Charging);
        assert!(state.is_charging());
        assert!(state.is_plugged_in());

        let state: ChargingStateEnum = "Disconnected".parse().unwrap();
        assert!(!state.is_charging());
        assert!(!state.is_plugged_in());

        "Dancing".parse::<ChargingStateEnum>().unwrap_err();
    }

    #[test]
    fn test_shift_state() {
        assert!("D".parse::<ShiftState>().unwrap().is_driving());
        assert!("R".parse::<ShiftState>().unwrap().is_driving());
        assert!(!"P".parse::<ShiftState>().unwrap().is_driving());
        assert!(!"N".parse::<ShiftState>().unwrap().is_driving());
        "X".parse::<ShiftState>().unwrap_err();
    }

    #[test]
    fn test_data_category_wire_names() {
        let names: Vec<_> = DataCategory::ALL.iter().map(|c| c.wire_name()).collect();
        assert_eq!(
            names,
            [
                "charge_state",
                "climate_state",
                "drive_state",
                "gui_settings",
                "vehicle_state",
                "vehicle_config",
            ]
        );
    }

    #[test]
    fn test_vehicle_id_serde() {
        let id: VehicleId = serde_json::from_str("12345").unwrap();
        assert_eq!(id, VehicleId::new(12345));
        assert_eq!(id.to_string(), "12345");
    }
}
