//! Test support: a scriptable in-memory [`Api`] implementation and canned
//! response payloads.
//!
//! Lives in the library rather than the test tree so integration tests and
//! downstream crates can drive the controller without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::api::{Api, ApiError};

/// A scripted outcome for one request.
#[derive(Debug, Clone)]
pub enum FakeResult {
    /// Respond with this JSON body.
    Ok(Value),

    /// Fail with this HTTP status code.
    Status(u16),

    /// Fail with the vehicle-asleep status.
    Unavailable,

    /// Fail with a connectivity error.
    Connection,
}

impl FakeResult {
    fn into_result(self) -> Result<Value, ApiError> {
        match self {
            FakeResult::Ok(value) => Ok(value),
            FakeResult::Status(code) => {
                Err(ApiError::from_status(code, "scripted error".to_string()))
            }
            FakeResult::Unavailable => Err(ApiError::VehicleUnavailable),
            FakeResult::Connection => {
                Err(ApiError::Connection("scripted connection error".to_string()))
            }
        }
    }
}

/// One request the fake saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeRequest {
    /// "GET" or "POST".
    pub method: &'static str,

    /// The request path.
    pub path: String,

    /// The POST body, `None` for GETs.
    pub body: Option<Value>,
}

#[derive(Debug, Default)]
struct Script {
    queues: HashMap<String, VecDeque<FakeResult>>,
    defaults: HashMap<String, FakeResult>,
    requests: Vec<FakeRequest>,
}

/// A scriptable [`Api`] double.
///
/// Responses are looked up by exact path: first from a per-path FIFO queue,
/// then from a sticky per-path default. An unscripted request fails with a
/// distinctive status code rather than panicking.
#[derive(Debug, Default)]
pub struct FakeApi {
    script: Mutex<Script>,
}

/// The status code an unscripted request fails with.
pub const UNSCRIPTED_STATUS: u16 = 599;

impl FakeApi {
    /// Create a fake with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue one response for the given path; consumed in FIFO order.
    pub fn queue(&self, path: impl Into<String>, result: FakeResult) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queues
            .entry(path.into())
            .or_default()
            .push_back(result);
    }

    /// Set the sticky response used whenever the path's queue is empty.
    pub fn set_default(&self, path: impl Into<String>, result: FakeResult) {
        self.script().defaults.insert(path.into(), result);
    }

    /// Every request the fake has seen, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<FakeRequest> {
        self.script().requests.clone()
    }

    /// How many requests hit the given path.
    #[must_use]
    pub fn request_count(&self, path: &str) -> usize {
        self.script()
            .requests
            .iter()
            .filter(|request| request.path == path)
            .count()
    }

    fn respond(&self, method: &'static str, path: &str, body: Option<Value>) -> FakeResult {
        let mut script = self.script();
        script.requests.push(FakeRequest {
            method,
            path: path.to_string(),
            body,
        });

        if let Some(result) = script
            .queues
            .get_mut(path)
            .and_then(VecDeque::pop_front)
        {
            return result;
        }
        if let Some(result) = script.defaults.get(path) {
            return result.clone();
        }
        FakeResult::Status(UNSCRIPTED_STATUS)
    }
}

#[async_trait]
impl Api for FakeApi {
    async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.respond("GET", path, None).into_result()
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.respond("POST", path, Some(body.clone())).into_result()
    }
}

/// A products listing with one online vehicle.
#[must_use]
pub fn products_response(id: u64, vin: &str, display_name: &str, state: &str) -> Value {
    json!({
        "response": [
            {
                "id": id,
                "vehicle_id": id + 1000,
                "vin": vin,
                "display_name": display_name,
                "state": state,
            },
            {
                "energy_site_id": 90210,
                "resource_type": "solar",
            }
        ],
        "count": 2
    })
}

/// A full vehicle-data payload with all six categories populated.
#[must_use]
pub fn vehicle_data_response(
    state: &str,
    shift_state: Option<&str>,
    charging_state: &str,
    sentry_mode: bool,
) -> Value {
    json!({
        "response": {
            "state": state,
            "charge_state": {
                "battery_level": 64,
                "battery_range": 167.12,
                "charge_limit_soc": 80,
                "charge_port_door_open": false,
                "charging_state": charging_state,
                "time_to_full_charge": 0.0,
            },
            "climate_state": {
                "driver_temp_setting": 21.0,
                "inside_temp": 18.5,
                "is_climate_on": false,
                "outside_temp": 12.0,
                "passenger_temp_setting": 21.0,
            },
            "drive_state": {
                "heading": 184,
                "latitude": -37.8136,
                "longitude": 144.9631,
                "shift_state": shift_state,
                "speed": null,
            },
            "gui_settings": {
                "gui_distance_units": "km/hr",
                "gui_temperature_units": "C",
            },
            "vehicle_state": {
                "df": 0,
                "dr": 0,
                "ft": 0,
                "locked": true,
                "odometer": 12345.6,
                "pf": 0,
                "pr": 0,
                "rt": 0,
                "sentry_mode": sentry_mode,
                "car_version": "2024.26.3",
            },
            "vehicle_config": {
                "car_type": "model3",
                "exterior_color": "DeepBlue",
            },
        }
    })
}

/// A wake-up response reporting the given state.
#[must_use]
pub fn wake_up_response(state: &str) -> Value {
    json!({"response": {"state": state}})
}

/// A command response.
#[must_use]
pub fn command_response(result: bool, reason: &str) -> Value {
    json!({"response": {"result": result, "reason": reason}})
}
