//! Wrapper around the owner API's HTTP transport.
//!
//! The controller talks to the API through the [`Api`] trait; [`OwnerApi`] is
//! the reqwest implementation against the real endpoint. Request signing and
//! token refresh are the caller's problem — this layer takes an already-issued
//! bearer token.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use tap::Pipe;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use tesla_common::vehicle::{VehicleId, Vin};

/// Status codes representing permanent client errors, never worth a retry:
/// unauthorized, not-found, mobile-access-disabled, account-locked and
/// too-many-requests.
const PERMANENT_STATUS: [u16; 5] = [401, 404, 405, 423, 429];

/// The status code the API answers with when the vehicle is asleep.
const VEHICLE_UNAVAILABLE: u16 = 408;

/// Error when something went wrong with the API
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connectivity failure: DNS, timeout, connection reset.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The API answered with a non-success status code.
    #[error("API error {code}: {reason}")]
    Status {
        /// The HTTP status code.
        code: u16,
        /// The reason the API gave, or "" if it gave none.
        reason: String,
    },

    /// The vehicle is asleep and cannot process the request.
    #[error("Vehicle unavailable (asleep)")]
    VehicleUnavailable,

    /// Json error
    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    /// Map a status code to the matching error.
    #[must_use]
    pub fn from_status(code: u16, reason: String) -> Self {
        if code == VEHICLE_UNAVAILABLE {
            ApiError::VehicleUnavailable
        } else {
            ApiError::Status { code, reason }
        }
    }

    /// Is it worth sending the same request again?
    ///
    /// Connectivity errors always are. Status errors are unless the code is a
    /// permanent client error. A sleeping vehicle is retryable at this layer —
    /// whether to wake it instead is the controller's decision.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Connection(_) => true,
            ApiError::Status { code, .. } => !PERMANENT_STATUS.contains(code),
            ApiError::VehicleUnavailable => true,
            ApiError::Json(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        err.status().map_or_else(
            || ApiError::Connection(err.to_string()),
            |code| ApiError::from_status(code.as_u16(), err.to_string()),
        )
    }
}

/// The HTTP surface the controller needs from the owner API.
#[async_trait]
pub trait Api: Send + Sync + std::fmt::Debug {
    /// GET the given path, returning the decoded JSON body.
    async fn get(&self, path: &str) -> Result<Value, ApiError>;

    /// POST the given body to the given path, returning the decoded JSON body.
    async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError>;
}

/// Owner API endpoint paths.
pub mod endpoint {
    use super::VehicleId;
    use crate::energy::EnergySiteId;

    /// List all products (vehicles and energy sites) on the account.
    #[must_use]
    pub fn products() -> String {
        "api/1/products".to_string()
    }

    /// Full vehicle data: top-level state plus the six category sub-objects.
    #[must_use]
    pub fn vehicle_data(id: VehicleId) -> String {
        format!("api/1/vehicles/{id}/vehicle_data")
    }

    /// Ask a sleeping vehicle to power up its networking stack.
    #[must_use]
    pub fn wake_up(id: VehicleId) -> String {
        format!("api/1/vehicles/{id}/wake_up")
    }

    /// A vehicle command endpoint, e.g. `door_lock` or `charge_start`.
    #[must_use]
    pub fn command(id: VehicleId, name: &str) -> String {
        format!("api/1/vehicles/{id}/command/{name}")
    }

    /// Aggregate power/energy readings for an energy site.
    #[must_use]
    pub fn site_live_status(id: EnergySiteId) -> String {
        format!("api/1/energy_sites/{id}/live_status")
    }

    /// Configuration and firmware data for an energy site.
    #[must_use]
    pub fn site_info(id: EnergySiteId) -> String {
        format!("api/1/energy_sites/{id}/site_info")
    }

    /// Change the backup reserve of an energy site's battery.
    #[must_use]
    pub fn backup_reserve(id: EnergySiteId) -> String {
        format!("api/1/energy_sites/{id}/backup")
    }

    /// Change the operation mode of an energy site's battery.
    #[must_use]
    pub fn operation_mode(id: EnergySiteId) -> String {
        format!("api/1/energy_sites/{id}/operation")
    }
}

/// The response envelope wrapping every owner API payload.
#[derive(Debug, Deserialize)]
pub struct OuterResponse<T> {
    /// The wrapped payload.
    pub response: T,
}

/// The response from a generic command request.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CommandResponse {
    /// Did the command take effect?
    #[serde(default)]
    pub result: bool,

    /// The reason for an error, or "" / absent on success.
    #[serde(default)]
    pub reason: Option<String>,
}

/// The response from a wake up request.
#[derive(Debug, Clone, Deserialize)]
pub struct WakeUpResponse {
    /// The vehicle's reported state, "online" once awake.
    pub state: String,
}

/// One vehicle as listed by the products endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct VehicleListing {
    /// Vehicle ID for owner-api endpoint paths.
    pub id: VehicleId,

    /// Vehicle identification number.
    pub vin: Vin,

    /// Vehicle display name.
    pub display_name: String,

    /// The vehicle's reported state, "online" or "asleep".
    pub state: String,
}

/// Decode the `response` envelope of a raw API payload into `T`.
///
/// # Errors
///
/// Returns `ApiError::Json` if the payload does not have the expected shape.
pub fn parse_response<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value::<OuterResponse<T>>(value)
        .map(|outer| outer.response)
        .map_err(ApiError::from)
}

/// Transport settings for the owner API.
#[derive(Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the owner API.
    pub base_url: Url,

    /// Bearer token used to authorize every request.
    pub access_token: String,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("access_token", &"[censored]")
            .finish()
    }
}

/// The reqwest implementation of [`Api`] against the real owner API.
#[derive(Debug, Clone)]
pub struct OwnerApi {
    client: reqwest::Client,
    base_url: Url,
    access_token: String,
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

impl OwnerApi {
    /// Create a new owner API transport.
    #[must_use]
    pub fn new(base_url: Url, access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            access_token: access_token.into(),
        }
    }

    /// Create a transport from a deserialized configuration.
    #[must_use]
    pub fn from_config(config: &ApiConfig) -> Self {
        Self::new(config.base_url.clone(), config.access_token.clone())
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|err| ApiError::Connection(format!("Invalid URL {path}: {err}")))
    }

    async fn handle_response(response: reqwest::Response) -> Result<Value, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            error!("API error {status}: {reason}");
            return Err(ApiError::from_status(status.as_u16(), reason));
        }
        response.json().await.map_err(ApiError::from)
    }
}

#[async_trait]
impl Api for OwnerApi {
    #[tracing::instrument(skip(self))]
    async fn get(&self, path: &str) -> Result<Value, ApiError> {
        debug!("get {path}");

        let response = self
            .client
            .get(self.url(path)?)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.access_token))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(ApiError::from)?
            .pipe(Self::handle_response)
            .await?;

        debug!("get done {path}");
        Ok(response)
    }

    #[tracing::instrument(skip(self, body))]
    async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        debug!("post {path}");

        let response = self
            .client
            .post(self.url(path)?)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.access_token))
            .json(body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(ApiError::from)?
            .pipe(Self::handle_response)
            .await?;

        debug!("post done {path}");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case(401)]
    #[case(404)]
    #[case(405)]
    #[case(423)]
    #[case(429)]
    fn test_permanent_status_not_retryable(#[case] code: u16) {
        let err = ApiError::from_status(code, String::new());
        assert!(!err.is_retryable(), "{code} must not be retryable");
    }

    #[rstest]
    #[case(408)]
    #[case(500)]
    #[case(502)]
    #[case(540)]
    fn test_other_status_retryable(#[case] code: u16) {
        let err = ApiError::from_status(code, String::new());
        assert!(err.is_retryable(), "{code} must be retryable");
    }

    #[test]
    fn test_connection_error_retryable() {
        assert!(ApiError::Connection("dns failure".to_string()).is_retryable());
    }

    #[test]
    fn test_408_is_vehicle_unavailable() {
        let err = ApiError::from_status(408, "vehicle unavailable".to_string());
        assert!(matches!(err, ApiError::VehicleUnavailable));
    }

    #[test]
    fn test_parse_command_response() {
        let value = json!({"response": {"result": true, "reason": ""}});
        let response: CommandResponse = parse_response(value).unwrap();
        assert!(response.result);
        assert_eq!(response.reason.as_deref(), Some(""));

        let value = json!({"result": true});
        parse_response::<CommandResponse>(value).unwrap_err();
    }

    #[test]
    fn test_api_config_censors_the_token() {
        let config: ApiConfig = serde_json::from_value(json!({
            "base_url": "https://owner-api.teslamotors.com/",
            "access_token": "very-secret",
        }))
        .unwrap();
        let debug = format!("{config:?}");
        assert!(debug.contains("[censored]"));
        assert!(!debug.contains("very-secret"));
    }

    #[test]
    fn test_endpoint_paths() {
        let id = VehicleId::new(42);
        assert_eq!(endpoint::vehicle_data(id), "api/1/vehicles/42/vehicle_data");
        assert_eq!(endpoint::wake_up(id), "api/1/vehicles/42/wake_up");
        assert_eq!(
            endpoint::command(id, "door_lock"),
            "api/1/vehicles/42/command/door_lock"
        );
    }
}
