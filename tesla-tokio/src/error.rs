//! Error taxonomy for the controller and the layers beneath it.

use std::time::Duration;

use thiserror::Error;

use tesla_common::datetime::duration;

use crate::api::ApiError;

/// An error from the controller or the layers beneath it.
#[derive(Debug, Error)]
pub enum Error {
    /// The API call failed and was not worth retrying.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// The API call kept failing until the retry time ceiling was reached.
    #[error("Retry limit exceeded after {}: {}", duration::to_string(.elapsed), .source)]
    RetryLimitExceeded {
        /// Wall-clock time spent retrying.
        elapsed: Duration,

        /// The last failure before giving up.
        source: ApiError,
    },

    /// The vehicle could not be woken within the attempt ceiling.
    #[error("Vehicle did not wake up after {attempts} attempts")]
    WakeRetryLimitExceeded {
        /// Number of wake attempts sent.
        attempts: u32,
    },

    /// The identifier does not match any discovered vehicle.
    #[error("Unknown vehicle: {0}")]
    UnknownVehicle(String),
}

impl Error {
    /// Was the underlying failure the vehicle being asleep, whether surfaced
    /// directly or after retry exhaustion?
    #[must_use]
    pub const fn is_vehicle_unavailable(&self) -> bool {
        matches!(
            self,
            Error::Api(ApiError::VehicleUnavailable)
                | Error::RetryLimitExceeded {
                    source: ApiError::VehicleUnavailable,
                    ..
                }
        )
    }
}
