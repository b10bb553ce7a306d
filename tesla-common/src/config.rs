//! Polling configuration shared by the controller and its callers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::datetime::{duration, with_duration};

/// Which background polling policy to run a vehicle under.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PollingPolicy {
    /// Poll at the base cadence while charging or recently parked, and let the
    /// vehicle fall asleep once it has been idle long enough.
    #[default]
    Default,

    /// Poll at the base cadence unconditionally; the vehicle is never given the
    /// chance to fall asleep.
    Always,

    /// Poll at the base cadence while the charge cable is connected, even if
    /// charging is complete; only a disconnected idle vehicle may sleep.
    Connected,
}

/// Polling cadence settings.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq)]
pub struct PollingConfig {
    /// Base interval between background refreshes.
    #[serde(with = "with_duration", default = "default_update_interval")]
    pub update_interval: Duration,

    /// Interval used while the vehicle is actively driving.
    #[serde(with = "with_duration", default = "default_driving_interval")]
    pub driving_interval: Duration,

    /// Interval used once the vehicle is allowed to fall asleep; also the
    /// minimum continuous parking time before sleep is allowed.
    #[serde(with = "with_duration", default = "default_sleep_interval")]
    pub sleep_interval: Duration,

    /// The polling policy applied to vehicles without a per-vehicle policy.
    #[serde(default)]
    pub policy: PollingPolicy,
}

const fn default_update_interval() -> Duration {
    duration::minutes(5)
}

const fn default_driving_interval() -> Duration {
    duration::seconds(60)
}

const fn default_sleep_interval() -> Duration {
    duration::minutes(11)
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            update_interval: default_update_interval(),
            driving_interval: default_driving_interval(),
            sleep_interval: default_sleep_interval(),
            policy: PollingPolicy::default(),
        }
    }
}
