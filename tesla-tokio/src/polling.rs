//! The adaptive polling-interval decision.
//!
//! One pure function over a snapshot of cached state, parameterised by the
//! [`PollingPolicy`] mode — the three historical controller variants are
//! variants of this single decision table.

use std::time::Duration;

use tesla_common::config::{PollingConfig, PollingPolicy};
use tesla_common::vehicle::{ChargingStateEnum, ShiftState};

/// A snapshot of everything the polling decision needs, taken from the cache
/// by the controller.
#[derive(Debug, Clone, Default)]
pub struct PollingContext {
    /// The cached gear, `None` when unknown or absent.
    pub shift_state: Option<ShiftState>,

    /// The cached charging state, `None` when unknown.
    pub charging_state: Option<ChargingStateEnum>,

    /// Whether sentry mode is currently enabled.
    pub sentry_mode: bool,

    /// How long the vehicle has been continuously parked.
    pub time_since_park: Option<Duration>,

    /// The per-vehicle replacement for the base interval, if any.
    pub interval_override: Option<Duration>,
}

/// How long until the next background refresh is due.
///
/// Rules, first match wins:
/// 1. Actively driving (`D`/`R`): the driving interval, in every mode. This
///    also beats the per-vehicle override.
/// 2. `always` mode: the base interval — the vehicle is never left to sleep.
/// 3. Sentry off, parked longer than the sleep threshold, and the charging
///    state allows sleep (`Complete`/`Disconnected` in `default` mode,
///    `Disconnected` only in `connected` mode): the sleep interval.
/// 4. Everything else: the base interval.
///
/// The base interval is the per-vehicle override when set, the configured
/// update interval otherwise.
#[must_use]
pub fn next_interval(
    config: &PollingConfig,
    policy: PollingPolicy,
    ctx: &PollingContext,
) -> Duration {
    if ctx.shift_state.is_some_and(ShiftState::is_driving) {
        return config.driving_interval;
    }

    let base = ctx.interval_override.unwrap_or(config.update_interval);

    if policy == PollingPolicy::Always {
        return base;
    }

    let parked_long = ctx
        .time_since_park
        .is_some_and(|parked| parked > config.sleep_interval);

    if parked_long && !ctx.sentry_mode && sleep_eligible(policy, ctx.charging_state) {
        return config.sleep_interval;
    }

    base
}

/// Does the charging state allow the vehicle to fall asleep under this policy?
const fn sleep_eligible(policy: PollingPolicy, charging: Option<ChargingStateEnum>) -> bool {
    matches!(
        (policy, charging),
        (
            PollingPolicy::Connected,
            Some(ChargingStateEnum::Disconnected)
        ) | (
            PollingPolicy::Default,
            Some(ChargingStateEnum::Complete | ChargingStateEnum::Disconnected)
        )
    )
}
