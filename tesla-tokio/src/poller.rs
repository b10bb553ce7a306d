//! Background refresh loop driving the controller on the policy cadence.
//!
//! One task per vehicle. Refresh failures are logged and the loop carries on
//! with the next cycle — the controller itself never swallows them.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use tesla_common::vehicle::Vin;

use crate::controller::Controller;
use crate::spawn;

/// Start one background refresh task per currently known vehicle.
///
/// Vehicles discovered later need their own call; the tasks run until the
/// runtime shuts down or the vehicle disappears from the identity map.
#[must_use]
pub fn start(controller: &Arc<Controller>) -> Vec<JoinHandle<()>> {
    controller
        .vins()
        .into_iter()
        .map(|vin| poll_vehicle(controller.clone(), vin))
        .collect()
}

fn poll_vehicle(controller: Arc<Controller>, vin: Vin) -> JoinHandle<()> {
    spawn(async move {
        loop {
            let interval = match controller.next_poll_interval(&vin) {
                Ok(interval) => interval,
                Err(err) => {
                    error!("{vin}: stopping poll loop: {err}");
                    return;
                }
            };

            debug!("{vin}: next poll in {interval:?}");
            tokio::time::sleep(interval).await;

            if !matches!(controller.get_updates(&vin), Ok(true)) {
                continue;
            }

            match controller.refresh(&vin, false).await {
                Ok(true) => debug!("{vin}: refreshed"),
                Ok(false) => {}
                Err(err) => error!("{vin}: refresh failed: {err}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use tesla_common::config::PollingConfig;
    use tesla_common::vehicle::VehicleId;

    use crate::testing::{products_response, vehicle_data_response, FakeApi, FakeResult};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_refreshes_on_the_cadence() {
        let api = Arc::new(FakeApi::new());
        api.queue(
            "api/1/products",
            FakeResult::Ok(products_response(12345, "5YJ3E1EA8LF000316", "Vectra", "online")),
        );
        api.set_default(
            "api/1/vehicles/12345/vehicle_data",
            FakeResult::Ok(vehicle_data_response("online", None, "Charging", false)),
        );

        let controller = Arc::new(Controller::new(api.clone(), PollingConfig::default()));
        controller.discover_vehicles().await.unwrap();

        let handles = start(&controller);
        assert_eq!(handles.len(), 1);

        // Two base intervals of virtual time: two refreshes.
        tokio::time::sleep(std::time::Duration::from_secs(650)).await;
        assert_eq!(api.request_count("api/1/vehicles/12345/vehicle_data"), 2);

        // Disabling updates stops further fetches.
        controller.set_updates(VehicleId::new(12345), false).unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(1200)).await;
        assert_eq!(api.request_count("api/1/vehicles/12345/vehicle_data"), 2);
    }
}
