//! End-to-end controller behaviour against a scripted transport.

use std::sync::Arc;
use std::time::Duration;

use tesla_common::config::PollingConfig;
use tesla_common::vehicle::VehicleId;
use tesla_tokio::controller::Controller;
use tesla_tokio::error::Error;
use tesla_tokio::testing::{
    command_response, products_response, vehicle_data_response, wake_up_response, FakeApi,
    FakeResult,
};

const ID: u64 = 12345;
const VIN: &str = "5YJ3E1EA8LF000316";
const PRODUCTS: &str = "api/1/products";
const VEHICLE_DATA: &str = "api/1/vehicles/12345/vehicle_data";
const WAKE_UP: &str = "api/1/vehicles/12345/wake_up";

async fn discovered_controller(api: &Arc<FakeApi>, state: &str) -> Arc<Controller> {
    api.queue(
        PRODUCTS,
        FakeResult::Ok(products_response(ID, VIN, "Vectra", state)),
    );
    let controller = Arc::new(Controller::new(
        api.clone(),
        PollingConfig::default(),
    ));
    controller.discover_vehicles().await.unwrap();
    controller
}

#[tokio::test]
async fn refresh_within_the_window_is_a_cache_hit() {
    let api = Arc::new(FakeApi::new());
    let controller = discovered_controller(&api, "online").await;
    api.queue(
        VEHICLE_DATA,
        FakeResult::Ok(vehicle_data_response("online", None, "Charging", false)),
    );

    assert!(controller.refresh(VehicleId::new(ID), false).await.unwrap());
    assert!(!controller.refresh(VehicleId::new(ID), false).await.unwrap());
    assert!(!controller.refresh(VehicleId::new(ID), false).await.unwrap());

    assert_eq!(api.request_count(VEHICLE_DATA), 1);

    let charging = controller
        .get_charging_params(VehicleId::new(ID))
        .unwrap()
        .unwrap();
    assert_eq!(charging["charging_state"], "Charging");
    assert!(controller.is_car_online(VehicleId::new(ID)).unwrap());
    assert!(controller
        .get_last_update_time(VehicleId::new(ID))
        .unwrap()
        .is_some());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn refresh_failure_propagates_and_leaves_the_cache_alone() {
    let api = Arc::new(FakeApi::new());
    let controller = discovered_controller(&api, "online").await;
    api.queue(
        VEHICLE_DATA,
        FakeResult::Ok(vehicle_data_response("online", None, "Charging", false)),
    );
    controller.refresh(VehicleId::new(ID), false).await.unwrap();

    let before = controller.get_charging_params(VehicleId::new(ID)).unwrap();

    api.set_default(VEHICLE_DATA, FakeResult::Status(500));
    let err = controller
        .refresh(VehicleId::new(ID), true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RetryLimitExceeded { .. }));

    let after = controller.get_charging_params(VehicleId::new(ID)).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn successful_command_patches_only_its_claimed_fields() {
    let api = Arc::new(FakeApi::new());
    let controller = discovered_controller(&api, "online").await;
    api.queue(
        VEHICLE_DATA,
        FakeResult::Ok(vehicle_data_response("online", None, "Stopped", false)),
    );
    controller.refresh(VehicleId::new(ID), false).await.unwrap();

    let mut expected = controller
        .get_charging_params(VehicleId::new(ID))
        .unwrap()
        .unwrap();

    api.queue(
        "api/1/vehicles/12345/command/charge_start",
        FakeResult::Ok(command_response(true, "")),
    );
    let response = controller
        .command(VehicleId::new(ID), "charge_start", serde_json::json!({}), false)
        .await
        .unwrap()
        .unwrap();
    assert!(response.result);

    expected["charging_state"] = "Charging".into();
    let after = controller
        .get_charging_params(VehicleId::new(ID))
        .unwrap()
        .unwrap();
    assert_eq!(after, expected);
}

#[tokio::test]
async fn refused_command_leaves_the_cache_untouched() {
    let api = Arc::new(FakeApi::new());
    let controller = discovered_controller(&api, "online").await;
    api.queue(
        VEHICLE_DATA,
        FakeResult::Ok(vehicle_data_response("online", None, "Charging", false)),
    );
    controller.refresh(VehicleId::new(ID), false).await.unwrap();

    let before = controller.get_charging_params(VehicleId::new(ID)).unwrap();

    api.queue(
        "api/1/vehicles/12345/command/charge_stop",
        FakeResult::Ok(command_response(false, "not_charging")),
    );
    let response = controller
        .command(VehicleId::new(ID), "charge_stop", serde_json::json!({}), false)
        .await
        .unwrap()
        .unwrap();
    assert!(!response.result);
    assert_eq!(response.reason.as_deref(), Some("not_charging"));

    let after = controller.get_charging_params(VehicleId::new(ID)).unwrap();
    assert_eq!(before, after);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn wake_loop_gives_up_after_the_attempt_ceiling() {
    let api = Arc::new(FakeApi::new());
    let controller = discovered_controller(&api, "asleep").await;
    api.set_default(WAKE_UP, FakeResult::Ok(wake_up_response("asleep")));

    let started = tokio::time::Instant::now();
    let err = controller
        .command(
            VehicleId::new(ID),
            "auto_conditioning_start",
            serde_json::json!({}),
            true,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::WakeRetryLimitExceeded { attempts: 5 }
    ));
    assert_eq!(api.request_count(WAKE_UP), 5);
    assert_eq!(
        api.request_count("api/1/vehicles/12345/command/auto_conditioning_start"),
        0
    );

    // Backoff between the five attempts: 8 + 16 + 32 + 64 seconds.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(120), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(130), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn wake_then_command_succeeds_once_online() {
    let api = Arc::new(FakeApi::new());
    let controller = discovered_controller(&api, "asleep").await;
    api.queue(WAKE_UP, FakeResult::Ok(wake_up_response("asleep")));
    api.queue(WAKE_UP, FakeResult::Ok(wake_up_response("online")));
    api.queue(
        "api/1/vehicles/12345/command/door_lock",
        FakeResult::Ok(command_response(true, "")),
    );

    assert!(!controller.is_car_online(VehicleId::new(ID)).unwrap());

    let response = controller
        .command(VehicleId::new(ID), "door_lock", serde_json::json!({}), true)
        .await
        .unwrap()
        .unwrap();
    assert!(response.result);

    assert_eq!(api.request_count(WAKE_UP), 2);
    assert!(controller.is_car_online(VehicleId::new(ID)).unwrap());

    let state = controller
        .get_state_params(VehicleId::new(ID))
        .unwrap()
        .unwrap();
    assert_eq!(state["locked"], true);
}

#[tokio::test(start_paused = true)]
async fn asleep_without_wake_is_a_soft_no_op() {
    let api = Arc::new(FakeApi::new());
    let controller = discovered_controller(&api, "asleep").await;
    api.set_default(
        "api/1/vehicles/12345/command/auto_conditioning_stop",
        FakeResult::Unavailable,
    );

    let response = controller
        .command(
            VehicleId::new(ID),
            "auto_conditioning_stop",
            serde_json::json!({}),
            false,
        )
        .await
        .unwrap();
    assert!(response.is_none());

    assert_eq!(api.request_count(WAKE_UP), 0);
    assert!(!controller.is_car_online(VehicleId::new(ID)).unwrap());
}

#[tokio::test]
async fn unknown_vehicle_is_an_error() {
    let api = Arc::new(FakeApi::new());
    let controller = Controller::new(api, PollingConfig::default());

    let err = controller
        .refresh(VehicleId::new(999), false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownVehicle(_)));

    let err = controller.get_charging_params(VehicleId::new(999)).unwrap_err();
    assert!(matches!(err, Error::UnknownVehicle(_)));
}

#[tokio::test(start_paused = true)]
async fn long_idle_vehicle_is_left_to_sleep_unless_sentry_is_on() {
    let api = Arc::new(FakeApi::new());
    let controller = discovered_controller(&api, "online").await;
    api.queue(
        VEHICLE_DATA,
        FakeResult::Ok(vehicle_data_response("online", None, "Complete", false)),
    );
    controller.refresh(VehicleId::new(ID), false).await.unwrap();

    // Parked since discovery; 1000 s later the sleep rule applies.
    tokio::time::sleep(Duration::from_secs(1000)).await;
    let config = PollingConfig::default();
    assert_eq!(
        controller.next_poll_interval(VehicleId::new(ID)).unwrap(),
        config.sleep_interval
    );

    // Sentry on keeps the car awake, so polling stays at the base cadence.
    api.queue(
        VEHICLE_DATA,
        FakeResult::Ok(vehicle_data_response("online", None, "Complete", true)),
    );
    controller.refresh(VehicleId::new(ID), false).await.unwrap();
    assert_eq!(
        controller.next_poll_interval(VehicleId::new(ID)).unwrap(),
        config.update_interval
    );
}

#[tokio::test(start_paused = true)]
async fn leaving_the_driving_gear_restamps_the_park_time() {
    let api = Arc::new(FakeApi::new());
    let controller = discovered_controller(&api, "online").await;
    let config = PollingConfig::default();

    api.queue(
        VEHICLE_DATA,
        FakeResult::Ok(vehicle_data_response("online", Some("D"), "Disconnected", false)),
    );
    controller.refresh(VehicleId::new(ID), false).await.unwrap();
    assert_eq!(
        controller.next_poll_interval(VehicleId::new(ID)).unwrap(),
        config.driving_interval
    );

    // Long drive, then parked: the idle clock restarts at the transition.
    tokio::time::sleep(Duration::from_secs(2000)).await;
    api.queue(
        VEHICLE_DATA,
        FakeResult::Ok(vehicle_data_response("online", None, "Disconnected", false)),
    );
    controller.refresh(VehicleId::new(ID), false).await.unwrap();
    assert_eq!(
        controller.next_poll_interval(VehicleId::new(ID)).unwrap(),
        config.update_interval
    );

    // Once the fresh park outlasts the sleep threshold, the vehicle may sleep.
    tokio::time::sleep(Duration::from_secs(700)).await;
    assert_eq!(
        controller.next_poll_interval(VehicleId::new(ID)).unwrap(),
        config.sleep_interval
    );
}

#[tokio::test(start_paused = true)]
async fn refresh_with_wake_wakes_a_sleeping_vehicle_first() {
    let api = Arc::new(FakeApi::new());
    let controller = discovered_controller(&api, "asleep").await;
    api.queue(WAKE_UP, FakeResult::Ok(wake_up_response("online")));
    api.queue(
        VEHICLE_DATA,
        FakeResult::Ok(vehicle_data_response("online", None, "Disconnected", false)),
    );

    assert!(controller.refresh(VehicleId::new(ID), true).await.unwrap());
    assert_eq!(api.request_count(WAKE_UP), 1);
    assert!(controller.is_car_online(VehicleId::new(ID)).unwrap());
}
