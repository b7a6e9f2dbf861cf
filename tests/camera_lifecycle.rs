//! Command lifecycle scenarios against the simulated camera.

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::{json, Value};

use pco_camlink::buffer::SharedBufferPool;
use pco_camlink::camera::config::PcoCameraConfiguration;
use pco_camlink::camera::controller::PcoCameraLinkController;
use pco_camlink::camera::sim::{SimDeviceFactory, SimHandle, SimSettings};
use pco_camlink::frame::FRAME_HEADER_SIZE;

fn sim_settings() -> SimSettings {
    SimSettings {
        width: 32,
        height: 16,
        frame_interval: Duration::from_millis(1),
        ..SimSettings::default()
    }
}

fn new_controller() -> (PcoCameraLinkController, SimHandle) {
    let settings = sim_settings();
    let buffer_size = FRAME_HEADER_SIZE + settings.image_bytes();
    let factory = SimDeviceFactory::new(settings);
    let handle = factory.handle();
    let (pool, _ready) = SharedBufferPool::new(4, buffer_size);
    let controller =
        PcoCameraLinkController::new(Box::new(factory), pool, PcoCameraConfiguration::new());
    (controller, handle)
}

fn status_doc(controller: &PcoCameraLinkController) -> Value {
    let mut doc = json!({});
    controller.get_status(&mut doc, "");
    doc
}

#[test]
fn command_lifecycle_walks_through_all_states() {
    let (controller, handle) = new_controller();

    let steps = [
        ("connect", "connected"),
        ("arm", "armed"),
        ("start", "recording"),
        ("stop", "armed"),
        ("disarm", "connected"),
        ("disconnect", "disconnected"),
    ];
    for (command, expected_state) in steps {
        controller.execute_command(command).unwrap();
        assert_eq!(controller.current_state_name(), expected_state);
        let doc = status_doc(&controller);
        assert_eq!(doc["camera"]["state"], json!(expected_state), "{command}");
    }

    assert!(!handle.is_open());
    assert!(!handle.is_recording());
}

#[test]
fn connect_populates_camera_info_and_derived_timing() {
    let (controller, _handle) = new_controller();
    controller.execute_command("connect").unwrap();

    let doc = status_doc(&controller);
    assert_eq!(doc["camera"]["info"]["name"], json!("pco.sim cameralink"));
    assert_eq!(doc["camera"]["info"]["serial"], json!(100_251));
    assert_eq!(doc["camera"]["info"]["type"], json!(0x1340));

    // The simulated device powers on at 10 ms exposure / 10 Hz; the config
    // container picks the derived values up at connect.
    let mut config_doc = json!({});
    controller.get_configuration(&mut config_doc, "");
    assert!((config_doc["exposure_time"].as_f64().unwrap() - 0.01).abs() < 1.0e-9);
    assert!((config_doc["frame_rate"].as_f64().unwrap() - 10.0).abs() < 1.0e-6);
}

#[test]
fn arm_from_disconnected_is_nacked_with_state_name() {
    let (controller, _handle) = new_controller();

    let err = controller.execute_command("arm").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("arm"), "{message}");
    assert!(message.contains("disconnected"), "{message}");

    assert_eq!(controller.current_state_name(), "disconnected");
}

#[test]
fn unknown_command_is_rejected_without_state_change() {
    let (controller, _handle) = new_controller();
    let err = controller.execute_command("levitate").unwrap_err();
    assert!(err.to_string().contains("levitate"));
    assert_eq!(controller.current_state_name(), "disconnected");
}

#[test]
fn arm_failure_enters_error_state_and_reset_recovers() {
    let (controller, handle) = new_controller();
    controller.execute_command("connect").unwrap();

    handle.failures().arm.store(true, Ordering::SeqCst);
    assert!(controller.execute_command("arm").is_err());

    let doc = status_doc(&controller);
    assert_eq!(doc["camera"]["state"], json!("error"));
    assert_ne!(doc["camera"]["error"]["code"], json!(0));
    assert!(!doc["camera"]["error"]["message"]
        .as_str()
        .unwrap()
        .is_empty());

    // Only reset leaves the error state.
    assert!(controller.execute_command("connect").is_err());
    assert!(controller.execute_command("arm").is_err());

    controller.execute_command("reset").unwrap();
    let doc = status_doc(&controller);
    assert_eq!(doc["camera"]["state"], json!("disconnected"));
    assert_eq!(doc["camera"]["error"]["code"], json!(0));
    assert_eq!(doc["camera"]["error"]["message"], json!("no error"));
}

#[test]
fn connect_failure_is_recoverable_by_reset() {
    let (controller, handle) = new_controller();
    handle.failures().open_camera.store(true, Ordering::SeqCst);

    assert!(controller.execute_command("connect").is_err());
    assert_eq!(controller.current_state_name(), "error");
    let doc = status_doc(&controller);
    assert_ne!(doc["camera"]["error"]["code"], json!(0));

    handle.failures().open_camera.store(false, Ordering::SeqCst);
    controller.execute_command("reset").unwrap();
    controller.execute_command("connect").unwrap();
    assert_eq!(controller.current_state_name(), "connected");
}

#[test]
fn grabber_open_failure_closes_the_camera_again() {
    let (controller, handle) = new_controller();
    handle.failures().open_grabber.store(true, Ordering::SeqCst);

    assert!(controller.execute_command("connect").is_err());
    assert!(!handle.is_camera_open());
}
