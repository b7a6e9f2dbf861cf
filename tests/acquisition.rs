//! Acquisition service scenarios: bounded acquisition, frame numbering and
//! cancellation against the simulated camera.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use pco_camlink::buffer::{ReadyFrame, SharedBufferPool};
use pco_camlink::camera::config::PcoCameraConfiguration;
use pco_camlink::camera::controller::PcoCameraLinkController;
use pco_camlink::camera::sim::{SimDeviceFactory, SimHandle, SimSettings};
use pco_camlink::decoder::PcoCameraLinkFrameDecoder;
use pco_camlink::frame::{DataType, FrameHeader, FRAME_HEADER_SIZE};
use pco_camlink::ipc::IpcMessage;

const IMAGE_TIMEOUT_S: f64 = 0.2;

fn new_decoder(
    buffer_count: usize,
) -> (
    PcoCameraLinkFrameDecoder,
    SimHandle,
    Arc<SharedBufferPool>,
    Receiver<ReadyFrame>,
) {
    let settings = SimSettings {
        width: 32,
        height: 16,
        frame_interval: Duration::from_millis(2),
        ..SimSettings::default()
    };
    let buffer_size = FRAME_HEADER_SIZE + settings.image_bytes();
    let factory = SimDeviceFactory::new(settings);
    let handle = factory.handle();
    let (pool, ready) = SharedBufferPool::new(buffer_count, buffer_size);

    let mut config = PcoCameraConfiguration::new();
    config.set_image_timeout(IMAGE_TIMEOUT_S);

    let controller = PcoCameraLinkController::new(Box::new(factory), pool.clone(), config);
    let decoder = PcoCameraLinkFrameDecoder::new(controller);
    decoder.init().unwrap();
    (decoder, handle, pool, ready)
}

fn send_ok(decoder: &PcoCameraLinkFrameDecoder, id: u32, params: serde_json::Value) {
    let request = IpcMessage::cmd("configure", id, Some(params));
    let reply = decoder.handle_message(&request);
    assert_eq!(reply.msg_type, "ack", "{:?}", reply.params);
}

fn wait_for(what: &str, timeout: Duration, mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !predicate() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn init_leaves_decoder_armed_with_known_geometry() {
    let (decoder, _handle, _pool, _ready) = new_decoder(6);

    assert_eq!(decoder.controller().current_state_name(), "armed");
    assert_eq!(decoder.controller().image_width(), 32);
    assert_eq!(decoder.controller().image_height(), 16);
    assert_eq!(decoder.controller().image_data_type(), DataType::Raw16);
    assert_eq!(decoder.get_frame_header_size(), FRAME_HEADER_SIZE);
    assert_eq!(
        decoder.get_frame_buffer_size(),
        FRAME_HEADER_SIZE + 32 * 16 * 2
    );

    decoder.shutdown();
    assert_eq!(decoder.controller().current_state_name(), "disconnected");
}

#[test]
fn bounded_acquisition_delivers_dense_frames_and_stops() {
    let (decoder, _handle, pool, ready) = new_decoder(6);

    send_ok(&decoder, 1, json!({"camera": {"num_frames": 3}}));
    send_ok(&decoder, 2, json!({"command": "start"}));

    let mut headers = Vec::new();
    for _ in 0..3 {
        let frame = ready.recv_timeout(Duration::from_secs(5)).unwrap();
        let header = {
            let buf = pool.buffer(frame.buffer_id);
            let data = buf.lock().unwrap();
            FrameHeader::read_from(&data).unwrap()
        };
        pool.release(frame.buffer_id);
        assert_eq!(header.frame_number, frame.frame_number);
        assert_eq!(header.frame_width, 32);
        assert_eq!(header.frame_height, 16);
        assert_eq!(header.frame_data_type, DataType::Raw16 as u32);
        assert_eq!(header.frame_size, 32 * 16 * 2);
        headers.push(frame.frame_number);
    }
    assert_eq!(headers, vec![0, 1, 2]);

    // No fourth frame, and the state machine lands back in armed.
    assert!(ready.recv_timeout(Duration::from_millis(300)).is_err());
    wait_for("armed state", Duration::from_secs(2), || {
        decoder.controller().current_state_name() == "armed"
    });

    let status = decoder.handle_message(&IpcMessage::cmd("status", 3, None));
    let params = status.params.unwrap();
    assert_eq!(params["acquisition"]["frames_acquired"], json!(3));
    assert_eq!(params["acquisition"]["acquiring"], json!(false));

    decoder.shutdown();
}

#[test]
fn frame_numbers_restart_at_zero_each_recording_session() {
    let (decoder, _handle, pool, ready) = new_decoder(6);

    send_ok(&decoder, 1, json!({"command": "start"}));
    for expected in 0..5u32 {
        let frame = ready.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(frame.frame_number, expected);
        pool.release(frame.buffer_id);
    }
    send_ok(&decoder, 2, json!({"command": "stop"}));

    // Drain frames captured while the stop was in flight.
    while let Ok(frame) = ready.recv_timeout(Duration::from_millis(100)) {
        pool.release(frame.buffer_id);
    }

    send_ok(&decoder, 3, json!({"command": "start"}));
    for expected in 0..3u32 {
        let frame = ready.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(frame.frame_number, expected, "counter resets per session");
        pool.release(frame.buffer_id);
    }

    decoder.shutdown();
}

#[test]
fn exhausted_pool_skips_frames_but_acquisition_continues() {
    let (decoder, _handle, pool, ready) = new_decoder(2);

    send_ok(&decoder, 1, json!({"command": "start"}));

    // Hold both buffers so the pool runs dry.
    let first = ready.recv_timeout(Duration::from_secs(5)).unwrap();
    let second = ready.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!((first.frame_number, second.frame_number), (0, 1));

    // The loop is now spinning on an empty pool; give it a moment and then
    // return the buffers.
    std::thread::sleep(Duration::from_millis(50));
    pool.release(first.buffer_id);
    pool.release(second.buffer_id);

    let third = ready.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(third.frame_number, 2, "no frames are numbered while starved");
    pool.release(third.buffer_id);

    decoder.shutdown();
}

#[test]
fn shutdown_is_bounded_by_twice_the_image_timeout() {
    let (decoder, _handle, pool, ready) = new_decoder(6);

    send_ok(&decoder, 1, json!({"command": "start"}));
    let frame = ready.recv_timeout(Duration::from_secs(5)).unwrap();
    pool.release(frame.buffer_id);

    let started = Instant::now();
    decoder.shutdown();
    let elapsed = started.elapsed();

    let bound = Duration::from_millis((IMAGE_TIMEOUT_S * 2.0 * 1000.0) as u64 + 700);
    assert!(elapsed < bound, "shutdown took {elapsed:?}, bound {bound:?}");
    assert_eq!(decoder.controller().current_state_name(), "disconnected");
}
