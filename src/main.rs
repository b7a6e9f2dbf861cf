//! Daemon entry point.
//!
//! Wires the camera controller, decoder facade, shared buffer pool and
//! frame processor together around the simulated camera, then serves the
//! control channel until interrupted. The `PcoDeviceFactory` seam is where
//! a real SDK-backed camera/grabber pair would replace the simulation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::LevelFilter;

use pco_camlink::buffer::SharedBufferPool;
use pco_camlink::camera::config::PcoCameraConfiguration;
use pco_camlink::camera::controller::PcoCameraLinkController;
use pco_camlink::camera::sim::{SimDeviceFactory, SimSettings};
use pco_camlink::config::Settings;
use pco_camlink::decoder::PcoCameraLinkFrameDecoder;
use pco_camlink::frame::FRAME_HEADER_SIZE;
use pco_camlink::net;
use pco_camlink::processor::plugin::MlProcessPlugin;
use pco_camlink::processor::Frame;

fn main() -> Result<()> {
    let settings = Settings::new(std::env::args().nth(1).as_deref())?;
    init_logging(&settings.log_level);
    log::info!("Configuration loaded");

    // Shared buffer pool sized for the simulated image geometry.
    let image_bytes = (settings.sim.width * settings.sim.height * 2) as usize;
    let (pool, ready_frames) =
        SharedBufferPool::new(settings.buffers.count, FRAME_HEADER_SIZE + image_bytes);

    let factory = SimDeviceFactory::new(SimSettings {
        width: settings.sim.width,
        height: settings.sim.height,
        frame_interval: Duration::from_millis(settings.sim.frame_interval_ms),
        ..SimSettings::default()
    });

    let mut camera_config = PcoCameraConfiguration::new();
    camera_config
        .update(&serde_json::to_value(&settings.camera).context("invalid camera settings")?)
        .context("failed to apply camera settings")?;

    let controller =
        PcoCameraLinkController::new(Box::new(factory), pool.clone(), camera_config);
    let decoder = Arc::new(PcoCameraLinkFrameDecoder::new(controller));
    decoder.init().context("decoder initialisation failed")?;

    // Frame processor: drains the ready queue, classifies and republishes.
    let mut plugin = MlProcessPlugin::new();
    let processor_doc =
        serde_json::to_value(&settings.processor).context("invalid processor settings")?;
    plugin
        .configure(&processor_doc)
        .context("failed to configure frame processor")?;

    let processor_pool = pool.clone();
    std::thread::Builder::new()
        .name("frame-processor".to_string())
        .spawn(move || {
            for ready in ready_frames {
                let data = processor_pool.buffer(ready.buffer_id).lock().unwrap().clone();
                processor_pool.release(ready.buffer_id);
                let mut frame = Frame::new(data);
                if let Err(e) = plugin.process_frame(&mut frame) {
                    log::error!("Processing frame {} failed: {e}", ready.frame_number);
                }
            }
        })
        .context("failed to spawn frame processor thread")?;

    // Serve the control channel until interrupted.
    let runtime = tokio::runtime::Runtime::new().context("failed to create runtime")?;
    let server_decoder = decoder.clone();
    let endpoint = settings.ctrl_endpoint.clone();
    runtime.block_on(async move {
        tokio::select! {
            result = net::serve(server_decoder, &endpoint) => result,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupt received, shutting down");
                Ok(())
            }
        }
    })?;

    decoder.shutdown();
    Ok(())
}

fn init_logging(configured_level: &str) {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .or_else(|| configured_level.parse().ok())
        .unwrap_or(LevelFilter::Info);
    env_logger::Builder::new().filter_level(level).init();
}
