//! PCO CameraLink camera control.
//!
//! The [`controller::PcoCameraLinkController`] owns the camera and grabber
//! handles behind the [`device`] seam, keeps the configuration and status
//! containers in sync, and runs the acquisition service loop. Device
//! operations are gated by the [`state::PcoCameraState`] finite state
//! machine. A full software simulation of the camera/grabber pair lives in
//! [`sim`] for tests and for running the daemon without hardware.

pub mod config;
pub mod controller;
pub mod delay_exposure;
pub mod device;
pub mod sim;
pub mod state;
