//! # PCO CameraLink frame receiver and processor
//!
//! This crate ingests frames from a PCO-family industrial CameraLink
//! camera, stamps each image buffer with a compact binary header and feeds
//! a downstream processing pipeline that runs an image-classification
//! model and republishes per-frame results on a message bus.
//!
//! ## Crate structure
//!
//! - **`params`**: the reflective path-addressed parameter container that
//!   binds typed values to slash-delimited paths and serialises them to and
//!   from JSON in both directions. The camera configuration and status
//!   containers and the control protocol are built on it.
//! - **`camera`**: the camera control core. A controller owns the
//!   camera/grabber handle pair behind the `device` seam, a finite state
//!   machine gates device operations (connect, arm, record), and a
//!   dedicated acquisition loop pulls image buffers, stamps frame headers
//!   and hands buffers to the shared pool. A full software simulation of
//!   the device pair lives in `camera::sim`.
//! - **`frame`**: the 20-byte binary frame header and pixel data types.
//! - **`buffer`**: the shared frame buffer pool borrowed by the
//!   acquisition loop and drained by the processing pipeline.
//! - **`decoder`**: the frame decoder facade dispatching control-channel
//!   envelopes into the controller.
//! - **`processor`**: the ML frame processor plugin: header decode, model
//!   inference through an external-runtime seam and ZeroMQ result
//!   publishing.
//! - **`ipc`** / **`net`**: the JSON control-channel envelope and the TCP
//!   server front end.
//! - **`config`**: TOML settings for the daemon binary.
//! - **`error`**: the error taxonomy shared across subsystems.

pub mod buffer;
pub mod camera;
pub mod config;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod ipc;
pub mod net;
pub mod params;
pub mod processor;
