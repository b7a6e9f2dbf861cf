//! Control-channel network front end.

pub mod server;

pub use server::{serve, serve_listener};
