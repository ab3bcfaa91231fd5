//! Slipstream web server
//!
//! Axum HTTP surface over slipstream-core: session lifecycle API, the
//! passthrough stream proxy, transcode and codec-check endpoints, and the
//! playback position/watched API.

pub mod handlers;
pub mod server;

pub use server::{AppState, router, run_server};
