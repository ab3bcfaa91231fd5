//! Active-session tracking and idle eviction

mod registry;

pub use registry::{SessionRegistry, SessionSnapshot, spawn_sweep};
