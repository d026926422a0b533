//! Shared helpers

pub mod net;
pub mod throttle;

pub use net::{bind_all, bind_tcp_listener, bind_tokio_listener};
pub use throttle::LogThrottler;
