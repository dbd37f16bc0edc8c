//! WebSocket transport for the device channel.

mod handler;

pub use handler::ws_handler;
