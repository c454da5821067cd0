//! Transport tunnels across the process trust boundary.

pub mod http;
pub mod socket;

pub use http::HttpTunnel;
pub use socket::WebSocketTunnel;
