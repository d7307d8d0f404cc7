//! Client-facing HTTP and WebSocket surface

pub mod routes;
pub mod websocket;

pub use routes::{create_router, AppState, HealthResponse};
pub use websocket::{spawn_bus_bridge, WsConnectionManager};
