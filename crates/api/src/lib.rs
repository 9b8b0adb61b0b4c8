//! HTTP/WebSocket surface of the control plane: the agent WebSocket
//! endpoint, operator routes, and the event sink wiring agent telemetry
//! into persistence.

pub mod routes;
pub mod server;
pub mod sink;
pub mod ws;

pub use server::{build_router, AppState};
pub use sink::StoreEventSink;
