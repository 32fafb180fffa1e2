//! HTTP and WebSocket surface.
//!
//! Exposes the current round state, bounded history, the fairness
//! verification endpoint, player bet/cashout actions, and the real-time
//! event stream.

pub mod errors;
pub mod handlers;
pub mod routes;
pub mod websocket;

pub use handlers::AppState;
pub use routes::create_router;
