//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID assigned, propagated to the response)
//!     → [routing::Dispatcher picks tunnel or rewrite]
//!     → websocket.rs (upgraded connections only)
//!     → response.rs (error rendering)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::{RequestIdExt, X_REQUEST_ID};
pub use response::X_RELAY_ERROR;
pub use server::{AppState, HttpServer};
