//! Transport tunnel subsystem.
//!
//! # Data Flow
//! ```text
//! /bare/<envelope>
//!     → envelope.rs (destination URL + header set)
//!     → handler.rs (empty envelope → manifest.rs)
//!         ├─ upgrade handshake → http/websocket.rs (byte relay)
//!         └─ otherwise → upstream.rs (no redirects) → streamed back verbatim
//! ```

pub mod envelope;
pub mod handler;
pub mod manifest;

pub use envelope::{decode_envelope, Envelope};
pub use handler::TunnelHandler;
pub use manifest::Manifest;
