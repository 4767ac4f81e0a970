//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Upgrade handshake answered with 101
//!     → connection.rs (relay registered, ID assigned)
//!     → http/websocket.rs copies bytes both ways
//!     → either side closes / deadline / shutdown
//!     → guard dropped, both sockets closed
//! ```
//!
//! # Design Decisions
//! - Plain HTTP exchanges need no tracking; hyper owns their lifetime
//! - Upgraded relays outlive their request, so they are counted explicitly

pub mod connection;
