//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request:
//!     → routing/matcher.rs (reject malformed paths)
//!     → headers.rs (strip hop-by-hop and relay identity before forwarding)
//!
//! Destination response:
//!     → headers.rs (strip hop-by-hop; document policies and cookie scope on rewrite)
//! ```
//!
//! # Design Decisions
//! - The destination never learns the relay's host, client address or request ID
//! - Fail closed: malformed input never reaches a handler

pub mod headers;
