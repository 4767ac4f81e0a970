//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound request:
//!     → timeouts.rs (enforce upstream deadline)
//!     → on expiry: UpstreamTimeout → 504 at the handler boundary
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every outbound call has a deadline
//! - No retries: the relay is transparent, and replaying a client's request
//!   (possibly with a streamed body) is the client's decision

pub mod timeouts;
