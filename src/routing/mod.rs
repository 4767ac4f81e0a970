//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path only)
//!     → matcher.rs (validate path, test reserved prefix)
//!     → router.rs (RouteDecision: Tunnel | Rewrite)
//!     → chosen ProxyHandler owns the response
//! ```
//!
//! # Design Decisions
//! - Deterministic: same path always yields the same decision
//! - Reserved prefix checked first; everything else is rewritten

pub mod matcher;
pub mod router;

pub use matcher::PathPrefixMatcher;
pub use router::{Dispatcher, IncomingRequest, ProxyHandler, RouteDecision};
