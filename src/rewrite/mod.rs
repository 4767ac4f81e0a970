//! Content-rewriting subsystem.
//!
//! # Data Flow
//! ```text
//! /?url=<encoded destination>
//!     → target.rs (destination, search fallback, stray-request recovery)
//!     → handler.rs → upstream.rs (redirects followed)
//!     → charset.rs (decode; encoded back after rewriting)
//!         ├─ text/html   → html.rs (+ css.rs, js.rs, runtime script)
//!         ├─ text/css    → css.rs
//!         ├─ javascript  → js.rs
//!         └─ otherwise   → streamed back unmodified
//! ```

pub mod charset;
pub mod css;
pub mod handler;
pub mod html;
pub mod js;
pub mod runtime;
pub mod target;

pub use handler::{ContentKind, RewriteHandler};
pub use target::{RewriteConvention, Target};
