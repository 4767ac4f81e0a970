//! Tunnel self-description.
//!
//! Served on `GET <prefix>` so clients can discover which envelope versions the
//! relay speaks before tunneling anything.

use serde::Serialize;

/// Self-description served on `GET <prefix>`.
#[derive(Serialize, Debug)]
pub struct Manifest {
    pub versions: Vec<&'static str>,
    pub language: &'static str,
    pub project: Project,
}

#[derive(Serialize, Debug)]
pub struct Project {
    pub name: &'static str,
    pub version: &'static str,
}

impl Manifest {
    pub fn current() -> Self {
        Self {
            versions: vec!["v1"],
            language: "Rust",
            project: Project {
                name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}
