//! relay-gate
//!
//! ```text
//!                          ┌───────────────────────────────────────────────┐
//!                          │                  RELAY GATE                    │
//!   Client Request         │  ┌────────┐   ┌────────────┐                   │
//!   ───────────────────────┼─▶│  http  │──▶│ dispatcher │                   │
//!                          │  │ server │   └─────┬──────┘                   │
//!                          │  └────────┘         │                          │
//!                          │        /bare/...    │    everything else       │
//!                          │        ┌────────────┴────────────┐             │
//!                          │        ▼                         ▼             │
//!                          │  ┌──────────┐             ┌────────────┐       │
//!                          │  │  tunnel  │             │  rewrite   │       │
//!                          │  │ (+ ws)   │             │ html/css/js│       │
//!                          │  └────┬─────┘             └─────┬──────┘       │
//!                          │       └────────────┬────────────┘              │
//!                          │                    ▼                           │
//!                          │             ┌────────────┐                     │
//!                          │             │  upstream  │─────────────────────┼──▶ Destination
//!                          │             └────────────┘                     │
//!                          └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use relay_gate::lifecycle::{launch, StartupOptions};

#[derive(Parser, Debug)]
#[command(name = "relay-gate", version, about = "Web-unblocking relay: transparent tunnel plus rewriting proxy")]
struct Cli {
    /// Path to the TOML configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address, e.g. 127.0.0.1:8080
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let options = StartupOptions {
        config_path: cli.config,
        bind_address: cli.bind,
    };

    match launch(options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be initialized yet when startup fails.
            eprintln!("relay-gate: {}", e);
            tracing::error!(error = %e, "Fatal startup error");
            ExitCode::FAILURE
        }
    }
}
