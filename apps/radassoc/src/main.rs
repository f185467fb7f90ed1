//! # radassoc - Radio Sky Association
//!
//! The command-line driver for the radassoc association engine.
//!
//! ## Architecture
//!
//! ```text
//! apps/radassoc (THE BINARY)
//!   CLI (clap) ── run file (toml) ── header sidecars (json)
//!          │
//!          ▼
//!   radassoc-core (THE ENGINE) ── redb database
//! ```
//!
//! ## Usage
//!
//! ```bash
//! radassoc init
//! radassoc process -c run.toml
//! radassoc process -c run.toml --redo-match --no-save
//! radassoc remove-catalogs -c run.toml WENSS
//! radassoc audit
//! ```

use clap::Parser;
use radassoc::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // RADASSOC_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("RADASSOC_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "radassoc=info,radassoc_core=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
