//! comprobar CLI - GPT-2 numerical conformance harness
//!
//! # Commands
//!
//! - `attention` - Generate the attention golden bundle
//! - `verify-attention` - Replay a bundle against this implementation
//! - `verify-corpus` - Compare two generation corpora
//! - `inspect` - List a bundle's tensors and metadata
//! - `config` - Print the resolved configuration

use std::process::ExitCode;

use clap::Parser;
use comprobar::cli::{entrypoint, Cli};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match entrypoint(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "comprobar failed");
            ExitCode::FAILURE
        },
    }
}
