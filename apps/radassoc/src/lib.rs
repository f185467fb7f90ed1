//! # radassoc
//!
//! Library half of the radassoc binary: the CLI commands, run file loading
//! and header sidecars. Exposed so the commands can be driven from tests.

pub mod cli;
pub mod header;
pub mod run_file;
