//! # radassoc CLI Module
//!
//! ## Available Commands
//!
//! - `init` - Create a new association database
//! - `process` - Run the pipeline over images
//! - `status` - Show table counts
//! - `images` - List images with stage and error
//! - `remove-images` - Purge and delete images
//! - `remove-sources` - Delete associated sources
//! - `remove-catalogs` - Remove all matches against catalogs
//! - `audit` - Check counter and reference invariants

mod commands;

use clap::{Parser, Subcommand};
use radassoc_core::RadassocError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// radassoc - multi-epoch radio source association
///
/// Associates detections from repeated radio images into persistent sources
/// and cross-matches them against reference catalogs.
#[derive(Parser, Debug)]
#[command(name = "radassoc")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress per-image output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the association database
    #[arg(short = 'D', long, global = true, default_value = "radassoc.db")]
    pub database: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Mode flags that override the run file.
#[derive(clap::Args, Debug, Clone, Copy, Default)]
pub struct ModeOverrides {
    /// Roll back every write (dry run)
    #[arg(long)]
    pub no_save: bool,

    /// Skip quality checks (missing metadata still aborts)
    #[arg(long)]
    pub no_quality_checks: bool,

    /// Re-associate images that were already associated
    #[arg(long)]
    pub overwrite: bool,

    /// Purge and rebuild images that were already processed
    #[arg(long)]
    pub reprocess: bool,

    /// Discard existing matches and match again
    #[arg(long, conflicts_with = "update_match")]
    pub redo_match: bool,

    /// Match already-matched images against newly added catalogs
    #[arg(long)]
    pub update_match: bool,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Run the pipeline over images
    Process {
        /// Run file (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Images to process instead of the run file's inputs
        images: Vec<PathBuf>,

        #[command(flatten)]
        modes: ModeOverrides,
    },

    /// Show table counts
    Status,

    /// List images with stage and error
    Images,
    /// Purge and delete images by filename or trailing path (e.g. epoch_a.fits)
    /// Purge and delete images by filename
    RemoveImages {
        #[arg(required = true)]
        filenames: Vec<String>,
    },

    /// Delete associated sources by id; their detections become orphans
    RemoveSources {
        #[arg(required = true)]
        ids: Vec<u64>,
    },

    /// Remove all matches against the named catalogs
    RemoveCatalogs {
        /// Run file (TOML) listing the catalogs
        #[arg(short, long)]
        config: PathBuf,

        #[arg(required = true)]
        names: Vec<String>,

        /// Do not create uniqueness records for sources left unmatched
        #[arg(long)]
        no_uniqueness: bool,
    },

    /// Check counter and reference invariants
    Audit,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), RadassocError> {
    let json_mode = cli.json_mode;
    let db = &cli.database;

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(db, force),
        Some(Commands::Process {
            config,
            images,
            modes,
        }) => cmd_process(db, json_mode, cli.quiet, &config, &images, modes),
        Some(Commands::Status) => cmd_status(db, json_mode),
        Some(Commands::Images) => cmd_images(db, json_mode),
        Some(Commands::RemoveImages { filenames }) => cmd_remove_images(db, json_mode, &filenames),
        Some(Commands::RemoveSources { ids }) => cmd_remove_sources(db, json_mode, &ids),
        Some(Commands::RemoveCatalogs {
            config,
            names,
            no_uniqueness,
        }) => cmd_remove_catalogs(db, json_mode, &config, &names, !no_uniqueness),
        Some(Commands::Audit) => cmd_audit(db, json_mode, cli.verbose),
        None => {
            // No subcommand - show status by default
            cmd_status(db, json_mode)
        }
    }
}
