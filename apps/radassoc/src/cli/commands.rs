//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::ModeOverrides;
use crate::header::JsonHeaderSource;
use crate::run_file::RunFile;
use radassoc_core::consistency::{delete_assoc_sources, delete_image};
use radassoc_core::uniqueness::materialize;
use radassoc_core::{
    AssocId, CatalogRegistry, CatalogSet, ImageOutcome, ImageReport, Pipeline, RadassocError,
    Session, SrlCatalogExtractor, audit, remove_catalogs,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new database.
pub fn cmd_init(db_path: &Path, force: bool) -> Result<(), RadassocError> {
    if db_path.exists() {
        if !force {
            return Err(RadassocError::IoError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| RadassocError::IoError(format!("Cannot remove database: {}", e)))?;
    }
    let _session = Session::with_redb(db_path)?;
    println!("Initialized new radassoc database at {:?}", db_path);
    Ok(())
}

// =============================================================================
// PROCESS COMMAND
// =============================================================================

/// Apply command-line mode flags on top of the run file.
pub fn apply_overrides(run: &mut RunFile, modes: ModeOverrides) {
    let options = &mut run.pipeline.options;
    if modes.no_save {
        options.save_to_database = false;
    }
    if modes.no_quality_checks {
        options.quality_checks = false;
    }
    options.overwrite |= modes.overwrite;
    options.reprocess |= modes.reprocess;
    if modes.redo_match {
        options.redo_match = true;
        options.update_match = false;
    }
    if modes.update_match {
        options.update_match = true;
        options.redo_match = false;
    }
}

fn outcome_label(outcome: ImageOutcome) -> String {
    match outcome {
        ImageOutcome::Added => "added".to_string(),
        ImageOutcome::NothingToDo => "nothing to do".to_string(),
        ImageOutcome::NotReady => "not ready".to_string(),
        ImageOutcome::Aborted(code) => format!("aborted: {}", code),
        ImageOutcome::Completed { stage } => format!("completed to stage {}", stage),
    }
}

fn report_json(report: &ImageReport) -> serde_json::Value {
    serde_json::json!({
        "filename": report.filename,
        "image_id": report.image_id.map(|id| id.0),
        "outcome": outcome_label(report.outcome),
        "stage": report.stage.map(|s| s.number()),
        "error": report.error.map(|e| e.code()),
        "new_sources": report.new_sources,
        "updated_sources": report.updated_sources,
        "catalogs_checked": report.catalogs_checked,
        "new_matches": report.new_matches
    })
}

/// Run the pipeline over the run file's images, or over `images` when given.
pub fn cmd_process(
    db_path: &Path,
    json_mode: bool,
    quiet: bool,
    config_path: &Path,
    images: &[PathBuf],
    modes: ModeOverrides,
) -> Result<(), RadassocError> {
    let mut run = RunFile::load(config_path)?;
    apply_overrides(&mut run, modes);
    let config = &run.pipeline;
    config.validate()?;

    let paths = if images.is_empty() {
        run.image_paths()?
    } else {
        images.to_vec()
    };
    if paths.is_empty() {
        warn!("no images to process");
        return Ok(());
    }

    let registry = CatalogRegistry::from_specs(&config.catalogs)?;
    let catalogs = if config.stages.catalog_matching {
        CatalogSet::load(&registry, run.inputs.catalog_cache.as_deref())?
    } else {
        CatalogSet::new()
    };
    let list_dir = run
        .inputs
        .source_lists
        .clone()
        .or_else(|| run.inputs.image_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let extractor = SrlCatalogExtractor::new(list_dir);

    let mut session = open_session(db_path)?;
    info!(images = paths.len(), database = %db_path.display(), "processing");
    let summary = Pipeline::new(config, &registry, &catalogs, &extractor, &JsonHeaderSource)
        .run(&mut session, &paths)?;

    if json_mode {
        print_json(&serde_json::json!({
            "run_id": summary.run_id,
            "duration_secs": summary.duration_secs,
            "saved": config.options.save_to_database,
            "images": summary.reports.iter().map(report_json).collect::<Vec<_>>()
        }));
        return Ok(());
    }

    if !quiet {
        for report in &summary.reports {
            println!("{}: {}", report.filename, outcome_label(report.outcome));
            if report.new_sources + report.updated_sources > 0 {
                println!(
                    "  sources: {} new, {} updated",
                    report.new_sources, report.updated_sources
                );
            }
            if !report.catalogs_checked.is_empty() {
                println!(
                    "  catalogs: {} ({} new matches)",
                    report.catalogs_checked.join(", "),
                    report.new_matches
                );
            }
        }
    }
    let aborted = summary
        .reports
        .iter()
        .filter(|r| matches!(r.outcome, ImageOutcome::Aborted(_)))
        .count();
    println!(
        "Processed {} images in {:.1}s ({} aborted){}",
        summary.reports.len(),
        summary.duration_secs,
        aborted,
        if config.options.save_to_database {
            ""
        } else {
            ", nothing saved"
        }
    );
    Ok(())
}

// =============================================================================
// STATUS COMMANDS
// =============================================================================

/// Show table counts.
pub fn cmd_status(db_path: &Path, json_mode: bool) -> Result<(), RadassocError> {
    let session = open_session(db_path)?;
    let counts = session.counts()?;
    let runs = session.read(|t| t.runs())?;

    if json_mode {
        print_json(&serde_json::json!({
            "database": db_path.to_string_lossy(),
            "images": counts.images,
            "islands": counts.islands,
            "detections": counts.detections,
            "associated_sources": counts.assocs,
            "catalog_matches": counts.matches,
            "uniqueness_records": counts.uniqueness,
            "runs": runs.len()
        }));
        return Ok(());
    }

    println!("radassoc Database Status");
    println!("========================");
    println!("Database: {:?}", db_path);
    println!();
    println!("Images:             {}", counts.images);
    println!("Islands:            {}", counts.islands);
    println!("Detections:         {}", counts.detections);
    println!("Associated sources: {}", counts.assocs);
    println!("Catalog matches:    {}", counts.matches);
    println!("Unique records:     {}", counts.uniqueness);
    println!("Runs:               {}", runs.len());
    Ok(())
}

/// List images with stage and error.
pub fn cmd_images(db_path: &Path, json_mode: bool) -> Result<(), RadassocError> {
    let session = open_session(db_path)?;
    let images = session.read(|t| t.images())?;

    if json_mode {
        let rows: Vec<serde_json::Value> = images
            .iter()
            .map(|i| {
                serde_json::json!({
                    "id": i.id.0,
                    "filename": i.filename,
                    "stage": i.stage.number(),
                    "error": i.error.map(|e| e.code()),
                    "nsrc": i.nsrc,
                    "catalogs_checked": i.catalogs_checked,
                    "nearest_problem": i.nearest_problem,
                    "separation": i.separation
                })
            })
            .collect();
        print_json(&serde_json::Value::Array(rows));
        return Ok(());
    }

    for image in &images {
        let error = image
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>5}  {:<16}  {:>6}  {}  {}",
            image.id.0,
            image.stage.to_string(),
            image.nsrc,
            image.filename,
            error
        );
    }
    Ok(())
}

// =============================================================================
// REMOVAL COMMANDS
// =============================================================================

/// Purge and delete images by stored filename or trailing path. Unknown names
/// are skipped; an ambiguous name removes nothing.
pub fn cmd_remove_images(
    db_path: &Path,
    json_mode: bool,
    filenames: &[String],
) -> Result<(), RadassocError> {
    let mut session = open_session(db_path)?;
    let removed = session.transact(true, |t| {
        let mut removed = Vec::new();
        for name in filenames {
            if delete_image(t, name)? {
                removed.push(name.clone());
            }
        }
        Ok(removed)
    })?;

    if json_mode {
        print_json(&serde_json::json!({ "removed": removed }));
    } else {
        println!("Removed {} of {} images", removed.len(), filenames.len());
    }
    Ok(())
}

/// Delete associated sources; every id must exist.
///
/// Detections of deleted sources stay in place, marked orphaned.
pub fn cmd_remove_sources(
    db_path: &Path,
    json_mode: bool,
    ids: &[u64],
) -> Result<(), RadassocError> {
    let ids: Vec<AssocId> = ids.iter().map(|&id| AssocId(id)).collect();
    let mut session = open_session(db_path)?;
    let removed = session.transact(true, |t| delete_assoc_sources(t, &ids))?;

    if json_mode {
        print_json(&serde_json::json!({ "removed": removed }));
    } else {
        println!("Removed {} associated sources", removed);
    }
    Ok(())
}

/// Remove all matches against the named catalogs.
pub fn cmd_remove_catalogs(
    db_path: &Path,
    json_mode: bool,
    config_path: &Path,
    names: &[String],
    write_uniqueness: bool,
) -> Result<(), RadassocError> {
    let run = RunFile::load(config_path)?;
    let registry = CatalogRegistry::from_specs(&run.pipeline.catalogs)?;
    let mut session = open_session(db_path)?;

    let (removal, written) = session.transact(true, |t| {
        let removal = remove_catalogs(t, &registry, names)?;
        let written = if write_uniqueness {
            materialize(t, &removal.candidates)?
        } else {
            0
        };
        Ok((removal, written))
    })?;

    if json_mode {
        print_json(&serde_json::json!({
            "catalogs": removal.catalogs,
            "matches_removed": removal.matches_removed,
            "sources_unmatched": removal.candidates.len(),
            "images_updated": removal.images_updated,
            "uniqueness_written": written
        }));
    } else {
        println!(
            "Removed {} matches from {}; {} sources left unmatched, {} uniqueness records written",
            removal.matches_removed,
            removal.catalogs.join(", "),
            removal.candidates.len(),
            written
        );
    }
    Ok(())
}

// =============================================================================
// AUDIT COMMAND
// =============================================================================

/// Check invariants; fails when any is violated.
pub fn cmd_audit(db_path: &Path, json_mode: bool, verbose: bool) -> Result<(), RadassocError> {
    let session = open_session(db_path)?;
    let violations = session.read(|t| audit(t))?;

    if json_mode {
        let list: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
        print_json(&serde_json::json!({
            "ok": violations.is_empty(),
            "violations": list
        }));
    } else if violations.is_empty() {
        println!("All invariants hold");
    } else {
        let shown = if verbose { violations.len() } else { violations.len().min(20) };
        for v in &violations[..shown] {
            println!("  {}", v);
        }
        if shown < violations.len() {
            println!("  ... {} more (use --verbose)", violations.len() - shown);
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(RadassocError::InvalidRecord(format!(
            "{} invariant violations",
            violations.len()
        )))
    }
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open (or create) the redb database at `db_path`.
pub fn open_session(db_path: &Path) -> Result<Session, RadassocError> {
    Session::with_redb(db_path)
}
