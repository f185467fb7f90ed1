//! # Pipeline Scenario Tests
//!
//! End-to-end runs of the stage driver over a fixture extractor whose
//! island and detection counts are known in advance.
//!
//! ## Fixture
//! - `field_1.fits`: 28 islands / 29 detections at full scale,
//!   15 / 16 at half scale
//! - `field_2.fits`: 15 / 15 at full scale, 8 / 8 at half scale

use radassoc_core::{
    CatalogFormat, CatalogId, CatalogRegistry, CatalogSet, CatalogSource, CatalogSpec,
    ExtractedSource, Extraction, ExtractionParams, HeaderSource, Image, ImageHeader, ImageId,
    ImageOutcome, IslandStats, Measured, Pipeline, PipelineConfig, Result, RunSummary, Session,
    Shape, SourceExtractor, Stage, Stages, StructureCode, audit, remove_catalogs,
};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

// =============================================================================
// FIXTURES
// =============================================================================

const FIELD_RA: f64 = 150.0;
const FIELD_DEC: f64 = 30.0;

struct FixtureHeaders;

impl HeaderSource for FixtureHeaders {
    fn read_header(&self, _path: &Path) -> Result<ImageHeader> {
        Ok(ImageHeader {
            imsize: Some((4096, 4096)),
            obs_ra: Some(FIELD_RA),
            obs_dec: Some(FIELD_DEC),
            pixel_scale: Some(2.0),
            object: Some("FIELD".to_string()),
            obs_date: Some("2017-08-01".to_string()),
            obs_freq: Some(340.0),
            bmaj: Some(20.0),
            bmin: Some(15.0),
            bpa: Some(0.0),
            noise: Some(3.0),
            nvis: Some(500_000),
            mjdtime: Some(57966.5),
            tau_time: Some(3600.0),
            duration: Some(7200.0),
            ..ImageHeader::default()
        })
    }
}

/// Produces `(islands, detections)` sources per field and scale. Island 0
/// holds two sources whenever the detection count exceeds the island count.
struct FixtureExtractor;

impl FixtureExtractor {
    fn counts(filename: &str, scale: f64) -> (u32, u32) {
        let full = scale >= 1.0;
        if filename.contains("field_1") {
            if full { (28, 29) } else { (15, 16) }
        } else if full {
            (15, 15)
        } else {
            (8, 8)
        }
    }
}

/// Position of the n-th fixture source. The same n lands on the same sky
/// position in every field.
fn fixture_position(n: u32) -> (f64, f64) {
    let row = (n / 6) as f64;
    let col = (n % 6) as f64;
    (FIELD_RA + col * 0.05, FIELD_DEC + row * 0.05)
}

fn source(src_id: u32, isl_id: u32, ra: f64, dec: f64) -> ExtractedSource {
    let pos = |v| Measured::new(v, 2e-4);
    ExtractedSource {
        src_id,
        isl_id,
        ra: pos(ra),
        dec: pos(dec),
        ra_max: pos(ra),
        dec_max: pos(dec),
        total_flux: Measured::new(25.0, 1.5),
        peak_flux: Measured::new(20.0, 1.0),
        shape: Shape::default(),
        deconvolved: Shape::default(),
        code: StructureCode::S,
        island: IslandStats {
            total_flux: Measured::new(27.0, 1.5),
            rms: 3.0,
            ..IslandStats::default()
        },
    }
}

impl SourceExtractor for FixtureExtractor {
    fn extract(&self, image: &Image, params: &ExtractionParams) -> Result<Extraction> {
        let (islands, detections) = Self::counts(&image.filename, params.scale);
        let sources = (0..detections)
            .map(|n| {
                let isl_id = if n < islands { n } else { 0 };
                let (ra, dec) = if n < islands {
                    fixture_position(n)
                } else {
                    let (ra, dec) = fixture_position(0);
                    (ra + 0.01, dec)
                };
                source(n, isl_id, ra, dec)
            })
            .collect();
        Ok(Extraction {
            sources,
            rms_box: Some("(120, 40)".to_string()),
        })
    }
}

fn paths() -> Vec<PathBuf> {
    vec![PathBuf::from("field_1.fits"), PathBuf::from("field_2.fits")]
}

fn stages(source_finding: bool, source_association: bool, catalog_matching: bool) -> Stages {
    Stages {
        source_finding,
        source_association,
        catalog_matching,
    }
}

fn config(stages: Stages) -> PipelineConfig {
    PipelineConfig {
        stages,
        ..PipelineConfig::default()
    }
}

fn run_with(
    session: &mut Session,
    config: &PipelineConfig,
    catalogs: &CatalogSet,
    images: &[PathBuf],
) -> RunSummary {
    let registry = CatalogRegistry::from_specs(&config.catalogs).expect("registry");
    Pipeline::new(config, &registry, catalogs, &FixtureExtractor, &FixtureHeaders)
        .run(session, images)
        .expect("run")
}

fn run(session: &mut Session, config: &PipelineConfig, images: &[PathBuf]) -> RunSummary {
    run_with(session, config, &CatalogSet::new(), images)
}

/// `(id, stage)` of every image.
fn image_stages(session: &Session) -> Vec<(u64, u8)> {
    session
        .read(|t| {
            Ok(t.images()?
                .into_iter()
                .map(|i| (i.id.0, i.stage.number()))
                .collect())
        })
        .expect("images")
}

/// `(islands, detections)` of one image.
fn row_counts(session: &Session, image: u64) -> (usize, usize) {
    session
        .read(|t| {
            Ok((
                t.islands_of(ImageId(image))?.len(),
                t.detections_of(ImageId(image))?.len(),
            ))
        })
        .expect("counts")
}

fn assert_consistent(session: &Session) {
    let violations = session.read(|t| audit(t)).expect("audit");
    assert!(violations.is_empty(), "violations: {:?}", violations);
}

// =============================================================================
// SCENARIOS
// =============================================================================

/// No stages adds both images at stage 1.
#[test]
fn no_stages_adds_images_at_read() {
    let mut session = Session::new();
    let summary = run(&mut session, &config(Stages::none()), &paths());
    assert!(summary.reports.iter().all(|r| r.outcome == ImageOutcome::Added));
    assert_eq!(image_stages(&session), vec![(1, 1), (2, 1)]);
}

/// Repeating the run without reprocess is a no-op.
#[test]
fn repeated_run_without_reprocess_does_nothing() {
    let mut session = Session::new();
    let cfg = config(Stages::none());
    run(&mut session, &cfg, &paths());
    let summary = run(&mut session, &cfg, &paths());
    assert_eq!(summary.with_outcome(ImageOutcome::NothingToDo).count(), 2);
    assert_eq!(image_stages(&session), vec![(1, 1), (2, 1)]);

    let mut reprocess = cfg.clone();
    reprocess.options.reprocess = true;
    let summary = run(&mut session, &reprocess, &paths());
    assert_eq!(summary.with_outcome(ImageOutcome::Added).count(), 2);
    assert_eq!(image_stages(&session), vec![(1, 1), (2, 1)]);
}

/// Source finding only records exactly the extractor's output.
#[test]
fn source_finding_only_matches_extractor_counts() {
    let mut session = Session::new();
    let summary = run(&mut session, &config(stages(true, false, false)), &paths());
    for report in &summary.reports {
        assert_eq!(report.outcome, ImageOutcome::Completed { stage: Stage::Extracted });
    }
    assert_eq!(image_stages(&session), vec![(1, 2), (2, 2)]);
    assert_eq!(row_counts(&session, 1), (28, 29));
    assert_eq!(row_counts(&session, 2), (15, 15));

    let image = session
        .read(|t| t.image(ImageId(1)))
        .expect("read")
        .expect("image");
    assert_eq!(image.nsrc, 29);
    assert_eq!(image.rms_box.as_deref(), Some("(120, 40)"));
    assert!(image.radius.is_some());
}

/// Reprocess with a new scale purges the first run's rows.
#[test]
fn reprocess_replaces_extraction_rows() {
    let mut session = Session::new();
    let mut cfg = config(stages(true, false, false));
    cfg.options.reprocess = true;
    run(&mut session, &cfg, &paths());

    cfg.extraction.scale = 0.5;
    let summary = run(&mut session, &cfg, &paths());
    let done = ImageOutcome::Completed {
        stage: Stage::Extracted,
    };
    assert_eq!(summary.with_outcome(done).count(), 2);
    assert_eq!(image_stages(&session), vec![(1, 2), (2, 2)]);
    assert_eq!(row_counts(&session, 1), (15, 16));
    assert_eq!(row_counts(&session, 2), (8, 8));
}

/// Association or matching before extraction is refused without writes.
#[test]
fn later_stages_refused_before_extraction() {
    let mut session = Session::new();
    for s in [stages(false, true, false), stages(false, false, true), stages(false, true, true)] {
        let summary = run(&mut session, &config(s), &paths());
        assert_eq!(summary.with_outcome(ImageOutcome::NotReady).count(), 2);
    }
    assert!(image_stages(&session).is_empty());

    run(&mut session, &config(Stages::none()), &paths());
    let summary = run(&mut session, &config(stages(false, true, false)), &paths());
    assert_eq!(summary.with_outcome(ImageOutcome::NotReady).count(), 2);
    assert_eq!(image_stages(&session), vec![(1, 1), (2, 1)]);
    assert_eq!(row_counts(&session, 1), (0, 0));
}

// =============================================================================
// ASSOCIATION AND MATCHING
// =============================================================================

fn reference_catalog(ids: &[u32]) -> Vec<CatalogSource> {
    ids.iter()
        .enumerate()
        .map(|(i, &n)| {
            let (ra, dec) = fixture_position(n);
            CatalogSource {
                catalog: CatalogId(1),
                id: i as u64 + 1,
                name: Some(format!("REF{}", n)),
                ra: Measured::new(ra, 3e-4),
                dec: Measured::new(dec, 3e-4),
                total_flux: Some(Measured::new(30.0, 2.0)),
                peak_flux: None,
                maj: None,
                min: None,
                pa: None,
                rms: None,
                field: None,
            }
        })
        .collect()
}

fn matching_config() -> PipelineConfig {
    let mut cfg = config(Stages::default());
    cfg.catalogs = vec![CatalogSpec {
        name: "REF".to_string(),
        path: PathBuf::from("ref.txt"),
        format: CatalogFormat::default(),
    }];
    cfg
}

#[test]
fn full_run_associates_across_fields() {
    let mut session = Session::new();
    let cfg = matching_config();
    let mut catalogs = CatalogSet::new();
    catalogs.insert(CatalogId(1), reference_catalog(&[0, 1, 2, 3, 4]));

    let summary = run_with(&mut session, &cfg, &catalogs, &paths());
    let first = &summary.reports[0];
    assert_eq!(first.new_sources, 29);
    assert_eq!(first.catalogs_checked, vec!["ref".to_string()]);
    assert_eq!(first.new_matches, 5);

    // field_2 repeats the first 15 positions.
    let second = &summary.reports[1];
    assert_eq!(second.new_sources, 0);
    assert_eq!(second.updated_sources, 15);
    assert_eq!(second.new_matches, 0);
    assert_consistent(&session);

    let uniqueness = session
        .read(|t| {
            Ok((
                t.uniqueness_of_image(ImageId(1))?.len(),
                t.uniqueness_of_image(ImageId(2))?.len(),
            ))
        })
        .expect("uniqueness");
    assert_eq!(uniqueness, (24, 10));
}

#[test]
fn removing_catalog_restores_uniqueness() {
    let mut session = Session::new();
    let cfg = matching_config();
    let mut catalogs = CatalogSet::new();
    catalogs.insert(CatalogId(1), reference_catalog(&[0, 1, 2]));
    run_with(&mut session, &cfg, &catalogs, &paths());

    let registry = CatalogRegistry::from_specs(&cfg.catalogs).expect("registry");
    let unknown = session.transact(true, |t| remove_catalogs(t, &registry, &["nvss".to_string()]));
    assert!(unknown.is_err());

    let removal = session
        .transact(true, |t| {
            let removal = remove_catalogs(t, &registry, &["REF".to_string()])?;
            radassoc_core::uniqueness::materialize(t, &removal.candidates)?;
            Ok(removal)
        })
        .expect("remove");
    assert_eq!(removal.matches_removed, 3);
    assert_eq!(removal.candidates.len(), 3);
    assert_consistent(&session);

    let unique = session
        .read(|t| Ok(t.uniqueness_of_image(ImageId(1))?.len()))
        .expect("uniqueness");
    assert_eq!(unique, 29);
}

#[test]
fn unsaved_run_rolls_back_every_stage() {
    let mut session = Session::new();
    let mut cfg = config(Stages::default());
    cfg.options.save_to_database = false;
    let summary = run(&mut session, &cfg, &paths());
    assert_eq!(summary.reports[0].new_sources, 29);
    assert!(summary.run_id.is_none());
    assert!(image_stages(&session).is_empty());
}

#[test]
fn persistent_session_survives_reopen() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("assoc.redb");
    {
        let mut session = Session::with_redb(&path).expect("open");
        let summary = run(&mut session, &config(stages(true, true, false)), &paths());
        assert_eq!(summary.run_id, Some(1));
        assert_consistent(&session);
    }
    let mut session = Session::with_redb(&path).expect("reopen");
    assert_eq!(image_stages(&session), vec![(1, 3), (2, 3)]);
    assert_eq!(row_counts(&session, 1), (28, 29));

    let summary = run(&mut session, &config(stages(false, false, true)), &paths());
    assert_eq!(
        summary.with_outcome(ImageOutcome::Completed { stage: Stage::Matched }).count(),
        2
    );
    let runs = session.read(|t| t.runs()).expect("runs");
    assert_eq!(runs.len(), 2);
    assert_consistent(&session);
}
