//! # Pipeline Driver
//!
//! Drives each image through reading, source finding, association and
//! catalog matching according to the run's stages and options.
//!
//! Every stage of an image is one transaction. With `save_to_database`
//! off, all stages of an image share one transaction that is rolled back,
//! so later stages still see what earlier ones wrote.

use crate::association::associate_image;
use crate::catalog::{CatalogRegistry, CatalogSet};
use crate::config::PipelineConfig;
use crate::consistency::{detach_image, purge_image};
use crate::crossmatch::match_image;
use crate::extract::{HeaderSource, SourceExtractor};
use crate::quality::{QualityGate, Verdict};
use crate::session::Session;
use crate::sky::field_radius_deg;
use crate::tables::Tables;
use crate::{ErrorCode, Image, ImageHeader, ImageId, RadassocError, Result, RunRecord, Stage};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

// =============================================================================
// REPORTS
// =============================================================================

/// What happened to one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOutcome {
    /// Recorded at stage 1 with no further stages requested.
    Added,
    /// Already processed and nothing requested applies.
    NothingToDo,
    /// A requested stage needs an earlier one that has not run.
    NotReady,
    /// A quality check stopped the image.
    Aborted(ErrorCode),
    Completed { stage: Stage },
}

/// Per-image result of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageReport {
    pub filename: String,
    pub image_id: Option<ImageId>,
    pub outcome: ImageOutcome,
    pub stage: Option<Stage>,
    pub error: Option<ErrorCode>,
    pub new_sources: usize,
    pub updated_sources: usize,
    /// Catalogs matched for the first time in this run.
    pub catalogs_checked: Vec<String>,
    pub new_matches: usize,
}

impl ImageReport {
    fn new(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            image_id: None,
            outcome: ImageOutcome::NothingToDo,
            stage: None,
            error: None,
            new_sources: 0,
            updated_sources: 0,
            catalogs_checked: Vec::new(),
            new_matches: 0,
        }
    }

    fn finish(mut self, image: Option<&Image>, outcome: ImageOutcome) -> Self {
        if let Some(image) = image {
            self.image_id = Some(image.id);
            self.stage = Some(image.stage);
            self.error = image.error;
        }
        self.outcome = outcome;
        self
    }
}

/// Result of `Pipeline::run`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Id of the stored run record; `None` when nothing was saved.
    pub run_id: Option<u64>,
    pub duration_secs: f64,
    pub reports: Vec<ImageReport>,
}

impl RunSummary {
    /// Reports with the given outcome.
    pub fn with_outcome(&self, outcome: ImageOutcome) -> impl Iterator<Item = &ImageReport> {
        self.reports.iter().filter(move |r| r.outcome == outcome)
    }
}

// =============================================================================
// STAGE RUNNERS
// =============================================================================

/// How stage closures reach the tables.
trait StageRunner {
    fn peek<T>(&mut self, f: impl FnOnce(&dyn Tables) -> Result<T>) -> Result<T>;
    fn stage<T>(&mut self, f: impl FnOnce(&mut dyn Tables) -> Result<T>) -> Result<T>;
}

/// One committed transaction per stage.
struct Committing<'s> {
    session: &'s mut Session,
}

impl StageRunner for Committing<'_> {
    fn peek<T>(&mut self, f: impl FnOnce(&dyn Tables) -> Result<T>) -> Result<T> {
        self.session.read(f)
    }

    fn stage<T>(&mut self, f: impl FnOnce(&mut dyn Tables) -> Result<T>) -> Result<T> {
        self.session.transact(true, f)
    }
}

/// Every stage inside one enclosing transaction.
struct Scratch<'t> {
    tables: &'t mut dyn Tables,
}

impl StageRunner for Scratch<'_> {
    fn peek<T>(&mut self, f: impl FnOnce(&dyn Tables) -> Result<T>) -> Result<T> {
        f(&*self.tables)
    }

    fn stage<T>(&mut self, f: impl FnOnce(&mut dyn Tables) -> Result<T>) -> Result<T> {
        f(&mut *self.tables)
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// One configured run over a set of images.
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    registry: &'a CatalogRegistry,
    catalogs: &'a CatalogSet,
    extractor: &'a dyn SourceExtractor,
    headers: &'a dyn HeaderSource,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        registry: &'a CatalogRegistry,
        catalogs: &'a CatalogSet,
        extractor: &'a dyn SourceExtractor,
        headers: &'a dyn HeaderSource,
    ) -> Self {
        Self {
            config,
            registry,
            catalogs,
            extractor,
            headers,
        }
    }

    /// Process `images` in order and record the run.
    ///
    /// Quality failures are recorded on the image and reported; collaborator
    /// and storage failures stop the run.
    pub fn run(&self, session: &mut Session, images: &[PathBuf]) -> Result<RunSummary> {
        self.config.validate()?;
        let started = Instant::now();
        let started_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let save = self.config.options.save_to_database;
        let mut reports = Vec::with_capacity(images.len());
        for path in images {
            let report = if save {
                self.process_image(&mut Committing { session: &mut *session }, path)?
            } else {
                session.transact(false, |tables| {
                    self.process_image(&mut Scratch { tables }, path)
                })?
            };
            reports.push(report);
        }

        let duration_secs = started.elapsed().as_secs_f64();
        let run_id = if save {
            let config = serde_json::to_string(self.config)
                .map_err(|e| RadassocError::SerializationError(e.to_string()))?;
            let record = RunRecord {
                id: 0,
                started: started_unix,
                duration_secs,
                nimages: images.len() as u32,
                config,
            };
            Some(session.transact(true, |t| {
                let id = t.next_run_id()?;
                t.put_run(&RunRecord { id, ..record })?;
                Ok(id)
            })?)
        } else {
            None
        };

        info!(
            images = images.len(),
            duration_secs,
            saved = save,
            "run complete"
        );
        Ok(RunSummary {
            run_id,
            duration_secs,
            reports,
        })
    }

    /// Outcome decided before anything is written, if any.
    fn readiness(&self, existing: Option<&Image>) -> Option<ImageOutcome> {
        let stages = self.config.stages;
        let reprocess = self.config.options.reprocess;
        let Some(image) = existing else {
            let needs_extraction =
                !stages.source_finding && (stages.source_association || stages.catalog_matching);
            return needs_extraction.then_some(ImageOutcome::NotReady);
        };
        if !stages.any() || stages.source_finding {
            return (!reprocess).then_some(ImageOutcome::NothingToDo);
        }
        if image.stage < Stage::Extracted {
            return Some(ImageOutcome::NotReady);
        }
        if !stages.source_association && image.stage < Stage::Associated {
            return Some(ImageOutcome::NotReady);
        }
        None
    }

    fn process_image<R: StageRunner>(&self, runner: &mut R, path: &Path) -> Result<ImageReport> {
        let filename = path.to_string_lossy().into_owned();
        let mut report = ImageReport::new(&filename);
        let existing = runner.peek(|t| t.image_by_filename(&filename))?;

        if let Some(outcome) = self.readiness(existing.as_ref()) {
            info!(image = %filename, ?outcome, "image skipped");
            return Ok(report.finish(existing.as_ref(), outcome));
        }

        let stages = self.config.stages;
        let mut image = match existing {
            Some(image) if !stages.source_finding && stages.any() => image,
            existing => {
                let header = self.headers.read_header(path)?;
                let image = self.read_stage(runner, existing, &filename, header)?;
                if let Some(code) = image.abort_code() {
                    return Ok(report.finish(Some(&image), ImageOutcome::Aborted(code)));
                }
                if !stages.any() {
                    return Ok(report.finish(Some(&image), ImageOutcome::Added));
                }
                image
            }
        };

        let extracted = if stages.source_finding {
            self.extract_stage(runner, &mut image)?
        } else {
            Ok(())
        };
        if let Err(code) = extracted {
            return Ok(report.finish(Some(&image), ImageOutcome::Aborted(code)));
        }

        let mut progressed = stages.source_finding;
        if stages.source_association {
            let opts = self.config.options;
            if image.stage >= Stage::Associated && !opts.overwrite {
                info!(image = %image.filename, "already associated, skipping");
            } else {
                let summary = runner.stage(|t| {
                    if image.stage >= Stage::Associated {
                        detach_image(t, image.id)?;
                        for record in t.uniqueness_of_image(image.id)? {
                            t.delete_uniqueness(record.image, record.assoc)?;
                        }
                        image.catalogs_checked.clear();
                    }
                    let summary = associate_image(t, &image, &self.config.association)?;
                    image.stage = Stage::Associated;
                    t.put_image(&image)?;
                    Ok(summary)
                })?;
                report.new_sources = summary.new_sources;
                report.updated_sources = summary.updated_sources;
                progressed = true;
            }
        }

        if stages.catalog_matching {
            let opts = self.config.options;
            if image.stage < Stage::Associated {
                return Ok(report.finish(Some(&image), ImageOutcome::NotReady));
            }
            if image.stage == Stage::Matched && !opts.update_match && !opts.redo_match {
                info!(image = %image.filename, "already matched, skipping");
            } else {
                let summary = runner.stage(|t| {
                    match_image(
                        t,
                        &mut image,
                        self.registry,
                        self.catalogs,
                        &self.config.matching,
                        opts.redo_match,
                    )
                })?;
                report.catalogs_checked = summary.catalogs_checked;
                report.new_matches = summary.new_matches;
                progressed = true;
            }
        }

        let outcome = if progressed {
            ImageOutcome::Completed { stage: image.stage }
        } else {
            ImageOutcome::NothingToDo
        };
        Ok(report.finish(Some(&image), outcome))
    }

    /// Record (or refresh) the image row at stage 1 and run the header checks.
    fn read_stage<R: StageRunner>(
        &self,
        runner: &mut R,
        existing: Option<Image>,
        filename: &str,
        header: ImageHeader,
    ) -> Result<Image> {
        let scale = self.config.extraction.scale;
        let quality_checks = self.config.options.quality_checks;
        let gate = QualityGate::new(&self.config.quality);

        runner.stage(|t| {
            let mut image = match existing {
                Some(mut image) => {
                    purge_image(t, &mut image)?;
                    image.header = header;
                    image.nearest_problem = None;
                    image.separation = None;
                    image
                }
                None => Image::new(t.next_image_id()?, filename, header),
            };
            let required = image.header.required();
            image.radius = required.map(|h| field_radius_deg(h.naxis2, h.pixel_scale, scale));

            if required.is_none() {
                warn!(
                    image = %image.filename,
                    missing = ?image.header.missing_fields(),
                    "image header incomplete"
                );
                image.error = Some(ErrorCode::MissingMetadata);
            } else if quality_checks {
                let assessment = gate.assess_header(&image.header, image.radius);
                if let Some((name, sep)) = assessment.nearest_problem {
                    image.nearest_problem = Some(name);
                    image.separation = Some(sep);
                }
                image.error = assessment.verdict.code();
            }
            t.put_image(&image)?;
            info!(image = %image.filename, id = image.id.0, error = ?image.error, "image read");
            Ok(image)
        })
    }

    /// Extract sources and record them. `Ok(Err(code))` means a quality abort.
    fn extract_stage<R: StageRunner>(
        &self,
        runner: &mut R,
        image: &mut Image,
    ) -> Result<std::result::Result<(), ErrorCode>> {
        let required = image.header.required().ok_or_else(|| {
            RadassocError::Header(format!("{} has an incomplete header", image.filename))
        })?;
        let extraction = self.extractor.extract(image, &self.config.extraction)?;
        let rms_box = extraction.rms_box.clone();
        let records = extraction.into_records(image.id, &required, &self.config.beam)?;

        let verdict = if self.config.options.quality_checks {
            QualityGate::new(&self.config.quality)
                .assess_extraction(&image.header, &records.detections)
        } else {
            Verdict::Pass
        };

        runner.stage(|t| {
            image.nsrc = records.detections.len() as u32;
            image.rms_box = rms_box;
            if let Verdict::Abort(code) = verdict {
                warn!(image = %image.filename, ?code, "extraction rejected");
                image.error = Some(code);
                t.put_image(image)?;
                return Ok(Err(code));
            }
            let mut islands = 0;
            for island in &records.islands {
                if t.insert_island(island)? {
                    islands += 1;
                }
            }
            for detection in &records.detections {
                t.put_detection(detection)?;
            }
            image.stage = Stage::Extracted;
            t.put_image(image)?;
            info!(
                image = %image.filename,
                islands,
                detections = records.detections.len(),
                "sources extracted"
            );
            Ok(Ok(()))
        })
    }
}
