//! # Consistency Maintainer
//!
//! Every cascade the association database needs, as explicit functions
//! called inside the caller's transaction:
//!
//! - releasing a detection from its source (removal algebra, source
//!   deletion at `ndetect == 0`, orphan re-pointing)
//! - recording and dropping catalog matches (`nmatches` transitions and the
//!   uniqueness records that depend on them)
//! - purging and deleting images
//! - auditing the aggregate counters against the rows they count

use crate::association::{rederive, unmerge_position};
use crate::tables::Tables;
use crate::{
    AssocId, CatalogId, CatalogMatch, DetectionKey, Image, ImageId, RadassocError, Result, Stage,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

// =============================================================================
// DETECTION REMOVAL
// =============================================================================

/// What happened to a source when one of its detections was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The detection was not linked to a source.
    Unlinked,
    /// The source lost one detection and was kept.
    Updated(AssocId),
    /// The source lost its last detection and was deleted.
    Deleted(AssocId),
}

/// Take `detection` out of its source.
///
/// The detection row must already be deleted or unlinked by the caller so
/// a fallback re-derivation only sees the remaining detections.
fn release(tables: &mut dyn Tables, detection: &crate::Detection) -> Result<Release> {
    let Some(id) = detection.assoc_id else {
        return Ok(Release::Unlinked);
    };
    let Some(mut source) = tables.assoc(id)? else {
        warn!(assoc = id.0, "detection referenced a missing source");
        return Ok(Release::Unlinked);
    };

    source.ndetect = source.ndetect.saturating_sub(1);
    if source.ndetect == 0 {
        delete_assoc_source(tables, id)?;
        return Ok(Release::Deleted(id));
    }
    if !unmerge_position(&mut source, detection) {
        debug!(assoc = id.0, "unmerge degenerate, re-deriving");
        if !rederive(tables, &mut source)? {
            delete_assoc_source(tables, id)?;
            return Ok(Release::Deleted(id));
        }
    }
    tables.put_assoc(&source)?;
    Ok(Release::Updated(id))
}

/// Delete one detection, releasing it from its source first.
pub fn remove_detection(tables: &mut dyn Tables, key: DetectionKey) -> Result<Option<Release>> {
    let Some(detection) = tables.detection(key)? else {
        return Ok(None);
    };
    tables.delete_detection(key)?;
    release(tables, &detection).map(Some)
}

/// Unlink every detection of an image from its source, keeping the rows.
///
/// Used before re-associating an image. Returns how many detections were
/// unlinked.
pub fn detach_image(tables: &mut dyn Tables, image: ImageId) -> Result<usize> {
    let mut count = 0;
    for detection in tables.detections_of(image)? {
        if detection.assoc_id.is_none() && !detection.orphaned {
            continue;
        }
        let mut unlinked = detection.clone();
        unlinked.assoc_id = None;
        unlinked.orphaned = false;
        tables.put_detection(&unlinked)?;
        release(tables, &detection)?;
        count += 1;
    }
    debug!(image = image.0, count, "detections detached");
    Ok(count)
}

/// Rows removed by `purge_image`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PurgeSummary {
    pub detections: usize,
    pub islands: usize,
    pub sources_deleted: usize,
}

/// Remove everything extracted from an image and reset it to stage 1.
///
/// The image row is updated in place (and in `tables`).
pub fn purge_image(tables: &mut dyn Tables, image: &mut Image) -> Result<PurgeSummary> {
    let mut summary = PurgeSummary::default();
    for detection in tables.detections_of(image.id)? {
        tables.delete_detection(detection.key)?;
        if let Release::Deleted(_) = release(tables, &detection)? {
            summary.sources_deleted += 1;
        }
        summary.detections += 1;
    }
    summary.islands = tables.delete_islands_of(image.id)?;
    for record in tables.uniqueness_of_image(image.id)? {
        tables.delete_uniqueness(record.image, record.assoc)?;
    }

    image.stage = Stage::Read;
    image.nsrc = 0;
    image.rms_box = None;
    image.error = None;
    image.catalogs_checked.clear();
    tables.put_image(image)?;

    info!(
        image = %image.filename,
        detections = summary.detections,
        islands = summary.islands,
        sources_deleted = summary.sources_deleted,
        "image purged"
    );
    Ok(summary)
}

/// Look an image up by its stored filename, or else by a trailing run of
/// path components (`epoch_a.fits`, `images/epoch_a.fits`).
///
/// A name whose trailing components fit more than one image is an error.
pub fn find_image(tables: &dyn Tables, name: &str) -> Result<Option<Image>> {
    if let Some(image) = tables.image_by_filename(name)? {
        return Ok(Some(image));
    }
    if name.trim().is_empty() {
        return Ok(None);
    }
    let mut found: Vec<Image> = tables
        .images()?
        .into_iter()
        .filter(|image| Path::new(&image.filename).ends_with(name))
        .collect();
    if found.len() > 1 {
        let names: Vec<&str> = found.iter().map(|i| i.filename.as_str()).collect();
        return Err(RadassocError::InvalidRecord(format!(
            "image name {} is ambiguous: {}",
            name,
            names.join(", ")
        )));
    }
    Ok(found.pop())
}

/// Purge an image and delete its row. Unknown names are skipped.
pub fn delete_image(tables: &mut dyn Tables, name: &str) -> Result<bool> {
    let Some(mut image) = find_image(tables, name)? else {
        warn!(name, "image not in database, skipping");
        return Ok(false);
    };
    purge_image(tables, &mut image)?;
    tables.delete_image_row(image.id)?;
    Ok(true)
}

/// Delete a source with its matches and uniqueness records.
///
/// Detections still pointing at it are re-pointed to the orphan marker.
pub fn delete_assoc_source(tables: &mut dyn Tables, id: AssocId) -> Result<()> {
    for m in tables.matches_of_assoc(id)? {
        tables.delete_match(m.catalog, m.catalog_src, m.assoc)?;
    }
    for record in tables.uniqueness_of_assoc(id)? {
        tables.delete_uniqueness(record.image, record.assoc)?;
    }
    for mut detection in tables.detections_of_assoc(id)? {
        detection.assoc_id = None;
        detection.orphaned = true;
        tables.put_detection(&detection)?;
    }
    tables.delete_assoc(id)?;
    debug!(assoc = id.0, "source deleted");
    Ok(())
}

/// Delete the given sources. Every id must exist.
pub fn delete_assoc_sources(tables: &mut dyn Tables, ids: &[AssocId]) -> Result<usize> {
    for id in ids {
        if tables.assoc(*id)?.is_none() {
            return Err(RadassocError::AssocNotFound(*id));
        }
    }
    for id in ids {
        delete_assoc_source(tables, *id)?;
    }
    Ok(ids.len())
}

// =============================================================================
// MATCH COUNT TRANSITIONS
// =============================================================================

/// A source whose last catalog match was removed, with every image in
/// which it is detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZeroMatchCandidate {
    pub assoc: AssocId,
    pub images: Vec<ImageId>,
}

/// Images in which a source is detected, ascending.
pub(crate) fn detected_in(tables: &dyn Tables, assoc: AssocId) -> Result<Vec<ImageId>> {
    let images: BTreeSet<ImageId> = tables
        .detections_of_assoc(assoc)?
        .into_iter()
        .map(|d| d.key.image)
        .collect();
    Ok(images.into_iter().collect())
}

/// Record a match and bump the source's `nmatches`.
///
/// On the 0 to 1 transition every uniqueness record of the source is
/// removed. Returns false when the triple already existed.
pub fn record_match(tables: &mut dyn Tables, m: &CatalogMatch) -> Result<bool> {
    let mut source = tables
        .assoc(m.assoc)?
        .ok_or(RadassocError::AssocNotFound(m.assoc))?;
    if !tables.insert_match(m)? {
        return Ok(false);
    }
    source.nmatches += 1;
    tables.put_assoc(&source)?;
    if source.nmatches == 1 {
        for record in tables.uniqueness_of_assoc(m.assoc)? {
            tables.delete_uniqueness(record.image, record.assoc)?;
        }
    }
    Ok(true)
}

/// Delete a match and decrement `nmatches`.
///
/// Returns a candidate when the source drops to zero matches.
pub fn drop_match(tables: &mut dyn Tables, m: &CatalogMatch) -> Result<Option<ZeroMatchCandidate>> {
    if !tables.delete_match(m.catalog, m.catalog_src, m.assoc)? {
        return Ok(None);
    }
    let Some(mut source) = tables.assoc(m.assoc)? else {
        return Ok(None);
    };
    source.nmatches = source.nmatches.saturating_sub(1);
    tables.put_assoc(&source)?;
    if source.nmatches > 0 {
        return Ok(None);
    }
    Ok(Some(ZeroMatchCandidate {
        assoc: source.id,
        images: detected_in(tables, source.id)?,
    }))
}

/// Delete every match of one catalog, collecting zero-match candidates.
pub fn remove_catalog_matches(
    tables: &mut dyn Tables,
    catalog: CatalogId,
) -> Result<Vec<ZeroMatchCandidate>> {
    let mut candidates = Vec::new();
    for m in tables.matches_of_catalog(catalog)? {
        if let Some(candidate) = drop_match(tables, &m)? {
            candidates.push(candidate);
        }
    }
    Ok(candidates)
}

// =============================================================================
// AUDIT
// =============================================================================

/// One broken invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    NdetectMismatch { assoc: AssocId, recorded: u32, actual: u32 },
    NmatchesMismatch { assoc: AssocId, recorded: u32, actual: u32 },
    /// A detection references a source that does not exist.
    DanglingDetection { key: DetectionKey, assoc: AssocId },
    /// A detection is marked orphaned but still linked.
    OrphanFlag { key: DetectionKey },
    /// A source holds two detections from one image.
    DuplicateImage { assoc: AssocId, image: ImageId },
    /// A matched source still has a uniqueness record.
    UniquenessOnMatched { assoc: AssocId, image: ImageId },
    /// An unmatched source lacks a record for a matched image it is detected in.
    MissingUniqueness { assoc: AssocId, image: ImageId },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NdetectMismatch { assoc, recorded, actual } => {
                write!(f, "{}: ndetect {} but {} detections", assoc, recorded, actual)
            }
            Self::NmatchesMismatch { assoc, recorded, actual } => {
                write!(f, "{}: nmatches {} but {} matches", assoc, recorded, actual)
            }
            Self::DanglingDetection { key, assoc } => write!(
                f,
                "detection {} of {} references missing {}",
                key.src_id, key.image, assoc
            ),
            Self::OrphanFlag { key } => write!(
                f,
                "detection {} of {} is orphaned but linked",
                key.src_id, key.image
            ),
            Self::DuplicateImage { assoc, image } => {
                write!(f, "{} holds two detections from {}", assoc, image)
            }
            Self::UniquenessOnMatched { assoc, image } => {
                write!(f, "{} is matched but unique in {}", assoc, image)
            }
            Self::MissingUniqueness { assoc, image } => {
                write!(f, "{} is unmatched but not unique in {}", assoc, image)
            }
        }
    }
}

/// Check every aggregate and reference invariant of the database.
pub fn audit(tables: &dyn Tables) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();
    let sources: BTreeMap<AssocId, crate::AssociatedSource> = tables
        .all_assocs()?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();
    let matched_images: BTreeSet<ImageId> = tables
        .images()?
        .into_iter()
        .filter(|i| i.stage == Stage::Matched)
        .map(|i| i.id)
        .collect();

    let mut detections_per: BTreeMap<AssocId, Vec<ImageId>> = BTreeMap::new();
    for detection in tables.all_detections()? {
        let Some(assoc) = detection.assoc_id else {
            continue;
        };
        if detection.orphaned {
            violations.push(Violation::OrphanFlag { key: detection.key });
        }
        if !sources.contains_key(&assoc) {
            violations.push(Violation::DanglingDetection {
                key: detection.key,
                assoc,
            });
        }
        detections_per.entry(assoc).or_default().push(detection.key.image);
    }

    let mut matches_per: BTreeMap<AssocId, u32> = BTreeMap::new();
    for m in tables.all_matches()? {
        *matches_per.entry(m.assoc).or_default() += 1;
    }

    let mut unique: BTreeSet<(AssocId, ImageId)> = BTreeSet::new();
    for record in tables.all_uniqueness()? {
        unique.insert((record.assoc, record.image));
        let matched = sources.get(&record.assoc).is_some_and(|s| s.nmatches > 0);
        if matched {
            violations.push(Violation::UniquenessOnMatched {
                assoc: record.assoc,
                image: record.image,
            });
        }
    }

    for (id, source) in &sources {
        let images = detections_per.get(id).cloned().unwrap_or_default();
        let actual = images.len() as u32;
        if source.ndetect != actual {
            violations.push(Violation::NdetectMismatch {
                assoc: *id,
                recorded: source.ndetect,
                actual,
            });
        }
        let distinct: BTreeSet<ImageId> = images.iter().copied().collect();
        let mut seen = BTreeSet::new();
        for image in &images {
            if !seen.insert(*image) {
                violations.push(Violation::DuplicateImage {
                    assoc: *id,
                    image: *image,
                });
            }
        }
        let actual_matches = matches_per.get(id).copied().unwrap_or(0);
        if source.nmatches != actual_matches {
            violations.push(Violation::NmatchesMismatch {
                assoc: *id,
                recorded: source.nmatches,
                actual: actual_matches,
            });
        }
        if actual_matches == 0 {
            for image in distinct.intersection(&matched_images) {
                if !unique.contains(&(*id, *image)) {
                    violations.push(Violation::MissingUniqueness {
                        assoc: *id,
                        image: *image,
                    });
                }
            }
        }
    }

    // Matches referencing missing sources count against nothing; report them
    // as nmatches mismatches of an absent source.
    for (assoc, count) in &matches_per {
        if !sources.contains_key(assoc) {
            violations.push(Violation::NmatchesMismatch {
                assoc: *assoc,
                recorded: 0,
                actual: *count,
            });
        }
    }
    Ok(violations)
}
