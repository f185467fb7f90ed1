//! # Association Engine
//!
//! Merges per-image detections into persistent associated sources.
//!
//! A source position is the inverse-variance weighted mean of the detections
//! it holds, kept per axis:
//!
//! ```text
//! merge:    w = 1/s_src^2 + 1/s_det^2    pos = (pos_src/s_src^2 + pos_det/s_det^2) / w
//! unmerge:  w = 1/s_src^2 - 1/s_det^2    pos = (pos_src/s_src^2 - pos_det/s_det^2) / w
//!           s_new^2 = 1/w
//! ```
//!
//! The two are exact inverses, so merging a detection and immediately
//! removing it restores the previous aggregate to rounding error. Right
//! ascension is unwrapped around the aggregate before averaging so sources
//! straddling RA = 0 combine correctly.

use crate::config::AssociationParams;
use crate::primitives::ARCSEC_PER_DEG;
use crate::sky::{angular_separation, normalize_ra, wrap_ra_delta};
use crate::tables::Tables;
use crate::{
    AssocId, AssociatedSource, Detection, Image, Measured, RadassocError, ResClass, Result,
};
use std::collections::BTreeSet;
use tracing::{debug, info};

// =============================================================================
// WEIGHTED COMBINATION
// =============================================================================

/// Combine an aggregate with one more measurement.
#[must_use]
pub fn merge_axis(agg: Measured, det: Measured) -> Measured {
    let wa = agg.weight();
    let wd = det.weight();
    let w = wa + wd;
    Measured::new((agg.value * wa + det.value * wd) / w, (1.0 / w).sqrt())
}

/// Remove one measurement from an aggregate.
///
/// Returns `None` when the remaining weight is not finite and positive.
#[must_use]
pub fn unmerge_axis(agg: Measured, det: Measured) -> Option<Measured> {
    let wa = agg.weight();
    let wd = det.weight();
    let w = wa - wd;
    if !w.is_finite() || w <= 0.0 {
        return None;
    }
    let value = (agg.value * wa - det.value * wd) / w;
    let error = (1.0 / w).sqrt();
    (value.is_finite() && error.is_finite()).then_some(Measured::new(value, error))
}

/// Detection RA expressed on the same branch as `reference`.
fn unwrapped_ra(reference: f64, ra: Measured) -> Measured {
    Measured::new(reference + wrap_ra_delta(ra.value - reference), ra.error)
}

/// Fold a detection into a source position.
pub fn merge_position(source: &mut AssociatedSource, detection: &Detection) {
    let ra = merge_axis(source.ra, unwrapped_ra(source.ra.value, detection.ra));
    source.ra = Measured::new(normalize_ra(ra.value), ra.error);
    source.dec = merge_axis(source.dec, detection.dec);
}

/// Take a detection out of a source position.
///
/// Returns false, leaving the source untouched, on numerical degeneracy.
pub fn unmerge_position(source: &mut AssociatedSource, detection: &Detection) -> bool {
    let ra = unmerge_axis(source.ra, unwrapped_ra(source.ra.value, detection.ra));
    let dec = unmerge_axis(source.dec, detection.dec);
    match (ra, dec) {
        (Some(ra), Some(dec)) => {
            source.ra = Measured::new(normalize_ra(ra.value), ra.error);
            source.dec = dec;
            true
        }
        _ => false,
    }
}

/// Rebuild a source's position and `ndetect` from its live detections.
///
/// Returns false when no detection references the source.
pub fn rederive(tables: &dyn Tables, source: &mut AssociatedSource) -> Result<bool> {
    let detections = tables.detections_of_assoc(source.id)?;
    let Some((first, rest)) = detections.split_first() else {
        return Ok(false);
    };
    source.ra = Measured::new(normalize_ra(first.ra.value), first.ra.error);
    source.dec = first.dec;
    for det in rest {
        merge_position(source, det);
    }
    source.ndetect = detections.len() as u32;
    debug!(assoc = source.id.0, ndetect = source.ndetect, "source re-derived");
    Ok(true)
}

// =============================================================================
// ASSOCIATION
// =============================================================================

/// Counts reported by `associate_image`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssociationSummary {
    pub new_sources: usize,
    pub updated_sources: usize,
}

fn check_errors(detection: &Detection) -> Result<()> {
    let ok = |m: Measured| m.error.is_finite() && m.error > 0.0 && m.value.is_finite();
    if ok(detection.ra) && ok(detection.dec) {
        Ok(())
    } else {
        Err(RadassocError::InvalidRecord(format!(
            "detection {} of {} has an unusable position",
            detection.key.src_id, detection.key.image
        )))
    }
}

/// Best candidate for a detection among `candidates` (ascending by id).
///
/// The lowest separation in units of combined sigma wins; ties keep the
/// lower id.
fn best_candidate<'a>(
    detection: &Detection,
    candidates: &'a [AssociatedSource],
    res_class: ResClass,
    claimed: &BTreeSet<AssocId>,
    params: &AssociationParams,
) -> Option<&'a AssociatedSource> {
    let mut best: Option<(&AssociatedSource, f64)> = None;
    for source in candidates {
        if source.res_class != res_class || claimed.contains(&source.id) {
            continue;
        }
        let sigma = source.position_sigma().hypot(detection.position_sigma());
        let sep = angular_separation(
            source.ra.value,
            source.dec.value,
            detection.ra.value,
            detection.dec.value,
        );
        if sep > params.radius_scale * sigma {
            continue;
        }
        let normalized = sep / sigma;
        if best.is_none_or(|(_, b)| normalized < b) {
            best = Some((source, normalized));
        }
    }
    best.map(|(s, _)| s)
}

/// Associate every unlinked detection of `image` with a persistent source.
///
/// Detections are processed in source id order. A source already holding a
/// detection from this image is never offered a second one.
pub fn associate_image(
    tables: &mut dyn Tables,
    image: &Image,
    params: &AssociationParams,
) -> Result<AssociationSummary> {
    let bmaj = image.header.bmaj.ok_or_else(|| {
        RadassocError::InvalidRecord(format!("{} has no restoring beam", image.filename))
    })?;
    let res_class = ResClass::from_beam(bmaj);
    let cone = params.max_radius_arcsec / ARCSEC_PER_DEG;

    let detections = tables.detections_of(image.id)?;
    let mut claimed: BTreeSet<AssocId> = detections.iter().filter_map(|d| d.assoc_id).collect();
    let mut created: BTreeSet<AssocId> = BTreeSet::new();
    let mut updated: BTreeSet<AssocId> = BTreeSet::new();

    for mut detection in detections.into_iter().filter(|d| d.assoc_id.is_none()) {
        check_errors(&detection)?;
        let candidates = tables.assocs_near(detection.ra.value, detection.dec.value, cone)?;
        let id = match best_candidate(&detection, &candidates, res_class, &claimed, params) {
            Some(found) => {
                let mut source = found.clone();
                merge_position(&mut source, &detection);
                source.ndetect += 1;
                tables.put_assoc(&source)?;
                if !created.contains(&source.id) {
                    updated.insert(source.id);
                }
                source.id
            }
            None => {
                let source = AssociatedSource {
                    id: tables.next_assoc_id()?,
                    ra: Measured::new(normalize_ra(detection.ra.value), detection.ra.error),
                    dec: detection.dec,
                    res_class,
                    ndetect: 1,
                    nmatches: 0,
                };
                tables.put_assoc(&source)?;
                created.insert(source.id);
                source.id
            }
        };
        claimed.insert(id);
        detection.assoc_id = Some(id);
        detection.orphaned = false;
        tables.put_detection(&detection)?;
    }

    let summary = AssociationSummary {
        new_sources: created.len(),
        updated_sources: updated.len(),
    };
    info!(
        image = %image.filename,
        new = summary.new_sources,
        updated = summary.updated_sources,
        "association complete"
    );
    Ok(summary)
}
