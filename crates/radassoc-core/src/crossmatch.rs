//! # Catalog Cross-Matcher
//!
//! Matches the associated sources of an image against every reference
//! catalog the image has not been checked against yet.
//!
//! For each source and catalog the cone of `search_radius_arcsec` is
//! searched and the candidate with the smallest de Ruiter radius is kept if
//! it is below `de_ruiter_max`. Processed catalog names are added to the
//! image's `catalogs_checked`, so adding a catalog later only costs a match
//! against that catalog.

use crate::catalog::{CatalogRegistry, CatalogSet};
use crate::config::MatchParams;
use crate::consistency::{ZeroMatchCandidate, drop_match, record_match, remove_catalog_matches};
use crate::primitives::ARCSEC_PER_DEG;
use crate::sky::de_ruiter_radius;
use crate::tables::Tables;
use crate::uniqueness::refresh_image;
use crate::{
    AssocId, AssociatedSource, CatalogId, CatalogMatch, CatalogSource, Image, RadassocError,
    Result, Stage,
};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// What `match_image` did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchSummary {
    /// Catalogs newly added to the image's `catalogs_checked`.
    pub catalogs_checked: Vec<String>,
    pub new_matches: usize,
    pub uniqueness_written: usize,
}

/// Closest catalog source by de Ruiter radius.
///
/// `candidates` are ascending by id, so ties keep the lowest id.
fn best_match<'a>(
    source: &AssociatedSource,
    candidates: &[&'a CatalogSource],
) -> Option<(&'a CatalogSource, f64)> {
    let mut best: Option<(&CatalogSource, f64)> = None;
    for &candidate in candidates {
        let r = de_ruiter_radius(source.ra, source.dec, candidate.ra, candidate.dec);
        let better = match best {
            None => r.is_finite(),
            Some((_, br)) => r < br,
        };
        if better {
            best = Some((candidate, r));
        }
    }
    best
}

fn image_sources(tables: &dyn Tables, image: &Image) -> Result<Vec<AssociatedSource>> {
    let ids: BTreeSet<AssocId> = tables
        .detections_of(image.id)?
        .into_iter()
        .filter_map(|d| d.assoc_id)
        .collect();
    let mut sources = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(source) = tables.assoc(id)? {
            sources.push(source);
        }
    }
    Ok(sources)
}

/// Delete every match and uniqueness record of the image's sources and
/// clear its `catalogs_checked`.
pub fn reset_image_matches(tables: &mut dyn Tables, image: &mut Image) -> Result<usize> {
    let mut removed = 0;
    for source in image_sources(tables, image)? {
        for m in tables.matches_of_assoc(source.id)? {
            drop_match(tables, &m)?;
            removed += 1;
        }
        for record in tables.uniqueness_of_assoc(source.id)? {
            tables.delete_uniqueness(record.image, record.assoc)?;
        }
    }
    image.catalogs_checked.clear();
    debug!(image = %image.filename, removed, "matches reset");
    Ok(removed)
}

/// Cross-match the sources of `image` and mark it catalog-matched.
///
/// With `redo`, existing matches of the image's sources are discarded and
/// every catalog is matched again. The image row is written back.
pub fn match_image(
    tables: &mut dyn Tables,
    image: &mut Image,
    registry: &CatalogRegistry,
    catalogs: &CatalogSet,
    params: &MatchParams,
    redo: bool,
) -> Result<MatchSummary> {
    if redo {
        reset_image_matches(tables, image)?;
    }

    let pending: Vec<(CatalogId, String)> = registry
        .entries()
        .filter(|e| !image.catalogs_checked.contains(&e.name))
        .map(|e| (e.id, e.name.clone()))
        .collect();
    for (id, name) in &pending {
        if !catalogs.contains(*id) {
            return Err(RadassocError::UnknownCatalog(name.clone()));
        }
    }

    let radius = params.search_radius_arcsec / ARCSEC_PER_DEG;
    let sources = image_sources(tables, image)?;
    let mut summary = MatchSummary::default();

    for (catalog, name) in &pending {
        let mut found = 0;
        for source in &sources {
            let already = tables
                .matches_of_assoc(source.id)?
                .iter()
                .any(|m| m.catalog == *catalog);
            if already {
                continue;
            }
            let candidates = catalogs.cone(*catalog, source.ra.value, source.dec.value, radius);
            let Some((best, r)) = best_match(source, &candidates) else {
                continue;
            };
            if r >= params.de_ruiter_max {
                continue;
            }
            let m = CatalogMatch {
                catalog: *catalog,
                catalog_src: best.id,
                assoc: source.id,
                de_ruiter: r,
            };
            if record_match(tables, &m)? {
                found += 1;
            }
        }
        debug!(image = %image.filename, catalog = %name, matches = found, "catalog checked");
        summary.new_matches += found;
        image.catalogs_checked.insert(name.clone());
        summary.catalogs_checked.push(name.clone());
    }

    image.stage = Stage::Matched;
    tables.put_image(image)?;
    summary.uniqueness_written = refresh_image(tables, image)?;

    info!(
        image = %image.filename,
        catalogs = summary.catalogs_checked.len(),
        new_matches = summary.new_matches,
        "catalog matching complete"
    );
    Ok(summary)
}

/// Result of `remove_catalogs`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CatalogRemoval {
    pub catalogs: Vec<String>,
    pub matches_removed: usize,
    /// Sources left without any match.
    pub candidates: Vec<ZeroMatchCandidate>,
    /// Images whose `catalogs_checked` changed.
    pub images_updated: usize,
}

/// Remove every match against the named catalogs.
///
/// All names are resolved before anything is written; one unknown name
/// fails the whole request.
pub fn remove_catalogs(
    tables: &mut dyn Tables,
    registry: &CatalogRegistry,
    names: &[String],
) -> Result<CatalogRemoval> {
    let entries = registry.resolve(names)?;
    let mut removal = CatalogRemoval::default();

    for entry in &entries {
        let before = tables.matches_of_catalog(entry.id)?.len();
        removal.matches_removed += before;
        removal
            .candidates
            .extend(remove_catalog_matches(tables, entry.id)?);
        removal.catalogs.push(entry.name.clone());
    }

    for mut image in tables.images()? {
        let mut changed = false;
        for entry in &entries {
            changed |= image.catalogs_checked.remove(&entry.name);
        }
        if changed {
            tables.put_image(&image)?;
            removal.images_updated += 1;
        }
    }

    info!(
        catalogs = ?removal.catalogs,
        matches = removal.matches_removed,
        candidates = removal.candidates.len(),
        "catalogs removed"
    );
    Ok(removal)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::catalog::CatalogFormat;
    use crate::config::CatalogSpec;
    use crate::consistency::audit;
    use crate::ledger::Ledger;
    use crate::ledger::tests::{assoc, detection};
    use crate::uniqueness::materialize;
    use crate::{ImageHeader, ImageId, Measured};
    use std::path::PathBuf;

    fn registry(names: &[&str]) -> CatalogRegistry {
        let specs: Vec<CatalogSpec> = names
            .iter()
            .map(|n| CatalogSpec {
                name: (*n).to_string(),
                path: PathBuf::from(format!("{}.txt", n)),
                format: CatalogFormat::default(),
            })
            .collect();
        CatalogRegistry::from_specs(&specs).unwrap()
    }

    fn cat_source(id: u64, ra: f64, dec: f64) -> CatalogSource {
        CatalogSource {
            catalog: CatalogId(0),
            id,
            name: None,
            ra: Measured::new(ra, 0.0003),
            dec: Measured::new(dec, 0.0003),
            total_flux: None,
            peak_flux: None,
            maj: None,
            min: None,
            pa: None,
            rms: None,
            field: None,
        }
    }

    /// One image holding two sources: #1 at (150, 2), #2 at (151, 2).
    fn setup() -> (Ledger, Image) {
        let mut ledger = Ledger::new();
        let mut image = Image::new(ImageId(1), "a.fits", ImageHeader::default());
        image.stage = Stage::Associated;
        ledger.put_image(&image).unwrap();
        for (i, ra) in [(1u64, 150.0), (2, 151.0)] {
            ledger.put_assoc(&assoc(i, ra, 2.0)).unwrap();
            let mut det = detection(image.id, i as u32, ra, 2.0, 0.0002);
            det.assoc_id = Some(AssocId(i));
            ledger.put_detection(&det).unwrap();
        }
        (ledger, image)
    }

    fn catalogs() -> CatalogSet {
        let mut set = CatalogSet::new();
        set.insert(
            CatalogId(1),
            vec![
                cat_source(1, 150.0002, 2.0),
                cat_source(2, 150.0001, 2.0),
                cat_source(3, 160.0, 2.0),
            ],
        );
        set.insert(CatalogId(2), vec![cat_source(1, 150.0, 2.0001)]);
        set
    }

    #[test]
    fn picks_minimum_de_ruiter() {
        let (mut ledger, mut image) = setup();
        let reg = registry(&["nvss", "first"]);
        let summary = match_image(
            &mut ledger,
            &mut image,
            &reg,
            &catalogs(),
            &MatchParams::default(),
            false,
        )
        .unwrap();
        assert_eq!(summary.catalogs_checked, vec!["nvss", "first"]);
        assert_eq!(summary.new_matches, 2);
        let matches = ledger.matches_of_assoc(AssocId(1)).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].catalog_src, 2);
        assert_eq!(ledger.assoc(AssocId(1)).unwrap().unwrap().nmatches, 2);

        // Source 2 has no counterpart and is survey-unique.
        assert_eq!(summary.uniqueness_written, 1);
        assert_eq!(ledger.uniqueness_of_assoc(AssocId(2)).unwrap().len(), 1);
        assert_eq!(image.stage, Stage::Matched);
        assert!(audit(&ledger).unwrap().is_empty());
    }

    #[test]
    fn rematch_is_noop_and_redo_rebuilds() {
        let (mut ledger, mut image) = setup();
        let reg = registry(&["nvss", "first"]);
        let cats = catalogs();
        let params = MatchParams::default();
        match_image(&mut ledger, &mut image, &reg, &cats, &params, false).unwrap();
        let checked = image.catalogs_checked.clone();

        let again = match_image(&mut ledger, &mut image, &reg, &cats, &params, false).unwrap();
        assert!(again.catalogs_checked.is_empty());
        assert_eq!(again.new_matches, 0);
        assert_eq!(image.catalogs_checked, checked);
        assert_eq!(ledger.all_matches().unwrap().len(), 2);

        let redo = match_image(&mut ledger, &mut image, &reg, &cats, &params, true).unwrap();
        assert_eq!(redo.new_matches, 2);
        assert_eq!(ledger.all_matches().unwrap().len(), 2);
        assert!(audit(&ledger).unwrap().is_empty());
    }

    #[test]
    fn new_catalog_matched_incrementally() {
        let (mut ledger, mut image) = setup();
        let cats = catalogs();
        let params = MatchParams::default();
        match_image(&mut ledger, &mut image, &registry(&["nvss"]), &cats, &params, false)
            .unwrap();
        let summary = match_image(
            &mut ledger,
            &mut image,
            &registry(&["nvss", "first"]),
            &cats,
            &params,
            false,
        )
        .unwrap();
        assert_eq!(summary.catalogs_checked, vec!["first"]);
        assert_eq!(summary.new_matches, 1);
    }

    #[test]
    fn unloaded_catalog_is_an_error() {
        let (mut ledger, mut image) = setup();
        let result = match_image(
            &mut ledger,
            &mut image,
            &registry(&["nvss", "first", "sumss"]),
            &catalogs(),
            &MatchParams::default(),
            false,
        );
        assert_eq!(
            result.unwrap_err(),
            RadassocError::UnknownCatalog("sumss".to_string())
        );
        assert!(ledger.all_matches().unwrap().is_empty());
    }

    #[test]
    fn remove_catalogs_is_all_or_nothing() {
        let (mut ledger, mut image) = setup();
        let reg = registry(&["nvss", "first"]);
        match_image(&mut ledger, &mut image, &reg, &catalogs(), &MatchParams::default(), false)
            .unwrap();

        let bad = remove_catalogs(&mut ledger, &reg, &["nvss".to_string(), "wenss".to_string()]);
        assert_eq!(bad.unwrap_err(), RadassocError::UnknownCatalog("wenss".to_string()));
        assert_eq!(ledger.all_matches().unwrap().len(), 2);

        let removal =
            remove_catalogs(&mut ledger, &reg, &["NVSS".to_string(), "first".to_string()])
                .unwrap();
        assert_eq!(removal.matches_removed, 2);
        assert_eq!(removal.images_updated, 1);
        assert_eq!(removal.candidates.len(), 1);
        assert!(ledger.image(image.id).unwrap().unwrap().catalogs_checked.is_empty());

        assert_eq!(materialize(&mut ledger, &removal.candidates).unwrap(), 1);
        assert!(audit(&ledger).unwrap().is_empty());
    }
}
