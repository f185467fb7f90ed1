//! # Uniqueness Registry
//!
//! Records, per catalog-matched image, the sources this survey detects that
//! no reference catalog contains. A record exists only while its source has
//! `nmatches == 0`; `consistency::record_match` removes them on the first
//! match.

use crate::consistency::{ZeroMatchCandidate, detected_in};
use crate::tables::Tables;
use crate::{AssocId, Image, ImageId, Result, Stage, UniquenessRecord};
use std::collections::BTreeSet;
use tracing::debug;

/// Insert a `detected` record, or set the flag on an existing one.
///
/// Returns false when an identical record was already present.
pub fn upsert(tables: &mut dyn Tables, image: ImageId, assoc: AssocId) -> Result<bool> {
    if tables
        .uniqueness(image, assoc)?
        .is_some_and(|r| r.detected)
    {
        return Ok(false);
    }
    tables.put_uniqueness(&UniquenessRecord {
        image,
        assoc,
        detected: true,
    })?;
    Ok(true)
}

fn is_matched_image(tables: &dyn Tables, id: ImageId, current: &Image) -> Result<bool> {
    if id == current.id {
        return Ok(current.stage == Stage::Matched);
    }
    Ok(tables.image(id)?.is_some_and(|i| i.stage == Stage::Matched))
}

/// Refresh the registry after matching `image`.
///
/// For every unmatched source detected in the image, a record is upserted
/// for each catalog-matched image in which the source is detected. Returns
/// the number of records written.
pub fn refresh_image(tables: &mut dyn Tables, image: &Image) -> Result<usize> {
    let sources: BTreeSet<AssocId> = tables
        .detections_of(image.id)?
        .into_iter()
        .filter_map(|d| d.assoc_id)
        .collect();
    let mut written = 0;
    for id in sources {
        let unmatched = tables.assoc(id)?.is_some_and(|s| s.nmatches == 0);
        if !unmatched {
            continue;
        }
        for seen_in in detected_in(tables, id)? {
            if is_matched_image(tables, seen_in, image)? && upsert(tables, seen_in, id)? {
                written += 1;
            }
        }
    }
    debug!(image = %image.filename, written, "uniqueness refreshed");
    Ok(written)
}

/// Create records for sources that dropped to zero matches.
///
/// Only catalog-matched images receive records. Returns the number written.
pub fn materialize(tables: &mut dyn Tables, candidates: &[ZeroMatchCandidate]) -> Result<usize> {
    let mut written = 0;
    for candidate in candidates {
        let still_unmatched = tables
            .assoc(candidate.assoc)?
            .is_some_and(|s| s.nmatches == 0);
        if !still_unmatched {
            continue;
        }
        for image in &candidate.images {
            let matched = tables
                .image(*image)?
                .is_some_and(|i| i.stage == Stage::Matched);
            if matched && upsert(tables, *image, candidate.assoc)? {
                written += 1;
            }
        }
    }
    Ok(written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::ledger::tests::{assoc, detection};
    use crate::ImageHeader;

    fn matched_image(ledger: &mut Ledger, id: u64) -> Image {
        let mut image = Image::new(ImageId(id), format!("m{}.fits", id), ImageHeader::default());
        image.stage = Stage::Matched;
        ledger.put_image(&image).unwrap();
        image
    }

    #[test]
    fn upsert_updates_flag_without_duplicates() {
        let mut ledger = Ledger::new();
        ledger
            .put_uniqueness(&UniquenessRecord {
                image: ImageId(1),
                assoc: AssocId(1),
                detected: false,
            })
            .unwrap();
        assert!(upsert(&mut ledger, ImageId(1), AssocId(1)).unwrap());
        assert!(!upsert(&mut ledger, ImageId(1), AssocId(1)).unwrap());
        let all = ledger.all_uniqueness().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].detected);
    }

    #[test]
    fn refresh_covers_every_matched_image() {
        let mut ledger = Ledger::new();
        let a = matched_image(&mut ledger, 1);
        let b = matched_image(&mut ledger, 2);
        let mut c = Image::new(ImageId(3), "c.fits", ImageHeader::default());
        c.stage = Stage::Associated;
        ledger.put_image(&c).unwrap();

        let mut src = assoc(1, 10.0, 10.0);
        src.ndetect = 3;
        ledger.put_assoc(&src).unwrap();
        for image in [a.id, b.id, c.id] {
            let mut det = detection(image, 0, 10.0, 10.0, 0.0002);
            det.assoc_id = Some(AssocId(1));
            ledger.put_detection(&det).unwrap();
        }

        assert_eq!(refresh_image(&mut ledger, &b).unwrap(), 2);
        let images: Vec<ImageId> = ledger
            .uniqueness_of_assoc(AssocId(1))
            .unwrap()
            .iter()
            .map(|r| r.image)
            .collect();
        assert_eq!(images, vec![ImageId(1), ImageId(2)]);
        assert_eq!(refresh_image(&mut ledger, &a).unwrap(), 0);
    }

    #[test]
    fn matched_sources_get_no_records() {
        let mut ledger = Ledger::new();
        let a = matched_image(&mut ledger, 1);
        let mut src = assoc(1, 10.0, 10.0);
        src.nmatches = 1;
        ledger.put_assoc(&src).unwrap();
        let mut det = detection(a.id, 0, 10.0, 10.0, 0.0002);
        det.assoc_id = Some(AssocId(1));
        ledger.put_detection(&det).unwrap();
        assert_eq!(refresh_image(&mut ledger, &a).unwrap(), 0);

        let candidates = vec![ZeroMatchCandidate {
            assoc: AssocId(1),
            images: vec![a.id],
        }];
        assert_eq!(materialize(&mut ledger, &candidates).unwrap(), 0);
        src.nmatches = 0;
        ledger.put_assoc(&src).unwrap();
        assert_eq!(materialize(&mut ledger, &candidates).unwrap(), 1);
    }
}
