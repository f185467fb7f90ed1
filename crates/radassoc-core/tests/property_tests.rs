//! # Property-Based Tests
//!
//! Aggregate and counter invariants under random detection layouts and
//! random sequences of removals.

use proptest::collection::vec;
use proptest::prelude::*;
use radassoc_core::association::{merge_axis, unmerge_axis};
use radassoc_core::consistency::{record_match, remove_detection};
use radassoc_core::{
    AssociationParams, CatalogFormat, CatalogId, CatalogMatch, CatalogRegistry, CatalogSet,
    CatalogSource, CatalogSpec, Detection, DetectionKey, Image, ImageHeader, ImageId, Ledger,
    MatchParams, Measured, Shape, Stage, StructureCode, Tables, associate_image, audit,
    match_image,
};
use std::path::PathBuf;

// =============================================================================
// HELPERS
// =============================================================================

fn image(id: u64) -> Image {
    let header = ImageHeader {
        bmaj: Some(20.0),
        ..ImageHeader::default()
    };
    let mut image = Image::new(ImageId(id), format!("epoch_{}.fits", id), header);
    image.stage = Stage::Extracted;
    image
}

fn detection(image: ImageId, src_id: u32, ra: f64, dec: f64, err: f64) -> Detection {
    let m = |v| Measured::new(v, err);
    Detection {
        key: DetectionKey::new(image, src_id),
        isl_id: src_id,
        ra: m(ra),
        dec: m(dec),
        ra_max: m(ra),
        dec_max: m(dec),
        total_flux: Measured::new(10.0, 1.0),
        peak_flux: Measured::new(8.0, 1.0),
        shape: Shape::default(),
        deconvolved: Shape::default(),
        code: StructureCode::S,
        assoc_id: None,
        orphaned: false,
        dist_from_center: 0.0,
        corrected: None,
    }
}

/// Offsets (deg) of each detection from a small grid of true positions.
type Epoch = Vec<(u8, f64, f64)>;

fn epoch_strategy() -> impl Strategy<Value = Epoch> {
    vec((0u8..8, -3e-4f64..3e-4, -3e-4f64..3e-4), 1..8)
}

/// Build a ledger with one associated image per epoch.
fn associated_ledger(epochs: &[Epoch]) -> Ledger {
    let mut ledger = Ledger::new();
    for (i, epoch) in epochs.iter().enumerate() {
        let img = image(i as u64 + 1);
        ledger.put_image(&img).expect("image");
        for (src, (slot, dra, ddec)) in epoch.iter().enumerate() {
            let ra = 359.99 + f64::from(*slot) * 0.01 + dra;
            let ra = if ra >= 360.0 { ra - 360.0 } else { ra };
            let dec = 45.0 + ddec;
            ledger
                .put_detection(&detection(img.id, src as u32, ra, dec, 2e-4))
                .expect("detection");
        }
        associate_image(&mut ledger, &img, &AssociationParams::default()).expect("associate");
    }
    ledger
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Removing a detection from an aggregate undoes adding it.
    #[test]
    fn merge_then_unmerge_round_trips(
        agg in 0.0f64..360.0,
        agg_err in 1e-5f64..1e-3,
        delta in -1e-3f64..1e-3,
        det_err in 1e-5f64..1e-3,
    ) {
        let aggregate = Measured::new(agg, agg_err);
        let det = Measured::new(agg + delta, det_err);
        let merged = merge_axis(aggregate, det);
        let restored = unmerge_axis(merged, det).expect("unmerge");
        prop_assert!((restored.value - aggregate.value).abs() < 1e-6);
        prop_assert!((restored.error - aggregate.error).abs() / aggregate.error < 1e-6);
    }

    /// Counters and links stay consistent after association and removals.
    #[test]
    fn audit_clean_after_association_and_removals(
        epochs in vec(epoch_strategy(), 1..5),
        removals in vec((0usize..5, 0u32..8), 0..10),
    ) {
        let mut ledger = associated_ledger(&epochs);
        prop_assert!(audit(&ledger).expect("audit").is_empty());

        for (epoch, src) in removals {
            let key = DetectionKey::new(ImageId(epoch as u64 + 1), src);
            remove_detection(&mut ledger, key).expect("remove");
            let violations = audit(&ledger).expect("audit");
            prop_assert!(violations.is_empty(), "{:?}", violations);
        }

        let detections = ledger.all_detections().expect("detections").len() as u32;
        let ndetect: u32 = ledger.all_assocs().expect("assocs").iter().map(|s| s.ndetect).sum();
        prop_assert_eq!(ndetect, detections);
    }

    /// A match triple is recorded once, however often it is offered.
    #[test]
    fn duplicate_match_triples_rejected(repeats in 1usize..5, src in 1u64..100) {
        let mut ledger = associated_ledger(&[vec![(0, 0.0, 0.0)]]);
        let assoc = ledger.all_assocs().expect("assocs")[0].id;
        let m = CatalogMatch {
            catalog: CatalogId(1),
            catalog_src: src,
            assoc,
            de_ruiter: 0.5,
        };
        let mut accepted = 0;
        for _ in 0..repeats {
            if record_match(&mut ledger, &m).expect("match") {
                accepted += 1;
            }
        }
        prop_assert_eq!(accepted, 1);
        prop_assert_eq!(ledger.assoc(assoc).expect("read").expect("source").nmatches, 1);
    }

    /// Matching again with unchanged catalogs and no redo writes nothing.
    #[test]
    fn rematch_is_idempotent(epochs in vec(epoch_strategy(), 1..4)) {
        let mut ledger = associated_ledger(&epochs);
        let specs = vec![CatalogSpec {
            name: "grid".to_string(),
            path: PathBuf::from("grid.txt"),
            format: CatalogFormat::default(),
        }];
        let registry = CatalogRegistry::from_specs(&specs).expect("registry");
        let mut catalogs = CatalogSet::new();
        let sources = (0u8..8)
            .step_by(2)
            .map(|slot| CatalogSource {
                catalog: CatalogId(1),
                id: u64::from(slot) + 1,
                name: None,
                ra: Measured::new((359.99 + f64::from(slot) * 0.01) % 360.0, 3e-4),
                dec: Measured::new(45.0, 3e-4),
                total_flux: None,
                peak_flux: None,
                maj: None,
                min: None,
                pa: None,
                rms: None,
                field: None,
            })
            .collect();
        catalogs.insert(CatalogId(1), sources);

        let params = MatchParams::default();
        for mut img in ledger.images().expect("images") {
            match_image(&mut ledger, &mut img, &registry, &catalogs, &params, false)
                .expect("match");
        }
        let violations = audit(&ledger).expect("audit");
        prop_assert!(violations.is_empty(), "{:?}", violations);

        let before = ledger.clone();
        for mut img in ledger.images().expect("images") {
            let summary = match_image(&mut ledger, &mut img, &registry, &catalogs, &params, false)
                .expect("rematch");
            prop_assert_eq!(summary.new_matches, 0);
            prop_assert!(summary.catalogs_checked.is_empty());
        }
        prop_assert_eq!(ledger.all_matches().expect("m"), before.all_matches().expect("m"));
        prop_assert_eq!(
            ledger.all_uniqueness().expect("u"),
            before.all_uniqueness().expect("u")
        );
    }
}
