//! # In-Memory Ledger
//!
//! `Ledger` implements `Tables` with ordered maps. It is the backend of
//! in-memory sessions and of every unit test in the engine.
//!
//! Deterministic: BTreeMap/BTreeSet only, so iteration order (and therefore
//! association tie-breaking) is identical to the redb backend.

use crate::sky::{SkyIndex, angular_separation};
use crate::tables::Tables;
use crate::{
    AssocId, AssociatedSource, CatalogId, CatalogMatch, Detection, DetectionKey, Image, ImageId,
    Island, IslandKey, Result, RunRecord, UniquenessRecord,
};
use std::collections::{BTreeMap, BTreeSet};

/// All tables of an association database, held in memory.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    images: BTreeMap<ImageId, Image>,
    filenames: BTreeMap<String, ImageId>,
    islands: BTreeMap<IslandKey, Island>,
    detections: BTreeMap<DetectionKey, Detection>,
    /// (source, detection) pairs for every linked detection.
    assoc_detections: BTreeSet<(AssocId, DetectionKey)>,
    assocs: BTreeMap<AssocId, AssociatedSource>,
    assoc_index: SkyIndex,
    /// Keyed (assoc, catalog, catalog source).
    matches: BTreeMap<(AssocId, CatalogId, u64), CatalogMatch>,
    /// Keyed (assoc, image).
    uniqueness: BTreeMap<(AssocId, ImageId), UniquenessRecord>,
    runs: BTreeMap<u64, RunRecord>,
    next_image_id: u64,
    next_assoc_id: u64,
    next_run_id: u64,
}

impl Ledger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of image rows.
    #[must_use]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Number of associated sources.
    #[must_use]
    pub fn assoc_count(&self) -> usize {
        self.assocs.len()
    }
}

fn allocate(counter: &mut u64) -> u64 {
    // Ids start at 1.
    *counter += 1;
    *counter
}

impl Tables for Ledger {
    fn next_image_id(&mut self) -> Result<ImageId> {
        Ok(ImageId(allocate(&mut self.next_image_id)))
    }

    fn image(&self, id: ImageId) -> Result<Option<Image>> {
        Ok(self.images.get(&id).cloned())
    }

    fn image_by_filename(&self, filename: &str) -> Result<Option<Image>> {
        Ok(self
            .filenames
            .get(filename)
            .and_then(|id| self.images.get(id))
            .cloned())
    }

    fn images(&self) -> Result<Vec<Image>> {
        Ok(self.images.values().cloned().collect())
    }

    fn put_image(&mut self, image: &Image) -> Result<()> {
        let renamed = self
            .images
            .get(&image.id)
            .map(|old| old.filename.clone())
            .filter(|old| *old != image.filename);
        if let Some(old) = renamed {
            self.filenames.remove(&old);
        }
        self.filenames.insert(image.filename.clone(), image.id);
        self.images.insert(image.id, image.clone());
        Ok(())
    }

    fn delete_image_row(&mut self, id: ImageId) -> Result<bool> {
        match self.images.remove(&id) {
            Some(old) => {
                self.filenames.remove(&old.filename);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn insert_island(&mut self, island: &Island) -> Result<bool> {
        if self.islands.contains_key(&island.key) {
            return Ok(false);
        }
        self.islands.insert(island.key, island.clone());
        Ok(true)
    }

    fn islands_of(&self, image: ImageId) -> Result<Vec<Island>> {
        Ok(self
            .islands
            .range(IslandKey::new(image, 0)..=IslandKey::new(image, u32::MAX))
            .map(|(_, isl)| isl.clone())
            .collect())
    }

    fn delete_islands_of(&mut self, image: ImageId) -> Result<usize> {
        let keys: Vec<IslandKey> = self
            .islands
            .range(IslandKey::new(image, 0)..=IslandKey::new(image, u32::MAX))
            .map(|(k, _)| *k)
            .collect();
        for key in &keys {
            self.islands.remove(key);
        }
        Ok(keys.len())
    }

    fn put_detection(&mut self, detection: &Detection) -> Result<()> {
        if let Some(assoc) = self
            .detections
            .get(&detection.key)
            .and_then(|old| old.assoc_id)
        {
            self.assoc_detections.remove(&(assoc, detection.key));
        }
        if let Some(assoc) = detection.assoc_id {
            self.assoc_detections.insert((assoc, detection.key));
        }
        self.detections.insert(detection.key, detection.clone());
        Ok(())
    }

    fn detection(&self, key: DetectionKey) -> Result<Option<Detection>> {
        Ok(self.detections.get(&key).cloned())
    }

    fn detections_of(&self, image: ImageId) -> Result<Vec<Detection>> {
        Ok(self
            .detections
            .range(DetectionKey::new(image, 0)..=DetectionKey::new(image, u32::MAX))
            .map(|(_, d)| d.clone())
            .collect())
    }

    fn detections_of_assoc(&self, assoc: AssocId) -> Result<Vec<Detection>> {
        let lo = (assoc, DetectionKey::new(ImageId(0), 0));
        let hi = (assoc, DetectionKey::new(ImageId(u64::MAX), u32::MAX));
        Ok(self
            .assoc_detections
            .range(lo..=hi)
            .filter_map(|(_, key)| self.detections.get(key))
            .cloned()
            .collect())
    }

    fn all_detections(&self) -> Result<Vec<Detection>> {
        Ok(self.detections.values().cloned().collect())
    }

    fn delete_detection(&mut self, key: DetectionKey) -> Result<bool> {
        match self.detections.remove(&key) {
            Some(old) => {
                if let Some(assoc) = old.assoc_id {
                    self.assoc_detections.remove(&(assoc, key));
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn next_assoc_id(&mut self) -> Result<AssocId> {
        Ok(AssocId(allocate(&mut self.next_assoc_id)))
    }

    fn assoc(&self, id: AssocId) -> Result<Option<AssociatedSource>> {
        Ok(self.assocs.get(&id).cloned())
    }

    fn put_assoc(&mut self, source: &AssociatedSource) -> Result<()> {
        if let Some(old) = self.assocs.get(&source.id) {
            self.assoc_index.remove(old.ra.value, old.dec.value, old.id.0);
        }
        self.assoc_index
            .insert(source.ra.value, source.dec.value, source.id.0);
        self.assocs.insert(source.id, source.clone());
        Ok(())
    }

    fn delete_assoc(&mut self, id: AssocId) -> Result<bool> {
        match self.assocs.remove(&id) {
            Some(old) => {
                self.assoc_index.remove(old.ra.value, old.dec.value, old.id.0);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn assocs_near(&self, ra: f64, dec: f64, radius: f64) -> Result<Vec<AssociatedSource>> {
        Ok(self
            .assoc_index
            .candidates(ra, dec, radius)
            .into_iter()
            .filter_map(|id| self.assocs.get(&AssocId(id)))
            .filter(|s| angular_separation(ra, dec, s.ra.value, s.dec.value) <= radius)
            .cloned()
            .collect())
    }

    fn all_assocs(&self) -> Result<Vec<AssociatedSource>> {
        Ok(self.assocs.values().cloned().collect())
    }

    fn insert_match(&mut self, m: &CatalogMatch) -> Result<bool> {
        let key = (m.assoc, m.catalog, m.catalog_src);
        if self.matches.contains_key(&key) {
            return Ok(false);
        }
        self.matches.insert(key, *m);
        Ok(true)
    }

    fn matches_of_assoc(&self, assoc: AssocId) -> Result<Vec<CatalogMatch>> {
        Ok(self
            .matches
            .range((assoc, CatalogId(0), 0)..=(assoc, CatalogId(u32::MAX), u64::MAX))
            .map(|(_, m)| *m)
            .collect())
    }

    fn matches_of_catalog(&self, catalog: CatalogId) -> Result<Vec<CatalogMatch>> {
        Ok(self
            .matches
            .values()
            .filter(|m| m.catalog == catalog)
            .copied()
            .collect())
    }

    fn delete_match(
        &mut self,
        catalog: CatalogId,
        catalog_src: u64,
        assoc: AssocId,
    ) -> Result<bool> {
        Ok(self.matches.remove(&(assoc, catalog, catalog_src)).is_some())
    }

    fn all_matches(&self) -> Result<Vec<CatalogMatch>> {
        Ok(self.matches.values().copied().collect())
    }

    fn put_uniqueness(&mut self, record: &UniquenessRecord) -> Result<()> {
        self.uniqueness.insert((record.assoc, record.image), *record);
        Ok(())
    }

    fn uniqueness(&self, image: ImageId, assoc: AssocId) -> Result<Option<UniquenessRecord>> {
        Ok(self.uniqueness.get(&(assoc, image)).copied())
    }

    fn uniqueness_of_assoc(&self, assoc: AssocId) -> Result<Vec<UniquenessRecord>> {
        Ok(self
            .uniqueness
            .range((assoc, ImageId(0))..=(assoc, ImageId(u64::MAX)))
            .map(|(_, r)| *r)
            .collect())
    }

    fn uniqueness_of_image(&self, image: ImageId) -> Result<Vec<UniquenessRecord>> {
        Ok(self
            .uniqueness
            .values()
            .filter(|r| r.image == image)
            .copied()
            .collect())
    }

    fn delete_uniqueness(&mut self, image: ImageId, assoc: AssocId) -> Result<bool> {
        Ok(self.uniqueness.remove(&(assoc, image)).is_some())
    }

    fn all_uniqueness(&self) -> Result<Vec<UniquenessRecord>> {
        Ok(self.uniqueness.values().copied().collect())
    }

    fn next_run_id(&mut self) -> Result<u64> {
        Ok(allocate(&mut self.next_run_id))
    }

    fn put_run(&mut self, run: &RunRecord) -> Result<()> {
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    fn runs(&self) -> Result<Vec<RunRecord>> {
        Ok(self.runs.values().cloned().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
pub(crate) mod tests {
    use super::*;
    use crate::{ImageHeader, Measured, ResClass, Shape, StructureCode};

    /// A detection at (ra, dec) with equal RA/Dec errors, unlinked.
    pub(crate) fn detection(image: ImageId, src_id: u32, ra: f64, dec: f64, err: f64) -> Detection {
        Detection {
            key: DetectionKey::new(image, src_id),
            isl_id: src_id,
            ra: Measured::new(ra, err),
            dec: Measured::new(dec, err),
            ra_max: Measured::new(ra, err),
            dec_max: Measured::new(dec, err),
            total_flux: Measured::new(10.0, 1.0),
            peak_flux: Measured::new(8.0, 0.8),
            shape: Shape::default(),
            deconvolved: Shape::default(),
            code: StructureCode::S,
            assoc_id: None,
            orphaned: false,
            dist_from_center: 0.0,
            corrected: None,
        }
    }

    pub(crate) fn assoc(id: u64, ra: f64, dec: f64) -> AssociatedSource {
        AssociatedSource {
            id: AssocId(id),
            ra: Measured::new(ra, 0.0002),
            dec: Measured::new(dec, 0.0002),
            res_class: ResClass::B,
            ndetect: 1,
            nmatches: 0,
        }
    }

    #[test]
    fn image_filename_index_follows_rows() {
        let mut ledger = Ledger::new();
        let id = ledger.next_image_id().unwrap();
        assert_eq!(id, ImageId(1));
        ledger
            .put_image(&Image::new(id, "a.fits", ImageHeader::default()))
            .unwrap();
        assert_eq!(ledger.image_by_filename("a.fits").unwrap().unwrap().id, id);
        assert!(ledger.delete_image_row(id).unwrap());
        assert!(ledger.image_by_filename("a.fits").unwrap().is_none());
        assert!(!ledger.delete_image_row(id).unwrap());
    }

    #[test]
    fn island_insert_is_idempotent() {
        let mut ledger = Ledger::new();
        let island = Island {
            key: IslandKey::new(ImageId(1), 4),
            total_flux: Measured::new(1.0, 0.1),
            rms: 0.5,
            mean: 0.0,
            resid_rms: 0.4,
            resid_mean: 0.0,
        };
        assert!(ledger.insert_island(&island).unwrap());
        assert!(!ledger.insert_island(&island).unwrap());
        assert_eq!(ledger.islands_of(ImageId(1)).unwrap().len(), 1);
        assert_eq!(ledger.delete_islands_of(ImageId(1)).unwrap(), 1);
        assert!(ledger.islands_of(ImageId(1)).unwrap().is_empty());
    }

    #[test]
    fn detection_assoc_index_tracks_relinks() {
        let mut ledger = Ledger::new();
        let mut det = detection(ImageId(1), 0, 10.0, 0.0, 0.0001);
        det.assoc_id = Some(AssocId(1));
        ledger.put_detection(&det).unwrap();
        assert_eq!(ledger.detections_of_assoc(AssocId(1)).unwrap().len(), 1);

        det.assoc_id = Some(AssocId(2));
        ledger.put_detection(&det).unwrap();
        assert!(ledger.detections_of_assoc(AssocId(1)).unwrap().is_empty());
        assert_eq!(ledger.detections_of_assoc(AssocId(2)).unwrap().len(), 1);

        ledger.delete_detection(det.key).unwrap();
        assert!(ledger.detections_of_assoc(AssocId(2)).unwrap().is_empty());
    }

    #[test]
    fn assocs_near_follows_moves() {
        let mut ledger = Ledger::new();
        let mut src = assoc(1, 100.0, 20.0);
        ledger.put_assoc(&src).unwrap();
        assert_eq!(ledger.assocs_near(100.0, 20.0, 0.01).unwrap().len(), 1);

        src.ra.value = 120.0;
        ledger.put_assoc(&src).unwrap();
        assert!(ledger.assocs_near(100.0, 20.0, 0.01).unwrap().is_empty());
        assert_eq!(ledger.assocs_near(120.0, 20.0, 0.01).unwrap().len(), 1);
    }

    #[test]
    fn match_triple_is_unique() {
        let mut ledger = Ledger::new();
        let m = CatalogMatch {
            catalog: CatalogId(1),
            catalog_src: 7,
            assoc: AssocId(3),
            de_ruiter: 0.4,
        };
        assert!(ledger.insert_match(&m).unwrap());
        assert!(!ledger.insert_match(&m).unwrap());
        assert_eq!(ledger.matches_of_assoc(AssocId(3)).unwrap().len(), 1);
        assert!(ledger.delete_match(CatalogId(1), 7, AssocId(3)).unwrap());
        assert!(ledger.all_matches().unwrap().is_empty());
    }
}
