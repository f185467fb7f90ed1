//! # Tables Contract
//!
//! The data-access contract every engine component is written against.
//!
//! Two implementations exist: the in-memory `Ledger` and the redb-backed
//! `RedbTables`. A `Tables` value always lives inside one transaction opened
//! by the `Session`; nothing here commits.
//!
//! Implementations maintain their secondary indexes (filename, detections
//! per source, source positions, matches per catalog, uniqueness per image)
//! on every `insert_*`, `put_*` and `delete_*`, so callers never touch an
//! index directly.

use crate::{
    AssocId, AssociatedSource, CatalogId, CatalogMatch, Detection, DetectionKey, Image, ImageId,
    Island, Result, RunRecord, UniquenessRecord,
};

/// Row-level access to every table of the association database.
pub trait Tables {
    // -------------------------------------------------------------------------
    // Images
    // -------------------------------------------------------------------------

    /// Allocate the next image id.
    fn next_image_id(&mut self) -> Result<ImageId>;

    fn image(&self, id: ImageId) -> Result<Option<Image>>;

    fn image_by_filename(&self, filename: &str) -> Result<Option<Image>>;

    /// All images, ascending by id.
    fn images(&self) -> Result<Vec<Image>>;

    /// Insert or replace an image row.
    fn put_image(&mut self, image: &Image) -> Result<()>;

    /// Delete the image row only. Downstream rows are the caller's business.
    fn delete_image_row(&mut self, id: ImageId) -> Result<bool>;

    // -------------------------------------------------------------------------
    // Islands
    // -------------------------------------------------------------------------

    /// Insert an island. Returns false (and changes nothing) if the key exists.
    fn insert_island(&mut self, island: &Island) -> Result<bool>;

    fn islands_of(&self, image: ImageId) -> Result<Vec<Island>>;

    /// Delete every island of an image, returning how many were removed.
    fn delete_islands_of(&mut self, image: ImageId) -> Result<usize>;

    // -------------------------------------------------------------------------
    // Detections
    // -------------------------------------------------------------------------

    /// Insert or replace a detection.
    fn put_detection(&mut self, detection: &Detection) -> Result<()>;

    fn detection(&self, key: DetectionKey) -> Result<Option<Detection>>;

    /// Detections of an image, ascending by source id.
    fn detections_of(&self, image: ImageId) -> Result<Vec<Detection>>;

    /// Detections currently referencing a source.
    fn detections_of_assoc(&self, assoc: AssocId) -> Result<Vec<Detection>>;

    fn all_detections(&self) -> Result<Vec<Detection>>;

    fn delete_detection(&mut self, key: DetectionKey) -> Result<bool>;

    // -------------------------------------------------------------------------
    // Associated sources
    // -------------------------------------------------------------------------

    /// Allocate the next associated source id.
    fn next_assoc_id(&mut self) -> Result<AssocId>;

    fn assoc(&self, id: AssocId) -> Result<Option<AssociatedSource>>;

    /// Insert or replace a source; the position index follows the new position.
    fn put_assoc(&mut self, source: &AssociatedSource) -> Result<()>;

    fn delete_assoc(&mut self, id: AssocId) -> Result<bool>;

    /// Sources within `radius` degrees of (ra, dec), ascending by id.
    fn assocs_near(&self, ra: f64, dec: f64, radius: f64) -> Result<Vec<AssociatedSource>>;

    fn all_assocs(&self) -> Result<Vec<AssociatedSource>>;

    // -------------------------------------------------------------------------
    // Catalog matches
    // -------------------------------------------------------------------------

    /// Insert a match. Returns false if the (catalog, source, assoc) triple exists.
    fn insert_match(&mut self, m: &CatalogMatch) -> Result<bool>;

    fn matches_of_assoc(&self, assoc: AssocId) -> Result<Vec<CatalogMatch>>;

    fn matches_of_catalog(&self, catalog: CatalogId) -> Result<Vec<CatalogMatch>>;

    fn delete_match(&mut self, catalog: CatalogId, catalog_src: u64, assoc: AssocId)
    -> Result<bool>;

    fn all_matches(&self) -> Result<Vec<CatalogMatch>>;

    // -------------------------------------------------------------------------
    // Uniqueness registry
    // -------------------------------------------------------------------------

    /// Insert or update a uniqueness record.
    fn put_uniqueness(&mut self, record: &UniquenessRecord) -> Result<()>;

    fn uniqueness(&self, image: ImageId, assoc: AssocId) -> Result<Option<UniquenessRecord>>;

    fn uniqueness_of_assoc(&self, assoc: AssocId) -> Result<Vec<UniquenessRecord>>;

    fn uniqueness_of_image(&self, image: ImageId) -> Result<Vec<UniquenessRecord>>;

    fn delete_uniqueness(&mut self, image: ImageId, assoc: AssocId) -> Result<bool>;

    fn all_uniqueness(&self) -> Result<Vec<UniquenessRecord>>;

    // -------------------------------------------------------------------------
    // Runs
    // -------------------------------------------------------------------------

    fn next_run_id(&mut self) -> Result<u64>;

    fn put_run(&mut self, run: &RunRecord) -> Result<()>;

    fn runs(&self) -> Result<Vec<RunRecord>>;
}
