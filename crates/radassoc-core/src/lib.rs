//! # radassoc-core
//!
//! The multi-epoch association engine for radassoc.
//!
//! Detections extracted from many radio images of overlapping sky are
//! gated for quality, associated into persistent `AssociatedSource`
//! aggregates, cross-matched against reference catalogs, and the sources
//! no catalog contains are tracked per image.
//!
//! ## Components
//!
//! - `quality`: header and extraction checks (`QualityGate`)
//! - `association`: weighted-mean position aggregates
//! - `consistency`: the `ndetect`/`nmatches` counters and cascades
//! - `crossmatch`: de Ruiter matching against loaded catalogs
//! - `uniqueness`: per-image records of unmatched sources
//! - `pipeline`: the per-image stage driver
//!
//! ## Architectural Constraints
//!
//! - Has NO async, NO network dependencies (pure Rust)
//! - Every stage of an image is one atomic transaction over `Tables`
//! - Image reading and source fitting sit behind `HeaderSource` and
//!   `SourceExtractor`

// =============================================================================
// MODULES
// =============================================================================

pub mod association;
pub mod beam;
pub mod catalog;
pub mod config;
pub mod consistency;
pub mod crossmatch;
pub mod ephemeris;
pub mod extract;
pub mod formats;
pub mod ledger;
pub mod pipeline;
pub mod primitives;
pub mod quality;
pub mod session;
pub mod sky;
pub mod storage;
pub mod tables;
pub mod types;
pub mod uniqueness;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AssocId, AssociatedSource, CatalogId, CatalogMatch, CatalogSource, CorrectedFlux, Detection,
    DetectionKey, ErrorCode, Image, ImageHeader, ImageId, Island, IslandKey, Measured,
    RadassocError, RequiredHeader, ResClass, Result, RunRecord, Shape, Stage, StructureCode,
    UniquenessRecord,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use association::{AssociationSummary, associate_image};
pub use catalog::{CatalogEntry, CatalogFormat, CatalogReader, CatalogRegistry, CatalogSet};
pub use config::{
    AssociationParams, BeamParams, CatalogSpec, ExtractionParams, MatchParams, Options,
    PipelineConfig, QaParams, SourceCountModel, Stages,
};
pub use consistency::{PurgeSummary, Violation, ZeroMatchCandidate, audit};
pub use crossmatch::{CatalogRemoval, MatchSummary, match_image, remove_catalogs};
pub use extract::{Extraction, ExtractedSource, HeaderSource, IslandStats, SourceExtractor};
pub use ledger::Ledger;
pub use pipeline::{ImageOutcome, ImageReport, Pipeline, RunSummary};
pub use quality::{HeaderAssessment, QualityGate, Verdict};
pub use session::{Session, StorageBackend};
pub use storage::{RedbStore, TableCounts};
pub use tables::Tables;

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{
    CacheHeader, SrlCatalogExtractor, catalog_from_bytes, catalog_to_bytes, parse_srl,
};
