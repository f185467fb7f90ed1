//! # Formats Module
//!
//! File formats read or written by the engine:
//! - `cache`: binary cache of parsed reference catalogs
//! - `srl`: extractor source lists

pub mod cache;
pub mod srl;

pub use cache::{CacheHeader, catalog_from_bytes, catalog_to_bytes};
pub use srl::{SrlCatalogExtractor, parse_srl};
