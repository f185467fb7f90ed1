//! # Fixed Constants
//!
//! Constants compiled into the engine. Tunable thresholds live in `config`;
//! the values here are either physical facts or storage format markers.

/// Radius (deg) of the central region used for the source count check.
pub const CENTRAL_RADIUS_DEG: f64 = 1.5;

/// Height (deg) of one declination zone in the sky index.
pub const ZONE_HEIGHT_DEG: f64 = 0.1;

/// Resolution of the right ascension key in the sky index (units per degree).
pub const RA_KEY_SCALE: f64 = 1_000_000.0;

/// Systematic flux uncertainty added in quadrature after beam correction.
pub const FLUX_SYSTEMATIC_FRACTION: f64 = 0.2;

/// Arcseconds per degree.
pub const ARCSEC_PER_DEG: f64 = 3600.0;

/// Julian date of the modified Julian date epoch.
pub const MJD_OFFSET: f64 = 2_400_000.5;

/// Julian date of J2000.0.
pub const J2000_JD: f64 = 2_451_545.0;

/// Magic bytes for the catalog cache header.
pub const CACHE_MAGIC: &[u8; 4] = b"RCAT";

/// Current catalog cache format version.
///
/// Increment this when making breaking changes to `CatalogSource`.
pub const CACHE_FORMAT_VERSION: u8 = 1;

/// Maximum accepted catalog cache payload.
pub const MAX_CACHE_PAYLOAD_SIZE: usize = 1024 * 1024 * 1024;

/// Number of header lines in an extractor source list.
pub const SRL_HEADER_LINES: usize = 6;
