//! # Core Type Definitions
//!
//! This module contains the record types shared by every radassoc component:
//! - Identifiers (`ImageId`, `AssocId`, `CatalogId`, `DetectionKey`, `IslandKey`)
//! - Image records (`Image`, `ImageHeader`, `RequiredHeader`)
//! - Per-image extraction products (`Island`, `Detection`)
//! - Persistent sky identities (`AssociatedSource`, `CatalogMatch`, `UniquenessRecord`)
//! - Reference catalog entries (`CatalogSource`)
//! - Status enums (`Stage`, `ErrorCode`, `ResClass`, `StructureCode`)
//! - Error types (`RadassocError`)
//!
//! ## Units
//!
//! Positions and positional uncertainties are degrees. Fluxes are mJy
//! (mJy/beam for peak quantities). Shape axes are arcseconds and position
//! angles are degrees.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Row identifier of a processed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageId(pub u64);

/// Identifier of a persistent associated source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssocId(pub u64);

/// Identifier of a reference catalog, assigned by the `CatalogRegistry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CatalogId(pub u32);

/// Key of a detection: extractor source id within one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DetectionKey {
    pub image: ImageId,
    pub src_id: u32,
}

impl DetectionKey {
    #[must_use]
    pub const fn new(image: ImageId, src_id: u32) -> Self {
        Self { image, src_id }
    }
}

/// Key of an island: extractor island id within one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IslandKey {
    pub image: ImageId,
    pub isl_id: u32,
}

impl IslandKey {
    #[must_use]
    pub const fn new(image: ImageId, isl_id: u32) -> Self {
        Self { image, isl_id }
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image {}", self.0)
    }
}

impl fmt::Display for AssocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "assoc {}", self.0)
    }
}

// =============================================================================
// MEASUREMENTS
// =============================================================================

/// A measured quantity and its one-sigma uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Measured {
    pub value: f64,
    pub error: f64,
}

impl Measured {
    #[must_use]
    pub const fn new(value: f64, error: f64) -> Self {
        Self { value, error }
    }

    /// Inverse variance, the statistical weight of this measurement.
    #[must_use]
    pub fn weight(&self) -> f64 {
        1.0 / (self.error * self.error)
    }
}

/// Fitted elliptical Gaussian shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Shape {
    /// Major axis FWHM (arcsec).
    pub maj: Measured,
    /// Minor axis FWHM (arcsec).
    pub min: Measured,
    /// Position angle (deg).
    pub pa: Measured,
}

// =============================================================================
// STATUS ENUMS
// =============================================================================

/// Highest pipeline step completed for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Header read and image row created.
    Read = 1,
    /// Source extraction results recorded.
    Extracted = 2,
    /// Detections associated with persistent sources.
    Associated = 3,
    /// Associated sources cross-matched with reference catalogs.
    Matched = 4,
}

impl Stage {
    #[must_use]
    pub const fn number(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Extracted => "extracted",
            Self::Associated => "associated",
            Self::Matched => "matched",
        };
        write!(f, "{} ({})", self.number(), name)
    }
}

/// Quality classification attached to an image.
///
/// Every code except `BrightSourceInField` stops the image for the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    MissingMetadata = 1,
    LowVisibilityCount = 2,
    BadSensitivityMetric = 3,
    ExcessiveEllipticity = 4,
    DisallowedTarget = 5,
    BrightSourceInField = 6,
    NoSourcesDetected = 7,
    AnomalousSourceCount = 8,
}

impl ErrorCode {
    pub const ALL: [Self; 8] = [
        Self::MissingMetadata,
        Self::LowVisibilityCount,
        Self::BadSensitivityMetric,
        Self::ExcessiveEllipticity,
        Self::DisallowedTarget,
        Self::BrightSourceInField,
        Self::NoSourcesDetected,
        Self::AnomalousSourceCount,
    ];

    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Warnings are recorded but do not stop processing.
    #[must_use]
    pub const fn is_warning(self) -> bool {
        matches!(self, Self::BrightSourceInField)
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::MissingMetadata => "missing required header metadata",
            Self::LowVisibilityCount => "visibility count below minimum",
            Self::BadSensitivityMetric => "sensitivity metric out of range",
            Self::ExcessiveEllipticity => "beam axis ratio too large",
            Self::DisallowedTarget => "pointing at the NCP or a planet",
            Self::BrightSourceInField => "bright radio source in field of view",
            Self::NoSourcesDetected => "no sources detected",
            Self::AnomalousSourceCount => "source count far above expectation",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}

/// Spatial resolution class of an image beam and of the sources built from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResClass {
    A,
    B,
    C,
    D,
}

impl ResClass {
    /// Classify a beam by its major axis (arcsec).
    #[must_use]
    pub fn from_beam(bmaj_arcsec: f64) -> Self {
        if bmaj_arcsec <= 15.0 {
            Self::A
        } else if bmaj_arcsec <= 35.0 {
            Self::B
        } else if bmaj_arcsec <= 60.0 {
            Self::C
        } else {
            Self::D
        }
    }
}

/// Extractor structure code of a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StructureCode {
    /// Single-Gaussian island.
    S,
    /// Single Gaussian in an island with other sources.
    C,
    /// Multi-Gaussian source.
    M,
}

impl StructureCode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "S" => Ok(Self::S),
            "C" => Ok(Self::C),
            "M" => Ok(Self::M),
            other => Err(RadassocError::InvalidRecord(format!(
                "unknown structure code '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// IMAGE
// =============================================================================

/// Image metadata as delivered by a header reader. Every member is optional;
/// the quality gate decides which absences are fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ImageHeader {
    /// (naxis1, naxis2) in pixels.
    pub imsize: Option<(u32, u32)>,
    /// Pointing center (deg).
    pub obs_ra: Option<f64>,
    pub obs_dec: Option<f64>,
    /// Pixel scale (arcsec/pixel).
    pub pixel_scale: Option<f64>,
    pub object: Option<String>,
    pub obs_date: Option<String>,
    pub map_date: Option<String>,
    /// Observing frequency (MHz).
    pub obs_freq: Option<f64>,
    /// Primary observing frequency (MHz), used for the primary beam model.
    pub primary_freq: Option<f64>,
    /// Restoring beam (arcsec, arcsec, deg).
    pub bmaj: Option<f64>,
    pub bmin: Option<f64>,
    pub bpa: Option<f64>,
    /// Image noise (mJy/beam).
    pub noise: Option<f64>,
    /// Image peak (mJy/beam).
    pub peak: Option<f64>,
    pub config: Option<String>,
    pub nvis: Option<u64>,
    pub mjdtime: Option<f64>,
    /// Integration time (s).
    pub tau_time: Option<f64>,
    /// Observation duration (s).
    pub duration: Option<f64>,
}

/// The header fields every downstream stage relies on, all present.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequiredHeader {
    pub naxis2: u32,
    pub obs_ra: f64,
    pub obs_dec: f64,
    pub pixel_scale: f64,
    pub obs_freq: f64,
    pub primary_freq: f64,
    pub bmaj: f64,
    pub bmin: f64,
    pub bpa: f64,
    pub noise: f64,
    pub nvis: u64,
    pub mjdtime: f64,
    pub tau_time: f64,
    pub duration: f64,
}

impl ImageHeader {
    /// Names of required fields that are absent.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let checks: [(&'static str, bool); 14] = [
            ("imsize", self.imsize.is_some()),
            ("obs_ra", self.obs_ra.is_some()),
            ("obs_dec", self.obs_dec.is_some()),
            ("pixel_scale", self.pixel_scale.is_some()),
            ("obs_date", self.obs_date.is_some()),
            ("obs_freq", self.obs_freq.is_some()),
            ("bmaj", self.bmaj.is_some()),
            ("bmin", self.bmin.is_some()),
            ("bpa", self.bpa.is_some()),
            ("noise", self.noise.is_some()),
            ("nvis", self.nvis.is_some()),
            ("mjdtime", self.mjdtime.is_some()),
            ("tau_time", self.tau_time.is_some()),
            ("duration", self.duration.is_some()),
        ];
        checks
            .into_iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| name)
            .collect()
    }

    /// Return the required view if nothing is missing.
    #[must_use]
    pub fn required(&self) -> Option<RequiredHeader> {
        self.obs_date.as_ref()?;
        let obs_freq = self.obs_freq?;
        Some(RequiredHeader {
            naxis2: self.imsize?.1,
            obs_ra: self.obs_ra?,
            obs_dec: self.obs_dec?,
            pixel_scale: self.pixel_scale?,
            obs_freq,
            primary_freq: self.primary_freq.unwrap_or(obs_freq),
            bmaj: self.bmaj?,
            bmin: self.bmin?,
            bpa: self.bpa?,
            noise: self.noise?,
            nvis: self.nvis?,
            mjdtime: self.mjdtime?,
            tau_time: self.tau_time?,
            duration: self.duration?,
        })
    }
}

/// One processed sky image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: ImageId,
    /// Unique per image.
    pub filename: String,
    pub header: ImageHeader,
    /// Field radius (deg) used for source selection and the bright-source check.
    pub radius: Option<f64>,
    /// Number of detections recorded.
    pub nsrc: u32,
    /// Background box reported by the extractor.
    pub rms_box: Option<String>,
    pub stage: Stage,
    pub error: Option<ErrorCode>,
    /// Names of catalogs already cross-matched for this image.
    pub catalogs_checked: BTreeSet<String>,
    /// Closest bright source and its separation (deg).
    pub nearest_problem: Option<String>,
    pub separation: Option<f64>,
}

impl Image {
    /// A freshly read image at stage 1.
    #[must_use]
    pub fn new(id: ImageId, filename: impl Into<String>, header: ImageHeader) -> Self {
        Self {
            id,
            filename: filename.into(),
            header,
            radius: None,
            nsrc: 0,
            rms_box: None,
            stage: Stage::Read,
            error: None,
            catalogs_checked: BTreeSet::new(),
            nearest_problem: None,
            separation: None,
        }
    }

    /// The recorded code, when it stops further processing.
    #[must_use]
    pub fn abort_code(&self) -> Option<ErrorCode> {
        self.error.filter(|e| !e.is_warning())
    }
}

// =============================================================================
// EXTRACTION PRODUCTS
// =============================================================================

/// Contiguous emission region grouping one or more detections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Island {
    pub key: IslandKey,
    pub total_flux: Measured,
    /// Background rms and mean (mJy/beam).
    pub rms: f64,
    pub mean: f64,
    /// Residual rms and mean after fitting (mJy/beam).
    pub resid_rms: f64,
    pub resid_mean: f64,
}

/// Fluxes after primary beam correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CorrectedFlux {
    /// Primary beam power at the detection position.
    pub pb_power: f64,
    pub total_flux: Measured,
    pub peak_flux: Measured,
    pub isl_total_flux: Measured,
    pub isl_rms: f64,
    pub isl_mean: f64,
    pub resid_rms: f64,
    pub resid_mean: f64,
    pub snr: f64,
}

/// One extractor-reported source in one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub key: DetectionKey,
    pub isl_id: u32,
    pub ra: Measured,
    pub dec: Measured,
    /// Position of the peak.
    pub ra_max: Measured,
    pub dec_max: Measured,
    pub total_flux: Measured,
    pub peak_flux: Measured,
    pub shape: Shape,
    pub deconvolved: Shape,
    pub code: StructureCode,
    /// Associated source, absent until association or after orphaning.
    pub assoc_id: Option<AssocId>,
    /// Set when the associated source was removed while this detection lived on.
    pub orphaned: bool,
    /// Distance from the pointing center (deg).
    pub dist_from_center: f64,
    pub corrected: Option<CorrectedFlux>,
}

impl Detection {
    /// Combined positional uncertainty (deg).
    #[must_use]
    pub fn position_sigma(&self) -> f64 {
        self.ra.error.hypot(self.dec.error)
    }
}

// =============================================================================
// PERSISTENT SOURCES
// =============================================================================

/// Multi-epoch identity of one physical sky source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociatedSource {
    pub id: AssocId,
    /// Inverse-variance weighted mean position.
    pub ra: Measured,
    pub dec: Measured,
    pub res_class: ResClass,
    /// Live detections referencing this source.
    pub ndetect: u32,
    /// Live catalog matches referencing this source.
    pub nmatches: u32,
}

impl AssociatedSource {
    #[must_use]
    pub fn position_sigma(&self) -> f64 {
        self.ra.error.hypot(self.dec.error)
    }
}

/// Cross-identification of an associated source with a reference catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CatalogMatch {
    pub catalog: CatalogId,
    pub catalog_src: u64,
    pub assoc: AssocId,
    pub de_ruiter: f64,
}

/// Marks a source detected in an image while it has no catalog counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniquenessRecord {
    pub image: ImageId,
    pub assoc: AssocId,
    pub detected: bool,
}

/// Normalized entry of a reference catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSource {
    pub catalog: CatalogId,
    /// Stable identifier within the catalog, 1-based in file order.
    pub id: u64,
    pub name: Option<String>,
    pub ra: Measured,
    pub dec: Measured,
    pub total_flux: Option<Measured>,
    pub peak_flux: Option<Measured>,
    pub maj: Option<f64>,
    pub min: Option<f64>,
    pub pa: Option<f64>,
    pub rms: Option<f64>,
    pub field: Option<String>,
}

/// Bookkeeping for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: u64,
    /// Unix seconds at start.
    pub started: u64,
    pub duration_secs: f64,
    pub nimages: u32,
    /// Serialized run configuration.
    pub config: String,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Operational errors of the radassoc engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RadassocError {
    /// A record failed validation.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The requested image does not exist.
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    /// The requested associated source does not exist.
    #[error("Associated source not found: {0:?}")]
    AssocNotFound(AssocId),

    /// A catalog name is not in the registry.
    #[error("Unknown catalog: {0}")]
    UnknownCatalog(String),

    /// The source extractor failed.
    #[error("Source extraction failed: {0}")]
    Extraction(String),

    /// The header reader failed.
    #[error("Header read failed: {0}")]
    Header(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A catalog file does not match its format descriptor.
    #[error("Catalog format error: {0}")]
    CatalogFormat(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O or storage error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RadassocError>;
