//! # Pipeline Configuration
//!
//! Every tunable threshold and mode flag of a run. All sections carry serde
//! defaults so a run file only needs to name what it changes.

use crate::catalog::CatalogFormat;
use crate::{RadassocError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Complete configuration of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub stages: Stages,
    pub options: Options,
    pub extraction: ExtractionParams,
    pub quality: QaParams,
    pub association: AssociationParams,
    pub matching: MatchParams,
    pub beam: BeamParams,
    /// Reference catalogs, in matching order. Order fixes catalog ids.
    pub catalogs: Vec<CatalogSpec>,
}

/// Which stages to run after the image is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stages {
    pub source_finding: bool,
    pub source_association: bool,
    pub catalog_matching: bool,
}

impl Default for Stages {
    fn default() -> Self {
        Self {
            source_finding: true,
            source_association: true,
            catalog_matching: true,
        }
    }
}

impl Stages {
    /// No stage beyond reading the header.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            source_finding: false,
            source_association: false,
            catalog_matching: false,
        }
    }

    #[must_use]
    pub const fn any(&self) -> bool {
        self.source_finding || self.source_association || self.catalog_matching
    }
}

/// Mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Commit each stage; when false every write is rolled back.
    pub save_to_database: bool,
    pub quality_checks: bool,
    /// Re-associate images that were already associated.
    pub overwrite: bool,
    /// Purge and rebuild images that were already processed.
    pub reprocess: bool,
    /// Discard existing matches of an image's sources and match again.
    pub redo_match: bool,
    /// Match already-matched images against newly added catalogs.
    pub update_match: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            save_to_database: true,
            quality_checks: true,
            overwrite: false,
            reprocess: false,
            redo_match: false,
            update_match: false,
        }
    }
}

/// Parameters handed to the source extractor.
///
/// Unknown keys are rejected so a misspelt or unsupported extractor option
/// fails the run file instead of being dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractionParams {
    /// Fraction (0, 1] of the image half-width searched for sources.
    pub scale: f64,
    pub rms_box: Option<(u32, u32)>,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            rms_box: None,
        }
    }
}

/// Quality gate thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaParams {
    pub min_nvis: u64,
    /// Upper bound of noise (mJy/beam) times sqrt(integration time (s)).
    pub max_sensitivity_metric: f64,
    pub max_beam_axis_ratio: f64,
    /// Upper bound of (actual - expected) / expected central source count.
    pub max_source_count_metric: f64,
    pub source_counts: SourceCountModel,
}

impl Default for QaParams {
    fn default() -> Self {
        Self {
            min_nvis: 1000,
            max_sensitivity_metric: 2000.0,
            max_beam_axis_ratio: 4.0,
            max_source_count_metric: 10.0,
            source_counts: SourceCountModel::default(),
        }
    }
}

/// Integral source count relation N(>S) = k * S^-gamma at a reference frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceCountModel {
    /// Sources per square degree brighter than 1 mJy.
    pub k_per_deg2: f64,
    pub gamma: f64,
    pub ref_freq_mhz: f64,
    pub spectral_index: f64,
    /// Detection limit in units of the image noise.
    pub detection_sigma: f64,
}

impl Default for SourceCountModel {
    fn default() -> Self {
        Self {
            k_per_deg2: 405.0,
            gamma: 1.0,
            ref_freq_mhz: 325.0,
            spectral_index: -0.7,
            detection_sigma: 5.0,
        }
    }
}

/// Association search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationParams {
    /// Multiple of the combined positional uncertainty accepted as a match.
    pub radius_scale: f64,
    /// Hard cap on the association radius (arcsec).
    pub max_radius_arcsec: f64,
}

impl Default for AssociationParams {
    fn default() -> Self {
        Self {
            radius_scale: 5.0,
            max_radius_arcsec: 60.0,
        }
    }
}

/// Catalog cross-match parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    pub search_radius_arcsec: f64,
    /// Matches need a de Ruiter radius strictly below this value.
    pub de_ruiter_max: f64,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            search_radius_arcsec: 60.0,
            de_ruiter_max: 5.68,
        }
    }
}

/// Primary beam model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamParams {
    /// Gaussian primary beam FWHM (deg) at 1 GHz; scales as 1/frequency.
    pub fwhm_deg_at_1ghz: f64,
    pub systematic_fraction: f64,
}

impl Default for BeamParams {
    fn default() -> Self {
        Self {
            fwhm_deg_at_1ghz: 0.75,
            systematic_fraction: crate::primitives::FLUX_SYSTEMATIC_FRACTION,
        }
    }
}

/// A reference catalog: its name, source file and column layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSpec {
    pub name: String,
    pub path: PathBuf,
    pub format: CatalogFormat,
}

impl PipelineConfig {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let scale = self.extraction.scale;
        if !(scale > 0.0 && scale <= 1.0) {
            return Err(RadassocError::Config(format!(
                "extraction scale {} outside (0, 1]",
                scale
            )));
        }
        let positive = [
            ("association.radius_scale", self.association.radius_scale),
            (
                "association.max_radius_arcsec",
                self.association.max_radius_arcsec,
            ),
            (
                "matching.search_radius_arcsec",
                self.matching.search_radius_arcsec,
            ),
            ("matching.de_ruiter_max", self.matching.de_ruiter_max),
            ("beam.fwhm_deg_at_1ghz", self.beam.fwhm_deg_at_1ghz),
            (
                "quality.max_beam_axis_ratio",
                self.quality.max_beam_axis_ratio,
            ),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(RadassocError::Config(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.options.redo_match && self.options.update_match {
            return Err(RadassocError::Config(
                "redo_match and update_match are mutually exclusive".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for spec in &self.catalogs {
            let name = spec.name.trim().to_lowercase();
            if name.is_empty() {
                return Err(RadassocError::Config("empty catalog name".to_string()));
            }
            if !seen.insert(name) {
                return Err(RadassocError::Config(format!(
                    "catalog '{}' listed twice",
                    spec.name
                )));
            }
        }
        Ok(())
    }
}
