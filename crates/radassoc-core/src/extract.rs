//! # Collaborator Contracts
//!
//! The engine does not read image files or fit Gaussians. It consumes
//! headers from a `HeaderSource` and fitted sources from a
//! `SourceExtractor`, and turns extractor output into island and detection
//! records.

use crate::beam::correct_flux;
use crate::config::{BeamParams, ExtractionParams};
use crate::sky::angular_separation;
use crate::{
    Detection, DetectionKey, Image, ImageHeader, ImageId, Island, IslandKey, Measured,
    RadassocError, RequiredHeader, Result, Shape, StructureCode,
};
use std::collections::BTreeMap;
use std::path::Path;

/// Aggregate statistics of the island enclosing a source.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IslandStats {
    pub total_flux: Measured,
    pub rms: f64,
    pub mean: f64,
    pub resid_rms: f64,
    pub resid_mean: f64,
}

/// One fitted source as reported by an extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedSource {
    pub src_id: u32,
    pub isl_id: u32,
    pub ra: Measured,
    pub dec: Measured,
    pub ra_max: Measured,
    pub dec_max: Measured,
    pub total_flux: Measured,
    pub peak_flux: Measured,
    pub shape: Shape,
    pub deconvolved: Shape,
    pub code: StructureCode,
    pub island: IslandStats,
}

/// Everything an extractor run produced for one image.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Extraction {
    pub sources: Vec<ExtractedSource>,
    pub rms_box: Option<String>,
}

/// Island and detection rows derived from an extraction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractionRecords {
    pub islands: Vec<Island>,
    pub detections: Vec<Detection>,
}

/// Fits sources in an image.
pub trait SourceExtractor {
    fn extract(&self, image: &Image, params: &ExtractionParams) -> Result<Extraction>;
}

/// Reads image metadata.
pub trait HeaderSource {
    fn read_header(&self, path: &Path) -> Result<ImageHeader>;
}

impl Extraction {
    /// Build island and detection rows for `image`.
    ///
    /// Islands are deduplicated by id (first occurrence wins). Each detection
    /// gets its distance from the pointing center and primary-beam corrected
    /// fluxes. Duplicate source ids are rejected.
    pub fn into_records(
        self,
        image: ImageId,
        header: &RequiredHeader,
        beam: &BeamParams,
    ) -> Result<ExtractionRecords> {
        let mut islands: BTreeMap<u32, Island> = BTreeMap::new();
        let mut detections: BTreeMap<u32, Detection> = BTreeMap::new();

        for src in self.sources {
            let island = islands.entry(src.isl_id).or_insert_with(|| Island {
                key: IslandKey::new(image, src.isl_id),
                total_flux: src.island.total_flux,
                rms: src.island.rms,
                mean: src.island.mean,
                resid_rms: src.island.resid_rms,
                resid_mean: src.island.resid_mean,
            });

            let mut detection = Detection {
                key: DetectionKey::new(image, src.src_id),
                isl_id: src.isl_id,
                ra: src.ra,
                dec: src.dec,
                ra_max: src.ra_max,
                dec_max: src.dec_max,
                total_flux: src.total_flux,
                peak_flux: src.peak_flux,
                shape: src.shape,
                deconvolved: src.deconvolved,
                code: src.code,
                assoc_id: None,
                orphaned: false,
                dist_from_center: angular_separation(
                    header.obs_ra,
                    header.obs_dec,
                    src.ra.value,
                    src.dec.value,
                ),
                corrected: None,
            };
            detection.corrected = Some(correct_flux(&detection, island, beam, header.primary_freq));

            if detections.insert(src.src_id, detection).is_some() {
                return Err(RadassocError::InvalidRecord(format!(
                    "duplicate source id {} in extraction of {}",
                    src.src_id, image
                )));
            }
        }

        Ok(ExtractionRecords {
            islands: islands.into_values().collect(),
            detections: detections.into_values().collect(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn required() -> RequiredHeader {
        RequiredHeader {
            naxis2: 4096,
            obs_ra: 150.0,
            obs_dec: 0.0,
            pixel_scale: 2.0,
            obs_freq: 340.0,
            primary_freq: 340.0,
            bmaj: 20.0,
            bmin: 15.0,
            bpa: 0.0,
            noise: 3.0,
            nvis: 100_000,
            mjdtime: 57966.5,
            tau_time: 3600.0,
            duration: 7200.0,
        }
    }

    fn source(src_id: u32, isl_id: u32, ra: f64) -> ExtractedSource {
        ExtractedSource {
            src_id,
            isl_id,
            ra: Measured::new(ra, 1e-4),
            dec: Measured::new(0.0, 1e-4),
            ra_max: Measured::new(ra, 1e-4),
            dec_max: Measured::new(0.0, 1e-4),
            total_flux: Measured::new(50.0, 2.0),
            peak_flux: Measured::new(40.0, 2.0),
            shape: Shape::default(),
            deconvolved: Shape::default(),
            code: StructureCode::S,
            island: IslandStats {
                total_flux: Measured::new(60.0, 3.0),
                rms: 1.0,
                ..IslandStats::default()
            },
        }
    }

    #[test]
    fn records_share_islands() {
        let extraction = Extraction {
            sources: vec![source(0, 0, 150.0), source(1, 0, 150.1), source(2, 1, 151.0)],
            rms_box: Some("(100, 30)".to_string()),
        };
        let records = extraction
            .into_records(ImageId(3), &required(), &BeamParams::default())
            .unwrap();
        assert_eq!(records.islands.len(), 2);
        assert_eq!(records.detections.len(), 3);
        let far = &records.detections[2];
        assert!((far.dist_from_center - 1.0).abs() < 1e-9);
        let c = far.corrected.unwrap();
        assert!(c.pb_power < 1.0);
        assert!(c.total_flux.value > 50.0);
        assert!(records.detections.iter().all(|d| d.assoc_id.is_none()));
    }

    #[test]
    fn duplicate_source_ids_rejected() {
        let extraction = Extraction {
            sources: vec![source(0, 0, 150.0), source(0, 1, 150.2)],
            rms_box: None,
        };
        let result = extraction.into_records(ImageId(1), &required(), &BeamParams::default());
        assert!(matches!(result, Err(RadassocError::InvalidRecord(_))));
    }
}
