//! # Quality Gate
//!
//! Decides whether an image may progress through the pipeline.
//!
//! The header assessment runs before extraction and applies its checks in a
//! fixed order; the first failure wins:
//!
//! 1. required header fields present
//! 2. visibility count at or above the minimum
//! 3. sensitivity metric `noise * sqrt(tau_time)` in `(0, max]`
//! 4. beam axis ratio at or below the maximum
//! 5. pointing neither at the NCP nor at a planet
//! 6. no bright source inside the field radius (warning only)
//!
//! The extraction assessment runs after the extractor and compares the
//! central source count with the count expected from the image noise.

use crate::config::{QaParams, SourceCountModel};
use crate::ephemeris::nearest_bright_source;
use crate::primitives::CENTRAL_RADIUS_DEG;
use crate::{Detection, ErrorCode, ImageHeader};
use tracing::{debug, info};

/// Outcome of one assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    /// Recorded on the image; processing continues.
    Warn(ErrorCode),
    /// Recorded on the image; processing stops for this run.
    Abort(ErrorCode),
}

impl Verdict {
    #[must_use]
    pub const fn code(self) -> Option<ErrorCode> {
        match self {
            Self::Pass => None,
            Self::Warn(c) | Self::Abort(c) => Some(c),
        }
    }
}

/// Header assessment with the bright-source proximity that was measured.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderAssessment {
    pub verdict: Verdict,
    pub nearest_problem: Option<(String, f64)>,
}

/// The quality gate, parameterized by run thresholds.
#[derive(Debug, Clone, Copy)]
pub struct QualityGate<'a> {
    params: &'a QaParams,
}

impl<'a> QualityGate<'a> {
    #[must_use]
    pub const fn new(params: &'a QaParams) -> Self {
        Self { params }
    }

    /// Pre-extraction checks. `radius_deg` is the image field radius.
    #[must_use]
    pub fn assess_header(&self, header: &ImageHeader, radius_deg: Option<f64>) -> HeaderAssessment {
        let abort = |code| HeaderAssessment {
            verdict: Verdict::Abort(code),
            nearest_problem: None,
        };

        let Some(req) = header.required() else {
            info!(
                missing = ?header.missing_fields(),
                "image failed QA: missing header metadata"
            );
            return abort(ErrorCode::MissingMetadata);
        };

        if req.nvis < self.params.min_nvis {
            info!(
                nvis = req.nvis,
                min = self.params.min_nvis,
                "image failed QA: too few visibilities"
            );
            return abort(ErrorCode::LowVisibilityCount);
        }

        let metric = req.noise * req.tau_time.max(0.0).sqrt();
        if !(metric > 0.0 && metric <= self.params.max_sensitivity_metric) {
            info!(
                metric,
                max = self.params.max_sensitivity_metric,
                "image failed QA: sensitivity metric out of range"
            );
            return abort(ErrorCode::BadSensitivityMetric);
        }

        let axis_ratio = req.bmaj / req.bmin;
        if !(axis_ratio <= self.params.max_beam_axis_ratio) {
            info!(
                axis_ratio,
                max = self.params.max_beam_axis_ratio,
                "image failed QA: beam too elliptical"
            );
            return abort(ErrorCode::ExcessiveEllipticity);
        }

        let ncp = header
            .object
            .as_deref()
            .is_some_and(|o| o.trim().eq_ignore_ascii_case("ncp"));
        if ncp || (req.obs_ra == 0.0 && req.obs_dec == 0.0) {
            info!("image failed QA: pointing at the NCP or a planet");
            return abort(ErrorCode::DisallowedTarget);
        }

        let nearest = nearest_bright_source(req.obs_ra, req.obs_dec, req.mjdtime);
        let verdict = match (nearest, radius_deg) {
            (Some((name, sep)), Some(radius)) if sep <= radius => {
                info!(source = name, separation = sep, "QA warning: bright source in field");
                Verdict::Warn(ErrorCode::BrightSourceInField)
            }
            _ => Verdict::Pass,
        };
        HeaderAssessment {
            verdict,
            nearest_problem: nearest.map(|(name, sep)| (name.to_string(), sep)),
        }
    }

    /// Post-extraction checks over the image's detections.
    #[must_use]
    pub fn assess_extraction(&self, header: &ImageHeader, detections: &[Detection]) -> Verdict {
        if detections.is_empty() {
            info!("image failed QA: no sources detected");
            return Verdict::Abort(ErrorCode::NoSourcesDetected);
        }
        let Some(req) = header.required() else {
            return Verdict::Abort(ErrorCode::MissingMetadata);
        };

        let actual = detections
            .iter()
            .filter(|d| d.dist_from_center <= CENTRAL_RADIUS_DEG)
            .count() as f64;
        let expected =
            expected_source_count(&self.params.source_counts, req.noise, req.primary_freq);
        if expected <= 0.0 || !expected.is_finite() {
            debug!(expected, "skipping source count check");
            return Verdict::Pass;
        }
        let metric = (actual - expected) / expected;
        if metric > self.params.max_source_count_metric {
            info!(
                actual,
                expected,
                metric,
                max = self.params.max_source_count_metric,
                "image failed QA: anomalous source count"
            );
            return Verdict::Abort(ErrorCode::AnomalousSourceCount);
        }
        debug!(actual, expected, metric, "source count check passed");
        Verdict::Pass
    }
}

/// Expected number of sources within the central region.
///
/// The detection limit `detection_sigma * noise` is scaled to the model's
/// reference frequency with its spectral index before applying the integral
/// counts.
#[must_use]
pub fn expected_source_count(model: &SourceCountModel, noise_mjy: f64, freq_mhz: f64) -> f64 {
    let s_lim = model.detection_sigma * noise_mjy;
    if s_lim <= 0.0 || freq_mhz <= 0.0 {
        return 0.0;
    }
    let s_ref = s_lim * (model.ref_freq_mhz / freq_mhz).powf(model.spectral_index);
    let per_deg2 = model.k_per_deg2 * s_ref.powf(-model.gamma);
    per_deg2 * std::f64::consts::PI * CENTRAL_RADIUS_DEG * CENTRAL_RADIUS_DEG
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{DetectionKey, ImageId, Measured, Shape, StructureCode};

    fn header() -> ImageHeader {
        ImageHeader {
            imsize: Some((4096, 4096)),
            obs_ra: Some(150.0),
            obs_dec: Some(2.0),
            pixel_scale: Some(2.0),
            object: Some("COSMOS".to_string()),
            obs_date: Some("2017-08-01".to_string()),
            obs_freq: Some(340.0),
            bmaj: Some(20.0),
            bmin: Some(15.0),
            bpa: Some(10.0),
            noise: Some(3.0),
            nvis: Some(1_000_000),
            // 2017-08-01; the Sun is near RA 130, Dec +18.
            mjdtime: Some(57966.5),
            tau_time: Some(3600.0),
            duration: Some(7200.0),
            ..ImageHeader::default()
        }
    }

    fn detection(dist: f64) -> Detection {
        Detection {
            key: DetectionKey::new(ImageId(1), 0),
            isl_id: 0,
            ra: Measured::new(150.0, 1e-4),
            dec: Measured::new(2.0, 1e-4),
            ra_max: Measured::default(),
            dec_max: Measured::default(),
            total_flux: Measured::new(10.0, 1.0),
            peak_flux: Measured::new(10.0, 1.0),
            shape: Shape::default(),
            deconvolved: Shape::default(),
            code: StructureCode::S,
            assoc_id: None,
            orphaned: false,
            dist_from_center: dist,
            corrected: None,
        }
    }

    #[test]
    fn good_header_passes_and_records_nearest() {
        let params = QaParams::default();
        let gate = QualityGate::new(&params);
        let a = gate.assess_header(&header(), Some(1.14));
        assert_eq!(a.verdict, Verdict::Pass);
        let (_, sep) = a.nearest_problem.unwrap();
        assert!(sep > 1.14);
    }

    #[test]
    fn checks_apply_in_order() {
        let params = QaParams::default();
        let gate = QualityGate::new(&params);

        // Missing metadata wins over everything else.
        let h = ImageHeader {
            noise: None,
            nvis: Some(1),
            ..header()
        };
        assert_eq!(
            gate.assess_header(&h, None).verdict,
            Verdict::Abort(ErrorCode::MissingMetadata)
        );

        // Low visibilities beat a bad beam.
        let h = ImageHeader {
            nvis: Some(10),
            bmin: Some(1.0),
            ..header()
        };
        assert_eq!(
            gate.assess_header(&h, None).verdict,
            Verdict::Abort(ErrorCode::LowVisibilityCount)
        );

        let h = ImageHeader {
            noise: Some(0.0),
            ..header()
        };
        assert_eq!(
            gate.assess_header(&h, None).verdict,
            Verdict::Abort(ErrorCode::BadSensitivityMetric)
        );

        let h = ImageHeader {
            noise: Some(100.0),
            ..header()
        };
        assert_eq!(
            gate.assess_header(&h, None).verdict,
            Verdict::Abort(ErrorCode::BadSensitivityMetric)
        );

        let h = ImageHeader {
            bmaj: Some(80.0),
            ..header()
        };
        assert_eq!(
            gate.assess_header(&h, None).verdict,
            Verdict::Abort(ErrorCode::ExcessiveEllipticity)
        );

        let h = ImageHeader {
            object: Some("ncp".to_string()),
            ..header()
        };
        assert_eq!(
            gate.assess_header(&h, None).verdict,
            Verdict::Abort(ErrorCode::DisallowedTarget)
        );

        let h = ImageHeader {
            obs_ra: Some(0.0),
            obs_dec: Some(0.0),
            ..header()
        };
        assert_eq!(
            gate.assess_header(&h, None).verdict,
            Verdict::Abort(ErrorCode::DisallowedTarget)
        );
    }

    #[test]
    fn bright_source_is_warning() {
        let params = QaParams::default();
        let gate = QualityGate::new(&params);
        let h = ImageHeader {
            obs_ra: Some(187.7),
            obs_dec: Some(12.4),
            ..header()
        };
        let a = gate.assess_header(&h, Some(1.14));
        assert_eq!(a.verdict, Verdict::Warn(ErrorCode::BrightSourceInField));
        assert_eq!(a.nearest_problem.unwrap().0, "Virgo A");
    }

    #[test]
    fn empty_extraction_aborts() {
        let params = QaParams::default();
        let gate = QualityGate::new(&params);
        assert_eq!(
            gate.assess_extraction(&header(), &[]),
            Verdict::Abort(ErrorCode::NoSourcesDetected)
        );
    }

    #[test]
    fn source_count_metric() {
        let params = QaParams {
            max_source_count_metric: 0.5,
            ..QaParams::default()
        };
        let gate = QualityGate::new(&params);
        let expected =
            expected_source_count(&params.source_counts, 3.0, 340.0);
        assert!(expected > 100.0 && expected < 300.0, "expected {}", expected);

        let few: Vec<Detection> = (0..10).map(|_| detection(0.5)).collect();
        assert_eq!(gate.assess_extraction(&header(), &few), Verdict::Pass);

        let n = (expected * 2.0) as usize;
        let many: Vec<Detection> = (0..n).map(|_| detection(0.5)).collect();
        assert_eq!(
            gate.assess_extraction(&header(), &many),
            Verdict::Abort(ErrorCode::AnomalousSourceCount)
        );

        // Sources outside the central region do not count.
        let outer: Vec<Detection> = (0..n).map(|_| detection(2.0)).collect();
        assert_eq!(gate.assess_extraction(&header(), &outer), Verdict::Pass);
    }

    #[test]
    fn source_count_uses_primary_beam_frequency() {
        let params = QaParams {
            max_source_count_metric: 0.5,
            ..QaParams::default()
        };
        let gate = QualityGate::new(&params);
        let at_obs = expected_source_count(&params.source_counts, 3.0, 340.0);
        let at_primary = expected_source_count(&params.source_counts, 3.0, 1400.0);
        assert!(at_primary < at_obs / 2.0);

        let n = (at_obs * 1.2) as usize;
        let found: Vec<Detection> = (0..n).map(|_| detection(0.5)).collect();
        assert_eq!(gate.assess_extraction(&header(), &found), Verdict::Pass);

        let h = ImageHeader {
            primary_freq: Some(1400.0),
            ..header()
        };
        assert_eq!(
            gate.assess_extraction(&h, &found),
            Verdict::Abort(ErrorCode::AnomalousSourceCount)
        );
    }
}
