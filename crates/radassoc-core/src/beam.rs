//! # Primary Beam Correction
//!
//! Detections far from the pointing center are attenuated by the antenna
//! primary beam. The beam is modelled as a circular Gaussian whose FWHM
//! scales inversely with frequency.

use crate::config::BeamParams;
use crate::{CorrectedFlux, Detection, Island, Measured};

/// Primary beam FWHM (deg) at `freq_mhz`.
#[must_use]
pub fn primary_beam_fwhm(params: &BeamParams, freq_mhz: f64) -> f64 {
    params.fwhm_deg_at_1ghz / (freq_mhz / 1000.0)
}

/// Primary beam power at `dist_deg` from the pointing center.
#[must_use]
pub fn primary_beam_power(dist_deg: f64, fwhm_deg: f64) -> f64 {
    let x = dist_deg / fwhm_deg;
    (-4.0 * std::f64::consts::LN_2 * x * x).exp()
}

fn with_systematic(m: Measured, fraction: f64) -> Measured {
    let sys = fraction * m.value;
    Measured::new(m.value, m.error.hypot(sys))
}

fn scaled(m: Measured, pb: f64) -> Measured {
    Measured::new(m.value / pb, m.error / pb)
}

/// Beam-corrected fluxes of a detection and its island.
///
/// Fluxes, their errors and island statistics are divided by the beam power;
/// the signal-to-noise ratio uses the corrected island statistics; a
/// systematic term is added in quadrature to every flux error.
#[must_use]
pub fn correct_flux(
    detection: &Detection,
    island: &Island,
    params: &BeamParams,
    freq_mhz: f64,
) -> CorrectedFlux {
    let fwhm = primary_beam_fwhm(params, freq_mhz);
    let pb = primary_beam_power(detection.dist_from_center, fwhm);
    let peak = scaled(detection.peak_flux, pb);
    let isl_rms = island.rms / pb;
    let isl_mean = island.mean / pb;
    let snr = if isl_rms > 0.0 {
        (peak.value - isl_mean) / isl_rms
    } else {
        0.0
    };
    let frac = params.systematic_fraction;
    CorrectedFlux {
        pb_power: pb,
        total_flux: with_systematic(scaled(detection.total_flux, pb), frac),
        peak_flux: with_systematic(peak, frac),
        isl_total_flux: with_systematic(scaled(island.total_flux, pb), frac),
        isl_rms,
        isl_mean,
        resid_rms: island.resid_rms / pb,
        resid_mean: island.resid_mean / pb,
        snr,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{DetectionKey, ImageId, IslandKey, Shape, StructureCode};

    fn detection(dist: f64) -> Detection {
        Detection {
            key: DetectionKey::new(ImageId(1), 0),
            isl_id: 0,
            ra: Measured::new(10.0, 1e-4),
            dec: Measured::new(20.0, 1e-4),
            ra_max: Measured::new(10.0, 1e-4),
            dec_max: Measured::new(20.0, 1e-4),
            total_flux: Measured::new(100.0, 5.0),
            peak_flux: Measured::new(80.0, 4.0),
            shape: Shape::default(),
            deconvolved: Shape::default(),
            code: StructureCode::S,
            assoc_id: None,
            orphaned: false,
            dist_from_center: dist,
            corrected: None,
        }
    }

    fn island() -> Island {
        Island {
            key: IslandKey::new(ImageId(1), 0),
            total_flux: Measured::new(100.0, 5.0),
            rms: 2.0,
            mean: 0.0,
            resid_rms: 1.0,
            resid_mean: 0.1,
        }
    }

    #[test]
    fn power_is_half_at_half_fwhm_radius() {
        assert!((primary_beam_power(0.0, 2.0) - 1.0).abs() < 1e-12);
        assert!((primary_beam_power(1.0, 2.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn fwhm_scales_inverse_with_frequency() {
        let params = BeamParams::default();
        assert!((primary_beam_fwhm(&params, 1000.0) - 0.75).abs() < 1e-12);
        assert!((primary_beam_fwhm(&params, 500.0) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn center_detection_only_gains_systematic() {
        let params = BeamParams::default();
        let c = correct_flux(&detection(0.0), &island(), &params, 340.0);
        assert!((c.pb_power - 1.0).abs() < 1e-12);
        assert!((c.total_flux.value - 100.0).abs() < 1e-9);
        // sqrt(5^2 + 20^2)
        assert!((c.total_flux.error - 425.0_f64.sqrt()).abs() < 1e-9);
        assert!((c.snr - 40.0).abs() < 1e-9);
    }

    #[test]
    fn off_axis_detection_is_boosted() {
        let params = BeamParams::default();
        let fwhm = primary_beam_fwhm(&params, 340.0);
        let c = correct_flux(&detection(fwhm / 2.0), &island(), &params, 340.0);
        assert!((c.pb_power - 0.5).abs() < 1e-9);
        assert!((c.total_flux.value - 200.0).abs() < 1e-6);
        assert!((c.isl_rms - 4.0).abs() < 1e-9);
        // SNR is invariant under uniform scaling.
        assert!((c.snr - 40.0).abs() < 1e-9);
    }
}
