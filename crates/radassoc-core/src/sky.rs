//! # Sky Geometry
//!
//! Angular distances on the celestial sphere, the de Ruiter radius, and a
//! declination-zone index used for every cone search in the engine.
//!
//! The index keys each entry by `(zone, ra_key, id)`: the declination zone,
//! right ascension scaled to an integer, and the owner's identifier. A cone
//! query turns into a handful of contiguous key spans, which both the
//! in-memory ledger and the redb tables can scan as ordered ranges.

use crate::Measured;
use crate::primitives::{ARCSEC_PER_DEG, RA_KEY_SCALE, ZONE_HEIGHT_DEG};
use std::collections::BTreeSet;

// =============================================================================
// ANGLES
// =============================================================================

/// Great-circle separation (deg) between two positions given in degrees.
///
/// Haversine form, stable for the small separations that dominate matching.
#[must_use]
pub fn angular_separation(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (ra1, dec1, ra2, dec2) = (
        ra1.to_radians(),
        dec1.to_radians(),
        ra2.to_radians(),
        dec2.to_radians(),
    );
    let sin_ddec = ((dec2 - dec1) / 2.0).sin();
    let sin_dra = ((ra2 - ra1) / 2.0).sin();
    let h = sin_ddec * sin_ddec + dec1.cos() * dec2.cos() * sin_dra * sin_dra;
    (2.0 * h.sqrt().min(1.0).asin()).to_degrees()
}

/// Right ascension normalized to [0, 360).
#[must_use]
pub fn normalize_ra(ra: f64) -> f64 {
    let wrapped = ra.rem_euclid(360.0);
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Right ascension difference wrapped to [-180, 180).
#[must_use]
pub fn wrap_ra_delta(delta: f64) -> f64 {
    (delta + 180.0).rem_euclid(360.0) - 180.0
}

/// Field radius (deg) of an image, rounded to two decimals.
#[must_use]
pub fn field_radius_deg(naxis2: u32, pixel_scale_arcsec: f64, scale: f64) -> f64 {
    let r_pix = f64::from(naxis2) / 2.0 * scale;
    (r_pix * pixel_scale_arcsec / ARCSEC_PER_DEG * 100.0).round() / 100.0
}

/// de Ruiter radius between two positions with uncertainties.
///
/// `R = sqrt((dra cos(dec))^2 / (e_ra1^2 + e_ra2^2) + ddec^2 / (e_dec1^2 + e_dec2^2))`
/// with `dra` wrapped and `dec` the mean declination. Returns infinity when a
/// combined variance is not positive.
#[must_use]
pub fn de_ruiter_radius(ra1: Measured, dec1: Measured, ra2: Measured, dec2: Measured) -> f64 {
    let var_ra = ra1.error * ra1.error + ra2.error * ra2.error;
    let var_dec = dec1.error * dec1.error + dec2.error * dec2.error;
    if var_ra <= 0.0 || var_dec <= 0.0 {
        return f64::INFINITY;
    }
    let mean_dec = ((dec1.value + dec2.value) / 2.0).to_radians();
    let dra = wrap_ra_delta(ra1.value - ra2.value) * mean_dec.cos();
    let ddec = dec1.value - dec2.value;
    (dra * dra / var_ra + ddec * ddec / var_dec).sqrt()
}

// =============================================================================
// ZONE INDEX
// =============================================================================

/// A contiguous span of index keys: one zone, an inclusive RA key range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneSpan {
    pub zone: i32,
    pub ra_lo: u64,
    pub ra_hi: u64,
}

/// Declination zone of a position.
#[must_use]
pub fn zone_of(dec: f64) -> i32 {
    ((dec.clamp(-90.0, 90.0) + 90.0) / ZONE_HEIGHT_DEG).floor() as i32
}

/// Integer right ascension key.
#[must_use]
pub fn ra_key(ra: f64) -> u64 {
    let key = (normalize_ra(ra) * RA_KEY_SCALE).floor();
    key.clamp(0.0, 360.0 * RA_KEY_SCALE - 1.0) as u64
}

/// Index key of an entry.
#[must_use]
pub fn index_key(ra: f64, dec: f64, id: u64) -> (i32, u64, u64) {
    (zone_of(dec), ra_key(ra), id)
}

/// Key spans covering a cone of `radius` degrees around (ra, dec).
///
/// Spans are conservative: callers still filter candidates by exact separation.
#[must_use]
pub fn cone_spans(ra: f64, dec: f64, radius: f64) -> Vec<ZoneSpan> {
    let full = 360.0 * RA_KEY_SCALE - 1.0;
    let lo_zone = zone_of(dec - radius);
    let hi_zone = zone_of(dec + radius);

    // Half-width in RA at the most poleward edge of the cone.
    let edge = (dec.abs() + radius).min(90.0);
    let half_width = if edge >= 89.9 {
        None
    } else {
        let w = radius / edge.to_radians().cos();
        if w >= 180.0 { None } else { Some(w) }
    };

    let mut ra_ranges: Vec<(u64, u64)> = Vec::new();
    match half_width {
        None => ra_ranges.push((0, full as u64)),
        Some(w) => {
            let lo = ra - w;
            let hi = ra + w;
            if lo < 0.0 {
                ra_ranges.push((ra_key(lo + 360.0), full as u64));
                ra_ranges.push((0, ra_key(hi)));
            } else if hi >= 360.0 {
                ra_ranges.push((ra_key(lo), full as u64));
                ra_ranges.push((0, ra_key(hi - 360.0)));
            } else {
                ra_ranges.push((ra_key(lo), ra_key(hi)));
            }
        }
    }

    let mut spans = Vec::new();
    for zone in lo_zone..=hi_zone {
        for &(ra_lo, ra_hi) in &ra_ranges {
            spans.push(ZoneSpan { zone, ra_lo, ra_hi });
        }
    }
    spans
}

/// In-memory zone index mapping sky positions to owner ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkyIndex {
    keys: BTreeSet<(i32, u64, u64)>,
}

impl SkyIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ra: f64, dec: f64, id: u64) {
        self.keys.insert(index_key(ra, dec, id));
    }

    pub fn remove(&mut self, ra: f64, dec: f64, id: u64) {
        self.keys.remove(&index_key(ra, dec, id));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Candidate ids within the spans of a cone, ascending and deduplicated.
    #[must_use]
    pub fn candidates(&self, ra: f64, dec: f64, radius: f64) -> Vec<u64> {
        let mut ids = BTreeSet::new();
        for span in cone_spans(ra, dec, radius) {
            for &(_, _, id) in self
                .keys
                .range((span.zone, span.ra_lo, 0)..=(span.zone, span.ra_hi, u64::MAX))
            {
                ids.insert(id);
            }
        }
        ids.into_iter().collect()
    }
}
