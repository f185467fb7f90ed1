//! # Bright Source Positions
//!
//! Low-precision apparent positions of the Sun, Moon and Jupiter, plus the
//! fixed list of bright radio sources that confuse an image when they fall
//! inside its field of view. Arcminute accuracy is plenty for a proximity
//! check against fields a degree or more across.

use crate::primitives::{J2000_JD, MJD_OFFSET};
use crate::sky::{angular_separation, normalize_ra};

/// A named position on the sky (deg).
#[derive(Debug, Clone, PartialEq)]
pub struct SkyObject {
    pub name: &'static str,
    pub ra: f64,
    pub dec: f64,
}

/// Bright radio sources at fixed J2000 positions.
pub const FIXED_BRIGHT_SOURCES: [(&str, f64, f64); 9] = [
    ("Cas A", 350.866250, 58.811667),
    ("Cen A", 201.365000, -43.019167),
    ("Cyg A", 299.867917, 40.733889),
    ("Her A", 252.783750, 4.992500),
    ("Orion A", 83.818750, -5.389722),
    ("Per A", 49.950417, 41.511667),
    ("Tau A", 83.633333, 22.014444),
    ("Virgo A", 187.705833, 12.391111),
    ("GC", 266.416833, -29.007806),
];

// =============================================================================
// SOLAR SYSTEM BODIES
// =============================================================================

fn sin_d(x: f64) -> f64 {
    x.to_radians().sin()
}

fn cos_d(x: f64) -> f64 {
    x.to_radians().cos()
}

/// Mean obliquity of the ecliptic (deg) at `d` days from J2000.
fn obliquity(d: f64) -> f64 {
    23.439 - 0.000_000_4 * d
}

/// Ecliptic longitude/latitude (deg) to equatorial RA/Dec (deg).
fn ecliptic_to_equatorial(lambda: f64, beta: f64, eps: f64) -> (f64, f64) {
    let x = cos_d(beta) * cos_d(lambda);
    let y = cos_d(beta) * sin_d(lambda) * cos_d(eps) - sin_d(beta) * sin_d(eps);
    let z = cos_d(beta) * sin_d(lambda) * sin_d(eps) + sin_d(beta) * cos_d(eps);
    let ra = normalize_ra(y.atan2(x).to_degrees());
    let dec = z.clamp(-1.0, 1.0).asin().to_degrees();
    (ra, dec)
}

/// Apparent position of the Sun.
#[must_use]
pub fn sun_position(mjd: f64) -> (f64, f64) {
    let d = mjd + MJD_OFFSET - J2000_JD;
    let mean_long = 280.460 + 0.985_647_4 * d;
    let anomaly = 357.528 + 0.985_600_3 * d;
    let lambda = mean_long + 1.915 * sin_d(anomaly) + 0.020 * sin_d(2.0 * anomaly);
    ecliptic_to_equatorial(lambda.rem_euclid(360.0), 0.0, obliquity(d))
}

/// Geocentric position of the Moon from the truncated lunar series.
#[must_use]
pub fn moon_position(mjd: f64) -> (f64, f64) {
    let d = mjd + MJD_OFFSET - J2000_JD;
    let t = d / 36525.0;
    let lambda = 218.32 + 481_267.881 * t + 6.29 * sin_d(135.0 + 477_198.87 * t)
        - 1.27 * sin_d(259.3 - 413_335.36 * t)
        + 0.66 * sin_d(235.7 + 890_534.22 * t)
        + 0.21 * sin_d(269.9 + 954_397.74 * t)
        - 0.19 * sin_d(357.5 + 35_999.05 * t)
        - 0.11 * sin_d(186.5 + 966_404.03 * t);
    let beta = 5.13 * sin_d(93.3 + 483_202.02 * t) + 0.28 * sin_d(228.2 + 960_400.89 * t)
        - 0.28 * sin_d(318.3 + 6_003.15 * t)
        - 0.17 * sin_d(217.6 - 407_332.21 * t);
    ecliptic_to_equatorial(lambda.rem_euclid(360.0), beta, obliquity(d))
}

/// Mean Keplerian elements and their rates per Julian century.
struct Elements {
    a: [f64; 2],
    e: [f64; 2],
    incl: [f64; 2],
    mean_long: [f64; 2],
    long_peri: [f64; 2],
    node: [f64; 2],
}

const JUPITER: Elements = Elements {
    a: [5.202_887_00, -0.000_116_07],
    e: [0.048_386_24, -0.000_132_53],
    incl: [1.304_396_95, -0.001_837_14],
    mean_long: [34.396_440_51, 3_034.746_127_75],
    long_peri: [14.728_479_83, 0.212_526_68],
    node: [100.473_909_09, 0.204_691_06],
};

const EARTH_MOON_BARYCENTER: Elements = Elements {
    a: [1.000_002_61, 0.000_005_62],
    e: [0.016_711_23, -0.000_043_92],
    incl: [-0.000_015_31, -0.012_946_68],
    mean_long: [100.464_571_66, 35_999.372_449_81],
    long_peri: [102.937_681_93, 0.323_273_64],
    node: [0.0, 0.0],
};

/// Solve Kepler's equation `E - e sin E = M` (radians) by Newton iteration.
fn eccentric_anomaly(mean_anomaly: f64, e: f64) -> f64 {
    let mut ecc = mean_anomaly + e * mean_anomaly.sin();
    for _ in 0..20 {
        let delta = (ecc - e * ecc.sin() - mean_anomaly) / (1.0 - e * ecc.cos());
        ecc -= delta;
        if delta.abs() < 1e-12 {
            break;
        }
    }
    ecc
}

/// Heliocentric ecliptic J2000 coordinates (au).
fn heliocentric(el: &Elements, t: f64) -> [f64; 3] {
    let a = el.a[0] + el.a[1] * t;
    let e = el.e[0] + el.e[1] * t;
    let incl = (el.incl[0] + el.incl[1] * t).to_radians();
    let mean_long = el.mean_long[0] + el.mean_long[1] * t;
    let long_peri = el.long_peri[0] + el.long_peri[1] * t;
    let node = (el.node[0] + el.node[1] * t).to_radians();

    let arg_peri = long_peri.to_radians() - node;
    let mean_anomaly = wrap_pi((mean_long - long_peri).to_radians());
    let ecc = eccentric_anomaly(mean_anomaly, e);

    let xp = a * (ecc.cos() - e);
    let yp = a * (1.0 - e * e).sqrt() * ecc.sin();

    let (sw, cw) = arg_peri.sin_cos();
    let (so, co) = node.sin_cos();
    let (si, ci) = incl.sin_cos();
    [
        (cw * co - sw * so * ci) * xp + (-sw * co - cw * so * ci) * yp,
        (cw * so + sw * co * ci) * xp + (-sw * so + cw * co * ci) * yp,
        (sw * si) * xp + (cw * si) * yp,
    ]
}

fn wrap_pi(x: f64) -> f64 {
    let two_pi = std::f64::consts::TAU;
    (x + std::f64::consts::PI).rem_euclid(two_pi) - std::f64::consts::PI
}

/// Geocentric position of Jupiter.
#[must_use]
pub fn jupiter_position(mjd: f64) -> (f64, f64) {
    let t = (mjd + MJD_OFFSET - J2000_JD) / 36525.0;
    let jup = heliocentric(&JUPITER, t);
    let earth = heliocentric(&EARTH_MOON_BARYCENTER, t);
    let x = jup[0] - earth[0];
    let y = jup[1] - earth[1];
    let z = jup[2] - earth[2];

    let eps = 23.439_28_f64.to_radians();
    let yq = y * eps.cos() - z * eps.sin();
    let zq = y * eps.sin() + z * eps.cos();
    let ra = normalize_ra(yq.atan2(x).to_degrees());
    let dec = zq.atan2(x.hypot(yq)).to_degrees();
    (ra, dec)
}

// =============================================================================
// PROXIMITY
// =============================================================================

/// The Sun, Moon and Jupiter at `mjd`, followed by the fixed bright sources.
#[must_use]
pub fn bright_sources(mjd: f64) -> Vec<SkyObject> {
    let (sun_ra, sun_dec) = sun_position(mjd);
    let (moon_ra, moon_dec) = moon_position(mjd);
    let (jup_ra, jup_dec) = jupiter_position(mjd);
    let mut objects = vec![
        SkyObject {
            name: "Sun",
            ra: sun_ra,
            dec: sun_dec,
        },
        SkyObject {
            name: "Moon",
            ra: moon_ra,
            dec: moon_dec,
        },
        SkyObject {
            name: "Jupiter",
            ra: jup_ra,
            dec: jup_dec,
        },
    ];
    objects.extend(
        FIXED_BRIGHT_SOURCES
            .iter()
            .map(|&(name, ra, dec)| SkyObject { name, ra, dec }),
    );
    objects
}

/// Nearest bright source to a pointing and its separation (deg).
///
/// Ties keep the earlier object in `bright_sources` order.
#[must_use]
pub fn nearest_bright_source(ra: f64, dec: f64, mjd: f64) -> Option<(&'static str, f64)> {
    let mut best: Option<(&'static str, f64)> = None;
    for obj in bright_sources(mjd) {
        let sep = angular_separation(ra, dec, obj.ra, obj.dec);
        if best.is_none_or(|(_, b)| sep < b) {
            best = Some((obj.name, sep));
        }
    }
    best
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    // 2000-03-20 07:35 UTC, March equinox.
    const EQUINOX_2000_MJD: f64 = 51623.316;

    #[test]
    fn sun_at_equinox_near_origin() {
        let (ra, dec) = sun_position(EQUINOX_2000_MJD);
        let d_ra = crate::sky::wrap_ra_delta(ra).abs();
        assert!(d_ra < 0.1, "ra {}", ra);
        assert!(dec.abs() < 0.05, "dec {}", dec);
    }

    #[test]
    fn sun_at_june_solstice() {
        // 2000-06-21
        let (ra, dec) = sun_position(51716.0);
        assert!((ra - 90.0).abs() < 1.0, "ra {}", ra);
        assert!((dec - 23.44).abs() < 0.1, "dec {}", dec);
    }

    #[test]
    fn moon_stays_near_ecliptic() {
        for day in 0..30 {
            let mjd = 60000.0 + f64::from(day);
            let (ra, dec) = moon_position(mjd);
            assert!((0.0..360.0).contains(&ra));
            assert!(dec.abs() < 29.5, "dec {}", dec);
        }
    }

    #[test]
    fn jupiter_near_known_position() {
        // 2000-01-01 00:00 UTC: Jupiter at RA ~ 1h36m (24 deg), Dec ~ +8.6.
        let (ra, dec) = jupiter_position(51544.0);
        assert!((ra - 24.0).abs() < 1.5, "ra {}", ra);
        assert!((dec - 8.6).abs() < 1.0, "dec {}", dec);
    }

    #[test]
    fn kepler_solution_satisfies_equation() {
        for &(m, e) in &[(0.3, 0.05), (2.5, 0.2), (-1.0, 0.0167)] {
            let ecc = eccentric_anomaly(m, e);
            assert!((ecc - e * ecc.sin() - m).abs() < 1e-10);
        }
    }

    #[test]
    fn nearest_finds_fixed_source() {
        let (name, sep) = nearest_bright_source(350.9, 58.8, 51544.0).unwrap();
        assert_eq!(name, "Cas A");
        assert!(sep < 0.05);
        assert_eq!(bright_sources(51544.0).len(), 12);
    }
}
