//! # Descriptor-Driven Catalog Reader
//!
//! One reader parses every reference catalog. Each catalog supplies a
//! `CatalogFormat` naming which columns hold which quantities and how to
//! convert them. Positions end up in degrees; positional errors must be
//! converted to degrees by the column scale.

use crate::{CatalogId, CatalogSource, Measured, RadassocError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A numeric column and the factor that converts it to engine units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub index: usize,
    #[serde(default = "unit_scale")]
    pub scale: f64,
}

fn unit_scale() -> f64 {
    1.0
}

impl Column {
    #[must_use]
    pub const fn new(index: usize, scale: f64) -> Self {
        Self { index, scale }
    }
}

/// How a coordinate is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoordUnit {
    #[default]
    Degrees,
    /// Decimal hours.
    Hours,
    /// `d m s`, either as three columns or one `d:m:s` column.
    SexagesimalDegrees,
    /// `h m s`, either as three columns or one `h:m:s` column.
    SexagesimalHours,
}

/// A coordinate column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordColumn {
    pub index: usize,
    #[serde(default)]
    pub unit: CoordUnit,
}

/// Keep only rows whose column value lies within the bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RowFilter {
    pub column: usize,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl RowFilter {
    /// Rows with an unreadable filter column are rejected.
    fn accepts(&self, cols: &[&str]) -> bool {
        let Some(v) = cols.get(self.column).and_then(|t| parse_number(t)) else {
            return false;
        };
        self.min.is_none_or(|min| v >= min) && self.max.is_none_or(|max| v < max)
    }
}

/// Column layout of a reference catalog text file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogFormat {
    /// Lines skipped before the table starts.
    pub skip_lines: usize,
    /// Lines starting with this prefix are ignored.
    pub comment_prefix: Option<String>,
    /// Field separator; whitespace when absent.
    pub delimiter: Option<char>,
    pub name: Option<usize>,
    pub ra: CoordColumn,
    pub dec: CoordColumn,
    pub e_ra: Option<Column>,
    pub e_dec: Option<Column>,
    pub total_flux: Option<Column>,
    pub e_total_flux: Option<Column>,
    pub peak_flux: Option<Column>,
    pub e_peak_flux: Option<Column>,
    pub maj: Option<Column>,
    pub min: Option<Column>,
    pub pa: Option<Column>,
    pub rms: Option<Column>,
    pub field: Option<usize>,
    pub filter: Option<RowFilter>,
    /// Positional error (arcsec) used when a catalog carries none at all.
    pub default_error_arcsec: Option<f64>,
}

impl Default for CatalogFormat {
    fn default() -> Self {
        Self {
            skip_lines: 0,
            comment_prefix: Some("#".to_string()),
            delimiter: None,
            name: None,
            ra: CoordColumn {
                index: 0,
                unit: CoordUnit::Degrees,
            },
            dec: CoordColumn {
                index: 1,
                unit: CoordUnit::Degrees,
            },
            e_ra: None,
            e_dec: None,
            total_flux: None,
            e_total_flux: None,
            peak_flux: None,
            e_peak_flux: None,
            maj: None,
            min: None,
            pa: None,
            rms: None,
            field: None,
            filter: None,
            default_error_arcsec: None,
        }
    }
}

/// A parsed row before missing errors are filled.
struct Row {
    name: Option<String>,
    ra: f64,
    dec: f64,
    e_ra: Option<f64>,
    e_dec: Option<f64>,
    total_flux: Option<Measured>,
    peak_flux: Option<Measured>,
    maj: Option<f64>,
    min: Option<f64>,
    pa: Option<f64>,
    rms: Option<f64>,
    field: Option<String>,
}

/// Parses one catalog according to its format.
#[derive(Debug, Clone, Copy)]
pub struct CatalogReader<'a> {
    catalog: CatalogId,
    format: &'a CatalogFormat,
}

fn parse_number(token: &str) -> Option<f64> {
    let v = token.trim().parse::<f64>().ok()?;
    v.is_finite().then_some(v)
}

fn sexagesimal(parts: [&str; 3]) -> Option<f64> {
    let negative = parts[0].trim_start().starts_with('-');
    let a = parse_number(parts[0])?.abs();
    let b = parse_number(parts[1])?;
    let c = parse_number(parts[2])?;
    let value = a + b / 60.0 + c / 3600.0;
    Some(if negative { -value } else { value })
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

impl<'a> CatalogReader<'a> {
    #[must_use]
    pub const fn new(catalog: CatalogId, format: &'a CatalogFormat) -> Self {
        Self { catalog, format }
    }

    fn split<'t>(&self, line: &'t str) -> Vec<&'t str> {
        match self.format.delimiter {
            Some(d) => line.split(d).map(str::trim).collect(),
            None => line.split_whitespace().collect(),
        }
    }

    fn coord(&self, cols: &[&str], col: CoordColumn) -> Option<f64> {
        let token = cols.get(col.index)?;
        match col.unit {
            CoordUnit::Degrees => parse_number(token),
            CoordUnit::Hours => parse_number(token).map(|h| h * 15.0),
            CoordUnit::SexagesimalDegrees | CoordUnit::SexagesimalHours => {
                let value = if token.contains(':') {
                    let parts: Vec<&str> = token.split(':').collect();
                    if parts.len() != 3 {
                        return None;
                    }
                    sexagesimal([parts[0], parts[1], parts[2]])?
                } else {
                    sexagesimal([
                        token,
                        cols.get(col.index + 1)?,
                        cols.get(col.index + 2)?,
                    ])?
                };
                Some(if col.unit == CoordUnit::SexagesimalHours {
                    value * 15.0
                } else {
                    value
                })
            }
        }
    }

    fn number(cols: &[&str], col: Option<Column>) -> Option<f64> {
        let col = col?;
        cols.get(col.index)
            .and_then(|t| parse_number(t))
            .map(|v| v * col.scale)
    }

    fn text(cols: &[&str], idx: Option<usize>) -> Option<String> {
        cols.get(idx?)
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    fn flux(cols: &[&str], value: Option<Column>, error: Option<Column>) -> Option<Measured> {
        let v = Self::number(cols, value)?;
        Some(Measured::new(v, Self::number(cols, error).unwrap_or(0.0)))
    }

    /// Parse catalog text into sources numbered from 1 in file order.
    pub fn parse(&self, text: &str) -> Result<Vec<CatalogSource>> {
        let fmt = self.format;
        let mut rows = Vec::new();
        for (idx, line) in text.lines().enumerate().skip(fmt.skip_lines) {
            if line.trim().is_empty() {
                continue;
            }
            let commented = fmt
                .comment_prefix
                .as_deref()
                .is_some_and(|p| line.trim_start().starts_with(p));
            if commented {
                continue;
            }
            let cols = self.split(line);
            if fmt.filter.is_some_and(|f| !f.accepts(&cols)) {
                continue;
            }
            let (Some(ra), Some(dec)) = (self.coord(&cols, fmt.ra), self.coord(&cols, fmt.dec))
            else {
                return Err(RadassocError::CatalogFormat(format!(
                    "line {}: unreadable position",
                    idx + 1
                )));
            };
            if !(-90.0..=90.0).contains(&dec) {
                return Err(RadassocError::CatalogFormat(format!(
                    "line {}: declination {} out of range",
                    idx + 1,
                    dec
                )));
            }
            rows.push(Row {
                name: Self::text(&cols, fmt.name),
                ra: crate::sky::normalize_ra(ra),
                dec,
                e_ra: Self::number(&cols, fmt.e_ra).filter(|e| *e > 0.0),
                e_dec: Self::number(&cols, fmt.e_dec).filter(|e| *e > 0.0),
                total_flux: Self::flux(&cols, fmt.total_flux, fmt.e_total_flux),
                peak_flux: Self::flux(&cols, fmt.peak_flux, fmt.e_peak_flux),
                maj: Self::number(&cols, fmt.maj),
                min: Self::number(&cols, fmt.min),
                pa: Self::number(&cols, fmt.pa),
                rms: Self::number(&cols, fmt.rms),
                field: Self::text(&cols, fmt.field),
            });
        }

        let fill_ra = self.fill_value(rows.iter().filter_map(|r| r.e_ra).collect(), "e_ra")?;
        let fill_dec = self.fill_value(rows.iter().filter_map(|r| r.e_dec).collect(), "e_dec")?;

        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| CatalogSource {
                catalog: self.catalog,
                id: i as u64 + 1,
                name: row.name,
                ra: Measured::new(row.ra, row.e_ra.unwrap_or(fill_ra)),
                dec: Measured::new(row.dec, row.e_dec.unwrap_or(fill_dec)),
                total_flux: row.total_flux,
                peak_flux: row.peak_flux,
                maj: row.maj,
                min: row.min,
                pa: row.pa,
                rms: row.rms,
                field: row.field,
            })
            .collect())
    }

    /// Median of the present errors, else the configured default.
    fn fill_value(&self, mut present: Vec<f64>, what: &str) -> Result<f64> {
        if let Some(m) = median(&mut present) {
            return Ok(m);
        }
        self.format
            .default_error_arcsec
            .map(|e| e / crate::primitives::ARCSEC_PER_DEG)
            .ok_or_else(|| {
                RadassocError::CatalogFormat(format!(
                    "catalog {} has no {} values and no default_error_arcsec",
                    self.catalog.0, what
                ))
            })
    }

    /// Read and parse a catalog file.
    pub fn read_path(&self, path: &Path) -> Result<Vec<CatalogSource>> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RadassocError::IoError(format!("cannot read catalog {}: {}", path.display(), e))
        })?;
        self.parse(&text)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    const ARCSEC: f64 = 1.0 / 3600.0;

    fn nvss_like() -> CatalogFormat {
        CatalogFormat {
            skip_lines: 1,
            name: Some(0),
            ra: CoordColumn {
                index: 1,
                unit: CoordUnit::SexagesimalHours,
            },
            dec: CoordColumn {
                index: 4,
                unit: CoordUnit::SexagesimalDegrees,
            },
            e_ra: Some(Column::new(7, ARCSEC)),
            e_dec: Some(Column::new(8, ARCSEC)),
            total_flux: Some(Column::new(9, 1.0)),
            e_total_flux: Some(Column::new(10, 1.0)),
            ..CatalogFormat::default()
        }
    }

    #[test]
    fn parses_sexagesimal_columns() {
        let text = "NAME RAh RAm RAs DEd DEm DEs eRA eDE S eS\n\
                    J0001 00 00 36.0 -01 30 00.0 1.0 2.0 15.2 0.6\n\
                    # comment\n\
                    J0002 12 00 00.0 +45 00 00.0 3.0 4.0 7.1 0.4\n";
        let format = nvss_like();
        let sources = CatalogReader::new(CatalogId(1), &format).parse(text).unwrap();
        assert_eq!(sources.len(), 2);
        let a = &sources[0];
        assert_eq!(a.id, 1);
        assert_eq!(a.name.as_deref(), Some("J0001"));
        assert!((a.ra.value - 0.15).abs() < 1e-9);
        assert!((a.dec.value + 1.5).abs() < 1e-9);
        assert!((a.ra.error - ARCSEC).abs() < 1e-12);
        assert!((a.total_flux.unwrap().value - 15.2).abs() < 1e-9);
        assert!((sources[1].ra.value - 180.0).abs() < 1e-9);
        assert_eq!(sources[1].id, 2);
    }

    #[test]
    fn colon_separated_coordinates() {
        let format = CatalogFormat {
            delimiter: Some(','),
            ra: CoordColumn {
                index: 0,
                unit: CoordUnit::SexagesimalHours,
            },
            dec: CoordColumn {
                index: 1,
                unit: CoordUnit::SexagesimalDegrees,
            },
            default_error_arcsec: Some(2.0),
            ..CatalogFormat::default()
        };
        let sources = CatalogReader::new(CatalogId(4), &format)
            .parse("01:00:00, -00:30:00\n")
            .unwrap();
        assert!((sources[0].ra.value - 15.0).abs() < 1e-9);
        assert!((sources[0].dec.value + 0.5).abs() < 1e-9);
        assert!((sources[0].dec.error - 2.0 * ARCSEC).abs() < 1e-12);
        assert_eq!(sources[0].catalog, CatalogId(4));
    }

    #[test]
    fn missing_errors_take_the_median() {
        let format = CatalogFormat {
            e_ra: Some(Column::new(2, 1.0)),
            e_dec: Some(Column::new(3, 1.0)),
            ..CatalogFormat::default()
        };
        let text = "10.0 1.0 0.001 0.002\n\
                    10.1 1.0 0.003 0.004\n\
                    10.2 1.0 nan -\n\
                    10.3 1.0 0.005 0.006\n";
        let sources = CatalogReader::new(CatalogId(1), &format).parse(text).unwrap();
        assert!((sources[2].ra.error - 0.003).abs() < 1e-12);
        assert!((sources[2].dec.error - 0.004).abs() < 1e-12);
    }

    #[test]
    fn catalog_without_errors_needs_default() {
        let format = CatalogFormat::default();
        let result = CatalogReader::new(CatalogId(1), &format).parse("10.0 1.0\n");
        assert!(matches!(result, Err(RadassocError::CatalogFormat(_))));
    }

    #[test]
    fn bad_position_rejected() {
        let format = CatalogFormat {
            default_error_arcsec: Some(1.0),
            ..CatalogFormat::default()
        };
        let reader = CatalogReader::new(CatalogId(1), &format);
        assert!(reader.parse("abc 1.0\n").is_err());
        assert!(reader.parse("10.0 95.0\n").is_err());
    }

    #[test]
    fn row_filter_drops_rows() {
        // Third column: sidelobe probability.
        let format = CatalogFormat {
            default_error_arcsec: Some(1.0),
            filter: Some(RowFilter {
                column: 2,
                min: None,
                max: Some(0.15),
            }),
            ..CatalogFormat::default()
        };
        let text = "10.0 1.0 0.01
10.1 1.0 0.90
10.2 1.0 0.14
10.3 1.0 x
";
        let sources = CatalogReader::new(CatalogId(1), &format).parse(text).unwrap();
        assert_eq!(sources.len(), 2);
        assert!((sources[1].ra.value - 10.2).abs() < 1e-9);
        assert_eq!(sources[1].id, 2);
    }
}
