//! # Source List Reader
//!
//! Reads the plain-text source list (`.srl`) written by the Gaussian-fitting
//! extractor, so images extracted outside the pipeline can be ingested.
//!
//! The file starts with six header lines, followed by one whitespace
//! separated row per source. A blank line ends the table. Fluxes are written
//! in Jy and converted to mJy; shape axes are written in degrees and
//! converted to arcsec.

use crate::config::ExtractionParams;
use crate::extract::{ExtractedSource, Extraction, IslandStats, SourceExtractor};
use crate::primitives::{ARCSEC_PER_DEG, SRL_HEADER_LINES};
use crate::{Image, Measured, RadassocError, Result, Shape, StructureCode};
use std::path::{Path, PathBuf};
use tracing::debug;

const JY_TO_MJY: f64 = 1000.0;

/// Minimum number of columns in a source row.
const MIN_COLUMNS: usize = 45;

fn field(cols: &[&str], idx: usize, line_no: usize) -> Result<f64> {
    let raw = cols.get(idx).ok_or_else(|| {
        RadassocError::Extraction(format!("line {}: missing column {}", line_no, idx))
    })?;
    raw.parse::<f64>().map_err(|e| {
        RadassocError::Extraction(format!(
            "line {}: column {} '{}': {}",
            line_no, idx, raw, e
        ))
    })
}

fn id_field(cols: &[&str], idx: usize, line_no: usize) -> Result<u32> {
    let raw = cols.get(idx).ok_or_else(|| {
        RadassocError::Extraction(format!("line {}: missing column {}", line_no, idx))
    })?;
    raw.parse::<u32>().map_err(|e| {
        RadassocError::Extraction(format!("line {}: id '{}': {}", line_no, raw, e))
    })
}

fn measured(cols: &[&str], idx: usize, scale: f64, line_no: usize) -> Result<Measured> {
    Ok(Measured::new(
        field(cols, idx, line_no)? * scale,
        field(cols, idx + 1, line_no)? * scale,
    ))
}

fn shape(cols: &[&str], first: usize, line_no: usize) -> Result<Shape> {
    Ok(Shape {
        maj: measured(cols, first, ARCSEC_PER_DEG, line_no)?,
        min: measured(cols, first + 2, ARCSEC_PER_DEG, line_no)?,
        pa: measured(cols, first + 4, 1.0, line_no)?,
    })
}

/// Parse the text of a source list.
pub fn parse_srl(text: &str) -> Result<Vec<ExtractedSource>> {
    let mut lines = text.lines().enumerate();
    for _ in 0..SRL_HEADER_LINES {
        if lines.next().is_none() {
            return Err(RadassocError::Extraction(
                "source list header is truncated".to_string(),
            ));
        }
    }

    let mut sources = Vec::new();
    for (idx, line) in lines {
        let line_no = idx + 1;
        // Some lists repeat the table after a blank line.
        if line.trim().is_empty() {
            break;
        }
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < MIN_COLUMNS {
            return Err(RadassocError::Extraction(format!(
                "line {}: expected at least {} columns, found {}",
                line_no,
                MIN_COLUMNS,
                cols.len()
            )));
        }
        sources.push(ExtractedSource {
            src_id: id_field(&cols, 0, line_no)?,
            isl_id: id_field(&cols, 1, line_no)?,
            ra: measured(&cols, 2, 1.0, line_no)?,
            dec: measured(&cols, 4, 1.0, line_no)?,
            total_flux: measured(&cols, 6, JY_TO_MJY, line_no)?,
            peak_flux: measured(&cols, 8, JY_TO_MJY, line_no)?,
            ra_max: measured(&cols, 10, 1.0, line_no)?,
            dec_max: measured(&cols, 12, 1.0, line_no)?,
            shape: shape(&cols, 14, line_no)?,
            deconvolved: shape(&cols, 26, line_no)?,
            island: IslandStats {
                total_flux: measured(&cols, 38, JY_TO_MJY, line_no)?,
                rms: field(&cols, 40, line_no)? * JY_TO_MJY,
                mean: field(&cols, 41, line_no)? * JY_TO_MJY,
                resid_rms: field(&cols, 42, line_no)? * JY_TO_MJY,
                resid_mean: field(&cols, 43, line_no)? * JY_TO_MJY,
            },
            code: StructureCode::parse(cols[44])?,
        });
    }
    Ok(sources)
}

/// Extractor that reads source lists produced by an earlier extractor run.
///
/// For an image `dir/name.fits` the list is `list_dir/name.srl`.
#[derive(Debug, Clone)]
pub struct SrlCatalogExtractor {
    list_dir: PathBuf,
}

impl SrlCatalogExtractor {
    #[must_use]
    pub fn new(list_dir: impl Into<PathBuf>) -> Self {
        Self {
            list_dir: list_dir.into(),
        }
    }

    /// Path of the source list belonging to an image file.
    #[must_use]
    pub fn list_path(&self, image_path: &Path) -> PathBuf {
        let stem = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.list_dir.join(format!("{}.srl", stem))
    }
}

impl SourceExtractor for SrlCatalogExtractor {
    fn extract(&self, image: &Image, params: &ExtractionParams) -> Result<Extraction> {
        let path = self.list_path(Path::new(&image.filename));
        let text = std::fs::read_to_string(&path).map_err(|e| {
            RadassocError::Extraction(format!("cannot read {}: {}", path.display(), e))
        })?;
        let sources = parse_srl(&text)?;
        debug!(path = %path.display(), count = sources.len(), "read source list");
        Ok(Extraction {
            sources,
            rms_box: params.rms_box.map(|(a, b)| format!("({}, {})", a, b)),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    /// A source list row in extractor units.
    fn srl_row(src_id: u32, isl_id: u32, ra: f64, dec: f64, flux_jy: f64) -> String {
        let mut cols: Vec<String> = vec![src_id.to_string(), isl_id.to_string()];
        let e = 0.0001;
        for v in [ra, e, dec, e, flux_jy, flux_jy * 0.05, flux_jy * 0.8, flux_jy * 0.04] {
            cols.push(format!("{}", v));
        }
        for v in [ra, e, dec, e] {
            cols.push(format!("{}", v));
        }
        // Fitted shape: maj, e_maj, min, e_min, pa, e_pa (deg)
        for v in [0.006, 0.0001, 0.004, 0.0001, 30.0, 2.0] {
            cols.push(format!("{}", v));
        }
        // Columns 20..25 are not used.
        for _ in 20..26 {
            cols.push("0.0".to_string());
        }
        // Deconvolved shape
        for v in [0.002, 0.0001, 0.001, 0.0001, 25.0, 5.0] {
            cols.push(format!("{}", v));
        }
        // Columns 32..37 are not used.
        for _ in 32..38 {
            cols.push("0.0".to_string());
        }
        // Island total flux, error, rms, mean, resid rms, resid mean
        for v in [flux_jy * 1.1, flux_jy * 0.05, 0.0005, 0.00001, 0.0004, 0.0] {
            cols.push(format!("{}", v));
        }
        cols.push("S".to_string());
        cols.join(" ")
    }

    fn srl_text(rows: &[String]) -> String {
        let mut text = String::new();
        for i in 0..SRL_HEADER_LINES {
            text.push_str(&format!("# header line {}\n", i));
        }
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        text
    }

    #[test]
    fn parses_rows_with_unit_conversion() {
        let text = srl_text(&[srl_row(0, 0, 150.1, 2.2, 0.05), srl_row(1, 0, 150.2, 2.3, 0.02)]);
        let sources = parse_srl(&text).unwrap();
        assert_eq!(sources.len(), 2);
        let s = &sources[0];
        assert_eq!(s.src_id, 0);
        assert!((s.total_flux.value - 50.0).abs() < 1e-9);
        assert!((s.shape.maj.value - 21.6).abs() < 1e-9);
        assert!((s.deconvolved.pa.value - 25.0).abs() < 1e-9);
        assert!((s.island.rms - 0.5).abs() < 1e-9);
        assert_eq!(s.code, StructureCode::S);
    }

    #[test]
    fn blank_line_ends_table() {
        let mut text = srl_text(&[srl_row(0, 0, 10.0, 0.0, 0.01)]);
        text.push('\n');
        text.push_str(&srl_row(7, 3, 11.0, 0.0, 0.01));
        text.push('\n');
        assert_eq!(parse_srl(&text).unwrap().len(), 1);
    }

    #[test]
    fn short_header_and_rows_rejected() {
        assert!(parse_srl("# one\n# two\n").is_err());
        let text = srl_text(&["0 0 10.0 0.1".to_string()]);
        assert!(matches!(parse_srl(&text), Err(RadassocError::Extraction(_))));
    }

    #[test]
    fn list_path_uses_image_stem() {
        let extractor = SrlCatalogExtractor::new("/data/lists");
        assert_eq!(
            extractor.list_path(Path::new("/data/images/field_01.IMSC.fits")),
            PathBuf::from("/data/lists/field_01.IMSC.srl")
        );
    }
}
