//! # Header Sidecars
//!
//! Image headers are read from a JSON file written next to each image by
//! the imaging step: `field.fits` has its header in `field.fits.header.json`.

use radassoc_core::{HeaderSource, ImageHeader, RadassocError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Maximum sidecar size (1 MB).
const MAX_SIDECAR_SIZE: u64 = 1024 * 1024;

/// Reads `<image>.header.json` sidecars.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonHeaderSource;

impl JsonHeaderSource {
    /// Sidecar path for an image.
    #[must_use]
    pub fn sidecar_path(image: &Path) -> PathBuf {
        let mut name = image.as_os_str().to_owned();
        name.push(".header.json");
        PathBuf::from(name)
    }
}

impl HeaderSource for JsonHeaderSource {
    fn read_header(&self, path: &Path) -> Result<ImageHeader> {
        let sidecar = Self::sidecar_path(path);
        let metadata = std::fs::metadata(&sidecar).map_err(|e| {
            RadassocError::Header(format!("cannot read {}: {}", sidecar.display(), e))
        })?;
        if metadata.len() > MAX_SIDECAR_SIZE {
            return Err(RadassocError::Header(format!(
                "{} is {} bytes, larger than {}",
                sidecar.display(),
                metadata.len(),
                MAX_SIDECAR_SIZE
            )));
        }
        let text = std::fs::read_to_string(&sidecar).map_err(|e| {
            RadassocError::Header(format!("cannot read {}: {}", sidecar.display(), e))
        })?;
        let header: ImageHeader = serde_json::from_str(&text).map_err(|e| {
            RadassocError::Header(format!("invalid header {}: {}", sidecar.display(), e))
        })?;
        debug!(path = %sidecar.display(), missing = ?header.missing_fields(), "header read");
        Ok(header)
    }
}
