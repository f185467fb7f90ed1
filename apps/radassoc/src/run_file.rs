//! # Run Files
//!
//! A run file is TOML: the pipeline configuration sections plus an
//! `[inputs]` table saying where images, source lists and the catalog cache
//! live. Relative paths are resolved against the run file's directory.
//!
//! ```toml
//! [inputs]
//! image_dir = "images"
//! source_lists = "srl"
//! catalog_cache = "cache"
//!
//! [stages]
//! catalog_matching = false
//!
//! [options]
//! reprocess = true
//!
//! [[catalogs]]
//! name = "NVSS"
//! path = "catalogs/nvss.txt"
//! format = { skip_lines = 1, ra = { index = 1, unit = "sexagesimal_hours" }, dec = { index = 4, unit = "sexagesimal_degrees" } }
//! ```

use radassoc_core::{PipelineConfig, RadassocError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Maximum run file size (1 MB).
const MAX_RUN_FILE_SIZE: u64 = 1024 * 1024;

/// Image file extension picked up from `image_dir`.
const IMAGE_EXTENSION: &str = "fits";

/// Where a run finds its inputs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Inputs {
    /// Images listed explicitly, processed first and in order.
    pub images: Vec<PathBuf>,
    /// Directory scanned for `*.fits` images, in name order.
    pub image_dir: Option<PathBuf>,
    /// Directory holding `<stem>.srl` source lists. Defaults to `image_dir`.
    pub source_lists: Option<PathBuf>,
    /// Directory for parsed catalog caches.
    pub catalog_cache: Option<PathBuf>,
}

/// A parsed run file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunFile {
    pub inputs: Inputs,
    #[serde(flatten)]
    pub pipeline: PipelineConfig,
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl RunFile {
    /// Parse run file text. Paths are left as written.
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| RadassocError::Config(format!("invalid run file: {}", e)))
    }

    /// Read, parse and validate a run file.
    pub fn load(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| RadassocError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        if metadata.len() > MAX_RUN_FILE_SIZE {
            return Err(RadassocError::Config(format!(
                "run file {} exceeds {} bytes",
                path.display(),
                MAX_RUN_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| RadassocError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let mut run = Self::parse(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        run.resolve_paths(base);
        run.pipeline.validate()?;
        debug!(path = %path.display(), catalogs = run.pipeline.catalogs.len(), "run file loaded");
        Ok(run)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let inputs = &mut self.inputs;
        inputs.images = inputs.images.iter().map(|p| resolve(base, p)).collect();
        inputs.image_dir = inputs.image_dir.as_deref().map(|p| resolve(base, p));
        inputs.source_lists = inputs.source_lists.as_deref().map(|p| resolve(base, p));
        inputs.catalog_cache = inputs.catalog_cache.as_deref().map(|p| resolve(base, p));
        for catalog in &mut self.pipeline.catalogs {
            catalog.path = resolve(base, &catalog.path);
        }
    }

    /// Images of this run: the explicit list, then `image_dir` in name order.
    pub fn image_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = self.inputs.images.clone();
        if let Some(dir) = &self.inputs.image_dir {
            let entries = std::fs::read_dir(dir)
                .map_err(|e| RadassocError::IoError(format!("{}: {}", dir.display(), e)))?;
            let mut found = Vec::new();
            for entry in entries {
                let path = entry
                    .map_err(|e| RadassocError::IoError(e.to_string()))?
                    .path();
                let is_image = path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(IMAGE_EXTENSION));
                if is_image && !paths.contains(&path) {
                    found.push(path);
                }
            }
            found.sort();
            paths.extend(found);
        }
        Ok(paths)
    }
}
