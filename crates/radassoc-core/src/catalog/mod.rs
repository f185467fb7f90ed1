//! # Reference Catalogs
//!
//! - `CatalogRegistry`: immutable name/id/format table built once from the
//!   run configuration and passed by reference.
//! - `CatalogReader`: one parser for every catalog, driven by `CatalogFormat`.
//! - `CatalogSet`: parsed catalogs with a zone index for cone queries,
//!   loaded through the binary cache when one is available.

mod reader;

pub use reader::{CatalogFormat, CatalogReader, Column, CoordColumn, CoordUnit, RowFilter};

use crate::config::CatalogSpec;
use crate::formats::{catalog_from_bytes, catalog_to_bytes};
use crate::sky::{SkyIndex, angular_separation};
use crate::{CatalogId, CatalogSource, RadassocError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// =============================================================================
// REGISTRY
// =============================================================================

/// A registered catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub id: CatalogId,
    /// Lowercase name.
    pub name: String,
    pub path: PathBuf,
    pub format: CatalogFormat,
}

/// Catalog names and ids, fixed for the lifetime of a run.
///
/// Ids are 1-based positions in the configured list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogRegistry {
    entries: Vec<CatalogEntry>,
}

fn canonical_name(name: &str) -> String {
    name.trim().to_lowercase()
}

impl CatalogRegistry {
    pub fn from_specs(specs: &[CatalogSpec]) -> Result<Self> {
        let mut entries: Vec<CatalogEntry> = Vec::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            let name = canonical_name(&spec.name);
            if name.is_empty() || entries.iter().any(|e| e.name == name) {
                return Err(RadassocError::Config(format!(
                    "invalid or duplicate catalog name '{}'",
                    spec.name
                )));
            }
            entries.push(CatalogEntry {
                id: CatalogId(i as u32 + 1),
                name,
                path: spec.path.clone(),
                format: spec.format.clone(),
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a catalog by name, case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        let name = canonical_name(name);
        self.entries.iter().find(|e| e.name == name)
    }

    #[must_use]
    pub fn by_id(&self, id: CatalogId) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Resolve every name, failing on the first unknown one.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<&CatalogEntry>> {
        names
            .iter()
            .map(|n| {
                self.get(n)
                    .ok_or_else(|| RadassocError::UnknownCatalog(n.clone()))
            })
            .collect()
    }
}

// =============================================================================
// INDEXED CATALOGS
// =============================================================================

#[derive(Debug, Clone, Default)]
struct IndexedCatalog {
    sources: BTreeMap<u64, CatalogSource>,
    index: SkyIndex,
}

/// Parsed reference catalogs keyed by id.
#[derive(Debug, Clone, Default)]
pub struct CatalogSet {
    catalogs: BTreeMap<CatalogId, IndexedCatalog>,
}

impl CatalogSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the sources of one catalog.
    pub fn insert(&mut self, catalog: CatalogId, sources: Vec<CatalogSource>) {
        let mut indexed = IndexedCatalog::default();
        for mut src in sources {
            src.catalog = catalog;
            indexed.index.insert(src.ra.value, src.dec.value, src.id);
            indexed.sources.insert(src.id, src);
        }
        self.catalogs.insert(catalog, indexed);
    }

    #[must_use]
    pub fn contains(&self, catalog: CatalogId) -> bool {
        self.catalogs.contains_key(&catalog)
    }

    /// Number of sources in a catalog (0 if not loaded).
    #[must_use]
    pub fn source_count(&self, catalog: CatalogId) -> usize {
        self.catalogs.get(&catalog).map_or(0, |c| c.sources.len())
    }

    /// Sources of `catalog` within `radius` degrees, ascending by id.
    #[must_use]
    pub fn cone(&self, catalog: CatalogId, ra: f64, dec: f64, radius: f64) -> Vec<&CatalogSource> {
        let Some(cat) = self.catalogs.get(&catalog) else {
            return Vec::new();
        };
        cat.index
            .candidates(ra, dec, radius)
            .into_iter()
            .filter_map(|id| cat.sources.get(&id))
            .filter(|s| angular_separation(ra, dec, s.ra.value, s.dec.value) <= radius)
            .collect()
    }

    /// Load every registered catalog, using `cache_dir` when given.
    ///
    /// A cache file is used when it is newer than its catalog file; otherwise
    /// the catalog is parsed and the cache rewritten. Unreadable caches are
    /// ignored with a warning.
    pub fn load(registry: &CatalogRegistry, cache_dir: Option<&Path>) -> Result<Self> {
        let mut set = Self::new();
        for entry in registry.entries() {
            let sources = match cache_dir {
                Some(dir) => load_cached(entry, dir)?,
                None => CatalogReader::new(entry.id, &entry.format).read_path(&entry.path)?,
            };
            info!(catalog = %entry.name, sources = sources.len(), "catalog loaded");
            set.insert(entry.id, sources);
        }
        Ok(set)
    }
}

fn modified(path: &Path) -> Option<std::time::SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn load_cached(entry: &CatalogEntry, dir: &Path) -> Result<Vec<CatalogSource>> {
    let cache_path = dir.join(format!("{}.rcat", entry.name));
    let fresh = match (modified(&cache_path), modified(&entry.path)) {
        (Some(cache), Some(source)) => cache >= source,
        (Some(_), None) => true,
        _ => false,
    };
    if fresh {
        match std::fs::read(&cache_path)
            .map_err(|e| RadassocError::IoError(e.to_string()))
            .and_then(|bytes| catalog_from_bytes(&bytes))
        {
            Ok(sources) => {
                debug!(path = %cache_path.display(), "using catalog cache");
                return Ok(sources);
            }
            Err(e) => {
                warn!(
                    path = %cache_path.display(),
                    error = %e,
                    "ignoring unreadable catalog cache"
                );
            }
        }
    }

    let sources = CatalogReader::new(entry.id, &entry.format).read_path(&entry.path)?;
    std::fs::create_dir_all(dir).map_err(|e| RadassocError::IoError(e.to_string()))?;
    std::fs::write(&cache_path, catalog_to_bytes(&sources)?)
        .map_err(|e| RadassocError::IoError(e.to_string()))?;
    debug!(path = %cache_path.display(), "catalog cache written");
    Ok(sources)
}
