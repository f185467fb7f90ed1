//! # redb-backed Tables
//!
//! A disk-backed association database using the redb embedded database.
//!
//! `RedbStore` owns the database handle. `RedbTables` borrows one
//! transaction and implements `Tables` on top of it. Every pipeline stage
//! runs in one write transaction that either commits or leaves the database
//! untouched; queries run against a read snapshot and never block a writer.
//!
//! Rows are postcard-encoded. Secondary indexes (filename, detections per
//! source, source positions, matches per catalog, uniqueness per image) are
//! separate tables updated in the same transaction as the rows they index.

use crate::sky::{angular_separation, cone_spans, index_key};
use crate::tables::Tables;
use crate::{
    AssocId, AssociatedSource, CatalogId, CatalogMatch, Detection, DetectionKey, Image, ImageId,
    Island, RadassocError, Result, RunRecord, UniquenessRecord,
};
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::path::Path;

/// Image rows: image id -> postcard Image
const IMAGES: TableDefinition<u64, &[u8]> = TableDefinition::new("images");

/// Filename index: filename -> image id
const IMAGE_FILENAMES: TableDefinition<&str, u64> = TableDefinition::new("image_filenames");

/// Island rows: (image id, island id) -> postcard Island
const ISLANDS: TableDefinition<(u64, u32), &[u8]> = TableDefinition::new("islands");

/// Detection rows: (image id, source id) -> postcard Detection
const DETECTIONS: TableDefinition<(u64, u32), &[u8]> = TableDefinition::new("detections");

/// Detections per source: (assoc id, image id, source id) -> ()
const ASSOC_DETECTIONS: TableDefinition<(u64, u64, u32), ()> =
    TableDefinition::new("assoc_detections");

/// Associated source rows: assoc id -> postcard AssociatedSource
const ASSOCS: TableDefinition<u64, &[u8]> = TableDefinition::new("assocs");

/// Position index of sources: (zone, ra key, assoc id) -> ()
const ASSOC_ZONES: TableDefinition<(i32, u64, u64), ()> = TableDefinition::new("assoc_zones");

/// Catalog matches: (assoc id, catalog id, catalog source id) -> de Ruiter radius
const MATCHES: TableDefinition<(u64, u32, u64), f64> = TableDefinition::new("matches");

/// Matches per catalog: (catalog id, catalog source id, assoc id) -> ()
const CATALOG_MATCHES: TableDefinition<(u32, u64, u64), ()> =
    TableDefinition::new("catalog_matches");

/// Uniqueness registry: (assoc id, image id) -> detected
const UNIQUENESS: TableDefinition<(u64, u64), bool> = TableDefinition::new("uniqueness");

/// Uniqueness records per image: (image id, assoc id) -> ()
const IMAGE_UNIQUENESS: TableDefinition<(u64, u64), ()> =
    TableDefinition::new("image_uniqueness");

/// Run records: run id -> postcard RunRecord
const RUNS: TableDefinition<u64, &[u8]> = TableDefinition::new("runs");

/// Metadata: key -> last allocated id
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_IMAGE_ID: &str = "next_image_id";
const NEXT_ASSOC_ID: &str = "next_assoc_id";
const NEXT_RUN_ID: &str = "next_run_id";

fn storage_err(e: impl std::fmt::Display) -> RadassocError {
    RadassocError::IoError(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_stdvec(value).map_err(|e| RadassocError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    postcard::from_bytes(bytes).map_err(|e| RadassocError::DeserializationError(e.to_string()))
}

// =============================================================================
// STORE
// =============================================================================

/// A redb database holding one association database.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

/// Row counts of the main tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableCounts {
    pub images: u64,
    pub islands: u64,
    pub detections: u64,
    pub assocs: u64,
    pub matches: u64,
    pub uniqueness: u64,
}

impl RedbStore {
    /// Open or create an association database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;

        // Create every table so later read transactions find them.
        let txn = db.begin_write().map_err(storage_err)?;
        txn.open_table(IMAGES).map_err(storage_err)?;
        txn.open_table(IMAGE_FILENAMES).map_err(storage_err)?;
        txn.open_table(ISLANDS).map_err(storage_err)?;
        txn.open_table(DETECTIONS).map_err(storage_err)?;
        txn.open_table(ASSOC_DETECTIONS).map_err(storage_err)?;
        txn.open_table(ASSOCS).map_err(storage_err)?;
        txn.open_table(ASSOC_ZONES).map_err(storage_err)?;
        txn.open_table(MATCHES).map_err(storage_err)?;
        txn.open_table(CATALOG_MATCHES).map_err(storage_err)?;
        txn.open_table(UNIQUENESS).map_err(storage_err)?;
        txn.open_table(IMAGE_UNIQUENESS).map_err(storage_err)?;
        txn.open_table(RUNS).map_err(storage_err)?;
        txn.open_table(METADATA).map_err(storage_err)?;
        txn.commit().map_err(storage_err)?;

        Ok(Self { db })
    }

    /// Run `f` inside one write transaction.
    ///
    /// The transaction commits when `commit` is true and `f` succeeds;
    /// otherwise it is aborted and the database is unchanged.
    pub fn transact<T>(
        &mut self,
        commit: bool,
        f: impl FnOnce(&mut dyn Tables) -> Result<T>,
    ) -> Result<T> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        let result = {
            let mut tables = RedbTables {
                txn: Txn::Write(&txn),
            };
            f(&mut tables)
        };
        match result {
            Ok(value) if commit => {
                txn.commit().map_err(storage_err)?;
                Ok(value)
            }
            Ok(value) => {
                txn.abort().map_err(storage_err)?;
                Ok(value)
            }
            Err(e) => {
                txn.abort().map_err(storage_err)?;
                Err(e)
            }
        }
    }

    /// Run a read-only closure over a snapshot of the tables.
    pub fn read<T>(&self, f: impl FnOnce(&dyn Tables) -> Result<T>) -> Result<T> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let tables = RedbTables {
            txn: Txn::Read(&txn),
        };
        f(&tables)
    }

    /// Row counts from a read snapshot.
    pub fn counts(&self) -> Result<TableCounts> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        Ok(TableCounts {
            images: txn.open_table(IMAGES).map_err(storage_err)?.len().map_err(storage_err)?,
            islands: txn.open_table(ISLANDS).map_err(storage_err)?.len().map_err(storage_err)?,
            detections: txn
                .open_table(DETECTIONS)
                .map_err(storage_err)?
                .len()
                .map_err(storage_err)?,
            assocs: txn.open_table(ASSOCS).map_err(storage_err)?.len().map_err(storage_err)?,
            matches: txn.open_table(MATCHES).map_err(storage_err)?.len().map_err(storage_err)?,
            uniqueness: txn
                .open_table(UNIQUENESS)
                .map_err(storage_err)?
                .len()
                .map_err(storage_err)?,
        })
    }
}

// =============================================================================
// TABLES OVER A TRANSACTION
// =============================================================================

/// The transaction a `RedbTables` view runs in.
#[derive(Clone, Copy)]
enum Txn<'txn> {
    Read(&'txn ReadTransaction),
    Write(&'txn WriteTransaction),
}

/// Open `$def` in whichever transaction `$txn` holds and evaluate `$body`
/// with the table bound to `$table`. Both table types are `ReadableTable`.
macro_rules! with_table {
    ($txn:expr, $def:expr, |$table:ident| $body:expr) => {
        match $txn {
            Txn::Read(txn) => {
                let $table = txn.open_table($def).map_err(storage_err)?;
                $body
            }
            Txn::Write(txn) => {
                let $table = txn.open_table($def).map_err(storage_err)?;
                $body
            }
        }
    };
}

/// `Tables` view of one redb transaction.
///
/// A view over a read transaction answers every query; its mutators fail.
pub struct RedbTables<'txn> {
    txn: Txn<'txn>,
}

impl RedbTables<'_> {
    fn writer(&self) -> Result<&WriteTransaction> {
        match self.txn {
            Txn::Write(txn) => Ok(txn),
            Txn::Read(_) => Err(RadassocError::IoError(
                "write attempted in a read transaction".to_string(),
            )),
        }
    }

    fn allocate(&mut self, key: &str) -> Result<u64> {
        let mut meta = self.writer()?.open_table(METADATA).map_err(storage_err)?;
        let last = meta
            .get(key)
            .map_err(storage_err)?
            .map(|v| v.value())
            .unwrap_or(0);
        let next = last + 1;
        meta.insert(key, next).map_err(storage_err)?;
        Ok(next)
    }

    fn read_row<T: DeserializeOwned>(
        &self,
        def: TableDefinition<u64, &[u8]>,
        id: u64,
    ) -> Result<Option<T>> {
        with_table!(self.txn, def, |table| {
            let guard = table.get(id).map_err(storage_err)?;
            guard.map(|g| decode(g.value())).transpose()
        })
    }

    fn read_all<T: DeserializeOwned>(&self, def: TableDefinition<u64, &[u8]>) -> Result<Vec<T>> {
        with_table!(self.txn, def, |table| {
            let mut rows = Vec::new();
            for entry in table.iter().map_err(storage_err)? {
                let (_, value) = entry.map_err(storage_err)?;
                rows.push(decode(value.value())?);
            }
            Ok(rows)
        })
    }

    /// Rows of a table keyed by `(image id, sub id)` for one image.
    fn rows_of_image<T: DeserializeOwned>(
        &self,
        def: TableDefinition<(u64, u32), &[u8]>,
        image: ImageId,
    ) -> Result<Vec<T>> {
        with_table!(self.txn, def, |table| {
            let mut rows = Vec::new();
            for entry in table
                .range((image.0, 0)..=(image.0, u32::MAX))
                .map_err(storage_err)?
            {
                let (_, value) = entry.map_err(storage_err)?;
                rows.push(decode(value.value())?);
            }
            Ok(rows)
        })
    }

    fn detections_in(&self, keys: &[(u64, u32)]) -> Result<Vec<Detection>> {
        with_table!(self.txn, DETECTIONS, |table| {
            let mut rows = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(guard) = table.get(*key).map_err(storage_err)? {
                    rows.push(decode(guard.value())?);
                }
            }
            Ok(rows)
        })
    }

    fn scan_matches(&self, lo: (u64, u32, u64), hi: (u64, u32, u64)) -> Result<Vec<CatalogMatch>> {
        with_table!(self.txn, MATCHES, |table| {
            let mut rows = Vec::new();
            for entry in table.range(lo..=hi).map_err(storage_err)? {
                let (key, value) = entry.map_err(storage_err)?;
                let (assoc, catalog, catalog_src) = key.value();
                rows.push(CatalogMatch {
                    catalog: CatalogId(catalog),
                    catalog_src,
                    assoc: AssocId(assoc),
                    de_ruiter: value.value(),
                });
            }
            Ok(rows)
        })
    }

    fn scan_uniqueness(&self, lo: (u64, u64), hi: (u64, u64)) -> Result<Vec<UniquenessRecord>> {
        with_table!(self.txn, UNIQUENESS, |table| {
            let mut rows = Vec::new();
            for entry in table.range(lo..=hi).map_err(storage_err)? {
                let (key, value) = entry.map_err(storage_err)?;
                let (assoc, image) = key.value();
                rows.push(UniquenessRecord {
                    image: ImageId(image),
                    assoc: AssocId(assoc),
                    detected: value.value(),
                });
            }
            Ok(rows)
        })
    }
}

impl Tables for RedbTables<'_> {
    fn next_image_id(&mut self) -> Result<ImageId> {
        self.allocate(NEXT_IMAGE_ID).map(ImageId)
    }

    fn image(&self, id: ImageId) -> Result<Option<Image>> {
        self.read_row(IMAGES, id.0)
    }

    fn image_by_filename(&self, filename: &str) -> Result<Option<Image>> {
        let id = with_table!(self.txn, IMAGE_FILENAMES, |index| {
            index.get(filename).map_err(storage_err)?.map(|v| v.value())
        });
        match id {
            Some(id) => self.read_row(IMAGES, id),
            None => Ok(None),
        }
    }

    fn images(&self) -> Result<Vec<Image>> {
        self.read_all(IMAGES)
    }

    fn put_image(&mut self, image: &Image) -> Result<()> {
        let old: Option<Image> = self.read_row(IMAGES, image.id.0)?;
        let bytes = encode(image)?;
        let txn = self.writer()?;
        let mut rows = txn.open_table(IMAGES).map_err(storage_err)?;
        let mut index = txn.open_table(IMAGE_FILENAMES).map_err(storage_err)?;
        if let Some(old) = old.filter(|o| o.filename != image.filename) {
            index.remove(old.filename.as_str()).map_err(storage_err)?;
        }
        index
            .insert(image.filename.as_str(), image.id.0)
            .map_err(storage_err)?;
        rows.insert(image.id.0, bytes.as_slice()).map_err(storage_err)?;
        Ok(())
    }

    fn delete_image_row(&mut self, id: ImageId) -> Result<bool> {
        let old: Option<Image> = self.read_row(IMAGES, id.0)?;
        let Some(old) = old else {
            return Ok(false);
        };
        let txn = self.writer()?;
        let mut rows = txn.open_table(IMAGES).map_err(storage_err)?;
        let mut index = txn.open_table(IMAGE_FILENAMES).map_err(storage_err)?;
        rows.remove(id.0).map_err(storage_err)?;
        index.remove(old.filename.as_str()).map_err(storage_err)?;
        Ok(true)
    }

    fn insert_island(&mut self, island: &Island) -> Result<bool> {
        let key = (island.key.image.0, island.key.isl_id);
        let mut table = self.writer()?.open_table(ISLANDS).map_err(storage_err)?;
        if table.get(key).map_err(storage_err)?.is_some() {
            return Ok(false);
        }
        let bytes = encode(island)?;
        table.insert(key, bytes.as_slice()).map_err(storage_err)?;
        Ok(true)
    }

    fn islands_of(&self, image: ImageId) -> Result<Vec<Island>> {
        self.rows_of_image(ISLANDS, image)
    }

    fn delete_islands_of(&mut self, image: ImageId) -> Result<usize> {
        let mut table = self.writer()?.open_table(ISLANDS).map_err(storage_err)?;
        let keys: Vec<(u64, u32)> = {
            let mut keys = Vec::new();
            for entry in table
                .range((image.0, 0)..=(image.0, u32::MAX))
                .map_err(storage_err)?
            {
                let (key, _) = entry.map_err(storage_err)?;
                keys.push(key.value());
            }
            keys
        };
        for key in &keys {
            table.remove(*key).map_err(storage_err)?;
        }
        Ok(keys.len())
    }

    fn put_detection(&mut self, detection: &Detection) -> Result<()> {
        let key = (detection.key.image.0, detection.key.src_id);
        let bytes = encode(detection)?;
        let txn = self.writer()?;
        let mut rows = txn.open_table(DETECTIONS).map_err(storage_err)?;
        let mut by_assoc = txn.open_table(ASSOC_DETECTIONS).map_err(storage_err)?;

        let old_assoc = match rows.get(key).map_err(storage_err)? {
            Some(guard) => decode::<Detection>(guard.value())?.assoc_id,
            None => None,
        };
        if let Some(assoc) = old_assoc {
            by_assoc.remove((assoc.0, key.0, key.1)).map_err(storage_err)?;
        }
        if let Some(assoc) = detection.assoc_id {
            by_assoc.insert((assoc.0, key.0, key.1), ()).map_err(storage_err)?;
        }
        rows.insert(key, bytes.as_slice()).map_err(storage_err)?;
        Ok(())
    }

    fn detection(&self, key: DetectionKey) -> Result<Option<Detection>> {
        Ok(self.detections_in(&[(key.image.0, key.src_id)])?.pop())
    }

    fn detections_of(&self, image: ImageId) -> Result<Vec<Detection>> {
        self.rows_of_image(DETECTIONS, image)
    }

    fn detections_of_assoc(&self, assoc: AssocId) -> Result<Vec<Detection>> {
        let keys: Vec<(u64, u32)> = with_table!(self.txn, ASSOC_DETECTIONS, |index| {
            let mut keys = Vec::new();
            for entry in index
                .range((assoc.0, 0, 0)..=(assoc.0, u64::MAX, u32::MAX))
                .map_err(storage_err)?
            {
                let (key, _) = entry.map_err(storage_err)?;
                let (_, image, src) = key.value();
                keys.push((image, src));
            }
            keys
        });
        self.detections_in(&keys)
    }

    fn all_detections(&self) -> Result<Vec<Detection>> {
        with_table!(self.txn, DETECTIONS, |table| {
            let mut rows = Vec::new();
            for entry in table.iter().map_err(storage_err)? {
                let (_, value) = entry.map_err(storage_err)?;
                rows.push(decode(value.value())?);
            }
            Ok(rows)
        })
    }

    fn delete_detection(&mut self, key: DetectionKey) -> Result<bool> {
        let key = (key.image.0, key.src_id);
        let txn = self.writer()?;
        let mut rows = txn.open_table(DETECTIONS).map_err(storage_err)?;
        let old = match rows.remove(key).map_err(storage_err)? {
            Some(guard) => decode::<Detection>(guard.value())?,
            None => return Ok(false),
        };
        if let Some(assoc) = old.assoc_id {
            let mut by_assoc = txn.open_table(ASSOC_DETECTIONS).map_err(storage_err)?;
            by_assoc.remove((assoc.0, key.0, key.1)).map_err(storage_err)?;
        }
        Ok(true)
    }

    fn next_assoc_id(&mut self) -> Result<AssocId> {
        self.allocate(NEXT_ASSOC_ID).map(AssocId)
    }

    fn assoc(&self, id: AssocId) -> Result<Option<AssociatedSource>> {
        self.read_row(ASSOCS, id.0)
    }

    fn put_assoc(&mut self, source: &AssociatedSource) -> Result<()> {
        let old: Option<AssociatedSource> = self.read_row(ASSOCS, source.id.0)?;
        let bytes = encode(source)?;
        let txn = self.writer()?;
        let mut rows = txn.open_table(ASSOCS).map_err(storage_err)?;
        let mut zones = txn.open_table(ASSOC_ZONES).map_err(storage_err)?;
        if let Some(old) = old {
            zones
                .remove(index_key(old.ra.value, old.dec.value, old.id.0))
                .map_err(storage_err)?;
        }
        zones
            .insert(index_key(source.ra.value, source.dec.value, source.id.0), ())
            .map_err(storage_err)?;
        rows.insert(source.id.0, bytes.as_slice()).map_err(storage_err)?;
        Ok(())
    }

    fn delete_assoc(&mut self, id: AssocId) -> Result<bool> {
        let old: Option<AssociatedSource> = self.read_row(ASSOCS, id.0)?;
        let Some(old) = old else {
            return Ok(false);
        };
        let txn = self.writer()?;
        let mut rows = txn.open_table(ASSOCS).map_err(storage_err)?;
        let mut zones = txn.open_table(ASSOC_ZONES).map_err(storage_err)?;
        rows.remove(id.0).map_err(storage_err)?;
        zones
            .remove(index_key(old.ra.value, old.dec.value, old.id.0))
            .map_err(storage_err)?;
        Ok(true)
    }

    fn assocs_near(&self, ra: f64, dec: f64, radius: f64) -> Result<Vec<AssociatedSource>> {
        let ids: BTreeSet<u64> = with_table!(self.txn, ASSOC_ZONES, |zones| {
            let mut ids = BTreeSet::new();
            for span in cone_spans(ra, dec, radius) {
                for entry in zones
                    .range((span.zone, span.ra_lo, 0)..=(span.zone, span.ra_hi, u64::MAX))
                    .map_err(storage_err)?
                {
                    let (key, _) = entry.map_err(storage_err)?;
                    ids.insert(key.value().2);
                }
            }
            ids
        });
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            let source: Option<AssociatedSource> = self.read_row(ASSOCS, id)?;
            if let Some(source) = source
                .filter(|s| angular_separation(ra, dec, s.ra.value, s.dec.value) <= radius)
            {
                found.push(source);
            }
        }
        Ok(found)
    }

    fn all_assocs(&self) -> Result<Vec<AssociatedSource>> {
        self.read_all(ASSOCS)
    }

    fn insert_match(&mut self, m: &CatalogMatch) -> Result<bool> {
        let key = (m.assoc.0, m.catalog.0, m.catalog_src);
        let txn = self.writer()?;
        let mut table = txn.open_table(MATCHES).map_err(storage_err)?;
        if table.get(key).map_err(storage_err)?.is_some() {
            return Ok(false);
        }
        let mut by_catalog = txn.open_table(CATALOG_MATCHES).map_err(storage_err)?;
        table.insert(key, m.de_ruiter).map_err(storage_err)?;
        by_catalog
            .insert((m.catalog.0, m.catalog_src, m.assoc.0), ())
            .map_err(storage_err)?;
        Ok(true)
    }

    fn matches_of_assoc(&self, assoc: AssocId) -> Result<Vec<CatalogMatch>> {
        self.scan_matches((assoc.0, 0, 0), (assoc.0, u32::MAX, u64::MAX))
    }

    fn matches_of_catalog(&self, catalog: CatalogId) -> Result<Vec<CatalogMatch>> {
        let keys: Vec<(u64, u32, u64)> = with_table!(self.txn, CATALOG_MATCHES, |index| {
            let mut keys = Vec::new();
            for entry in index
                .range((catalog.0, 0, 0)..=(catalog.0, u64::MAX, u64::MAX))
                .map_err(storage_err)?
            {
                let (key, _) = entry.map_err(storage_err)?;
                let (_, catalog_src, assoc) = key.value();
                keys.push((assoc, catalog.0, catalog_src));
            }
            keys
        });
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            rows.extend(self.scan_matches(key, key)?);
        }
        Ok(rows)
    }

    fn delete_match(
        &mut self,
        catalog: CatalogId,
        catalog_src: u64,
        assoc: AssocId,
    ) -> Result<bool> {
        let txn = self.writer()?;
        let mut table = txn.open_table(MATCHES).map_err(storage_err)?;
        let mut by_catalog = txn.open_table(CATALOG_MATCHES).map_err(storage_err)?;
        let removed = table
            .remove((assoc.0, catalog.0, catalog_src))
            .map_err(storage_err)?
            .is_some();
        by_catalog
            .remove((catalog.0, catalog_src, assoc.0))
            .map_err(storage_err)?;
        Ok(removed)
    }

    fn all_matches(&self) -> Result<Vec<CatalogMatch>> {
        self.scan_matches((0, 0, 0), (u64::MAX, u32::MAX, u64::MAX))
    }

    fn put_uniqueness(&mut self, record: &UniquenessRecord) -> Result<()> {
        let txn = self.writer()?;
        let mut table = txn.open_table(UNIQUENESS).map_err(storage_err)?;
        let mut by_image = txn.open_table(IMAGE_UNIQUENESS).map_err(storage_err)?;
        table
            .insert((record.assoc.0, record.image.0), record.detected)
            .map_err(storage_err)?;
        by_image
            .insert((record.image.0, record.assoc.0), ())
            .map_err(storage_err)?;
        Ok(())
    }

    fn uniqueness(&self, image: ImageId, assoc: AssocId) -> Result<Option<UniquenessRecord>> {
        Ok(self
            .scan_uniqueness((assoc.0, image.0), (assoc.0, image.0))?
            .pop())
    }

    fn uniqueness_of_assoc(&self, assoc: AssocId) -> Result<Vec<UniquenessRecord>> {
        self.scan_uniqueness((assoc.0, 0), (assoc.0, u64::MAX))
    }

    fn uniqueness_of_image(&self, image: ImageId) -> Result<Vec<UniquenessRecord>> {
        let assocs: Vec<u64> = with_table!(self.txn, IMAGE_UNIQUENESS, |index| {
            let mut assocs = Vec::new();
            for entry in index
                .range((image.0, 0)..=(image.0, u64::MAX))
                .map_err(storage_err)?
            {
                let (key, _) = entry.map_err(storage_err)?;
                assocs.push(key.value().1);
            }
            assocs
        });
        let mut rows = Vec::with_capacity(assocs.len());
        for assoc in assocs {
            rows.extend(self.scan_uniqueness((assoc, image.0), (assoc, image.0))?);
        }
        Ok(rows)
    }

    fn delete_uniqueness(&mut self, image: ImageId, assoc: AssocId) -> Result<bool> {
        let txn = self.writer()?;
        let mut table = txn.open_table(UNIQUENESS).map_err(storage_err)?;
        let mut by_image = txn.open_table(IMAGE_UNIQUENESS).map_err(storage_err)?;
        let removed = table
            .remove((assoc.0, image.0))
            .map_err(storage_err)?
            .is_some();
        by_image.remove((image.0, assoc.0)).map_err(storage_err)?;
        Ok(removed)
    }

    fn all_uniqueness(&self) -> Result<Vec<UniquenessRecord>> {
        self.scan_uniqueness((0, 0), (u64::MAX, u64::MAX))
    }

    fn next_run_id(&mut self) -> Result<u64> {
        self.allocate(NEXT_RUN_ID)
    }

    fn put_run(&mut self, run: &RunRecord) -> Result<()> {
        let bytes = encode(run)?;
        let mut table = self.writer()?.open_table(RUNS).map_err(storage_err)?;
        table.insert(run.id, bytes.as_slice()).map_err(storage_err)?;
        Ok(())
    }

    fn runs(&self) -> Result<Vec<RunRecord>> {
        self.read_all(RUNS)
    }
}
