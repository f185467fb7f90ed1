//! # Catalog Cache Format
//!
//! Binary serialization of parsed reference catalogs, so large text
//! catalogs are parsed once and reloaded quickly on later runs.
//!
//! Format: Header (5 bytes) + postcard-serialized `Vec<CatalogSource>`.
//! - 4 bytes: Magic ("RCAT")
//! - 1 byte: Version
//!
//! The payload size is validated before deserialization.

use crate::primitives::{CACHE_FORMAT_VERSION, CACHE_MAGIC, MAX_CACHE_PAYLOAD_SIZE};
use crate::{CatalogSource, RadassocError, Result};

const HEADER_SIZE: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The cache header precedes all catalog data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl CacheHeader {
    /// Create a new header with current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *CACHE_MAGIC,
            version: CACHE_FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if &self.magic != CACHE_MAGIC {
            return Err(RadassocError::DeserializationError(
                "Invalid cache magic bytes".to_string(),
            ));
        }
        if self.version != CACHE_FORMAT_VERSION {
            return Err(RadassocError::DeserializationError(format!(
                "Unsupported cache version: {} (expected {})",
                self.version, CACHE_FORMAT_VERSION
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(RadassocError::DeserializationError(
                "Cache header too short".to_string(),
            ));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for CacheHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize catalog sources to bytes (header + payload).
pub fn catalog_to_bytes(sources: &[CatalogSource]) -> Result<Vec<u8>> {
    let payload = postcard::to_stdvec(&sources)
        .map_err(|e| RadassocError::SerializationError(e.to_string()))?;
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&CacheHeader::new().to_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Deserialize catalog sources from bytes, validating header and size first.
pub fn catalog_from_bytes(bytes: &[u8]) -> Result<Vec<CatalogSource>> {
    let header = CacheHeader::from_bytes(bytes)?;
    header.validate()?;
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() > MAX_CACHE_PAYLOAD_SIZE {
        return Err(RadassocError::DeserializationError(format!(
            "Cache payload of {} bytes exceeds maximum {}",
            payload.len(),
            MAX_CACHE_PAYLOAD_SIZE
        )));
    }
    postcard::from_bytes(payload).map_err(|e| RadassocError::DeserializationError(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{CatalogId, Measured};

    fn source(id: u64) -> CatalogSource {
        CatalogSource {
            catalog: CatalogId(2),
            id,
            name: Some(format!("J{:04}", id)),
            ra: Measured::new(10.0 + id as f64, 0.001),
            dec: Measured::new(-5.0, 0.001),
            total_flux: Some(Measured::new(12.5, 0.5)),
            peak_flux: None,
            maj: Some(45.0),
            min: None,
            pa: None,
            rms: Some(0.45),
            field: None,
        }
    }

    #[test]
    fn cache_preserves_sources() {
        let sources = vec![source(1), source(2), source(3)];
        let bytes = catalog_to_bytes(&sources).unwrap();
        assert_eq!(&bytes[0..4], CACHE_MAGIC);
        assert_eq!(catalog_from_bytes(&bytes).unwrap(), sources);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = catalog_to_bytes(&[source(1)]).unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            catalog_from_bytes(&bytes),
            Err(RadassocError::DeserializationError(_))
        ));
    }

    #[test]
    fn wrong_version_rejected() {
        let mut bytes = catalog_to_bytes(&[]).unwrap();
        bytes[4] = CACHE_FORMAT_VERSION + 1;
        assert!(catalog_from_bytes(&bytes).is_err());
        assert!(catalog_from_bytes(&bytes[..3]).is_err());
    }
}
