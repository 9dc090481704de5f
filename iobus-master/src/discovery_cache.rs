//! On-disk cache of previously-seen factory addresses
//!
//! Speeds up fast-scan convergence on subsequent boots by biasing the bit-search start/mask
//! to the already-known address space (see [`crate::lss_master::LssMaster::fast_scan`]).
//! Persisted as a flat JSON array of 4-tuples.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use iobus_common::lss::LssIdentity;

/// Error returned by [`DiscoveryCache`] I/O
#[derive(Debug, Snafu)]
pub enum CacheError {
    /// Failed to read or write the cache file
    #[snafu(display("IO error accessing cache file {path}: {source}"))]
    Io {
        /// The path that failed
        path: String,
        /// The underlying IO error
        source: std::io::Error,
    },
    /// The cache file contents couldn't be parsed as JSON
    #[snafu(display("Error parsing cache file JSON: {source}"))]
    Json {
        /// The underlying parse error
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawAddress(u32, u32, u32, u32);

impl From<LssIdentity> for RawAddress {
    fn from(id: LssIdentity) -> Self {
        Self(id.vendor_id, id.product_code, id.revision, id.serial)
    }
}

impl From<RawAddress> for LssIdentity {
    fn from(raw: RawAddress) -> Self {
        LssIdentity::new(raw.0, raw.1, raw.2, raw.3)
    }
}

/// A persisted set of factory addresses seen on previous scans
#[derive(Debug, Clone, Default)]
pub struct DiscoveryCache {
    addresses: Vec<LssIdentity>,
}

impl DiscoveryCache {
    /// Load a cache from a file
    ///
    /// A missing file is treated as an empty cache. Unparsable content is logged and treated
    /// as empty, rather than failing discovery outright.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Vec<RawAddress>>(&content) {
                Ok(raw) => Self {
                    addresses: raw.into_iter().map(Into::into).collect(),
                },
                Err(e) => {
                    log::warn!("Discovery cache {} is not valid JSON: {e}", path.display());
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                log::warn!("Failed to read discovery cache {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// All cached addresses
    pub fn addresses(&self) -> &[LssIdentity] {
        &self.addresses
    }

    /// Record a newly-seen address, if not already present
    pub fn observe(&mut self, id: LssIdentity) {
        if !self.addresses.contains(&id) {
            self.addresses.push(id);
        }
    }

    /// Write the cache to disk atomically (write-temp, then rename)
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CacheError> {
        let path = path.as_ref();
        let raw: Vec<RawAddress> = self.addresses.iter().copied().map(Into::into).collect();
        let content = serde_json::to_string_pretty(&raw).context(JsonSnafu)?;

        let tmp_path: PathBuf = path.with_extension("tmp");
        std::fs::write(&tmp_path, content).context(IoSnafu {
            path: tmp_path.to_string_lossy(),
        })?;
        std::fs::rename(&tmp_path, path).context(IoSnafu {
            path: path.to_string_lossy(),
        })?;
        Ok(())
    }

    /// Compute a bit-search bias `(start, mask)` from the cached addresses
    ///
    /// Bits that agree across every cached address are fixed in `start`/`mask`; bits that
    /// differ (or no addresses are cached yet) are left unknown (`mask` bit 0).
    pub fn bias(&self) -> Option<([u32; 4], [u32; 4])> {
        let mut iter = self.addresses.iter();
        let first = iter.next()?;
        let mut start = [
            first.vendor_id,
            first.product_code,
            first.revision,
            first.serial,
        ];
        let mut mask = [u32::MAX; 4];

        for id in iter {
            let fields = [id.vendor_id, id.product_code, id.revision, id.serial];
            for i in 0..4 {
                let disagreement = start[i] ^ fields[i];
                mask[i] &= !disagreement;
            }
        }
        Some((start_masked(&mut start, &mask), mask))
    }
}

fn start_masked(start: &mut [u32; 4], mask: &[u32; 4]) -> [u32; 4] {
    for i in 0..4 {
        start[i] &= mask[i];
    }
    *start
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("iobus-discovery-cache-test-{}.json", std::process::id()));

        let mut cache = DiscoveryCache::default();
        cache.observe(LssIdentity::new(0x507, 2, 3, 12345));
        cache.save_to_file(&path).unwrap();

        let loaded = DiscoveryCache::load_from_file(&path);
        assert_eq!(loaded.addresses().len(), 1);
        assert_eq!(loaded.addresses()[0].serial, 12345);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_empty() {
        let cache = DiscoveryCache::load_from_file("/nonexistent/path/to/cache.json");
        assert!(cache.addresses().is_empty());
    }

    #[test]
    fn bias_agrees_on_shared_bits_only() {
        let mut cache = DiscoveryCache::default();
        cache.observe(LssIdentity::new(0x507, 2, 3, 0x1000));
        cache.observe(LssIdentity::new(0x507, 2, 3, 0x2000));

        let (start, mask) = cache.bias().unwrap();
        // vendor/product/revision agree fully
        assert_eq!(mask[0], u32::MAX);
        assert_eq!(start[0], 0x507);
        // serial disagrees in some bits, so those bits are unmasked
        assert_ne!(mask[3], u32::MAX);
    }
}
