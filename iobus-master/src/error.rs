//! Top-level error type aggregating every fallible subsystem
//!
//! Individual operations return their own typed error ([`SdoClientError`], [`LssError`],
//! [`IspError`], [`CacheError`], [`ConfigError`]); this exists for callers who want one
//! type to bubble up through, e.g. a CLI `main()`.

use snafu::Snafu;

use crate::discovery_cache::CacheError;
use crate::isp_flasher::IspError;
use crate::lss_master::LssError;
use crate::sdo_client::SdoClientError;
use crate::ConfigError;

/// Any error that can originate from this crate's operations
#[derive(Debug, Snafu)]
pub enum MasterError {
    /// An SDO transaction failed
    #[snafu(display("SDO error: {source}"))]
    Sdo {
        /// The underlying SDO client error
        source: SdoClientError,
    },
    /// An LSS transaction failed
    #[snafu(display("LSS error: {source}"))]
    Lss {
        /// The underlying LSS master error
        source: LssError,
    },
    /// An ISP flashing operation failed
    #[snafu(display("ISP error: {source}"))]
    Isp {
        /// The underlying ISP flasher error
        source: IspError,
    },
    /// The discovery cache file could not be read or written
    #[snafu(display("Discovery cache error: {source}"))]
    Cache {
        /// The underlying cache error
        source: CacheError,
    },
    /// The configuration file could not be loaded
    #[snafu(display("Configuration error: {source}"))]
    Config {
        /// The underlying config error
        source: ConfigError,
    },
}

impl From<SdoClientError> for MasterError {
    fn from(source: SdoClientError) -> Self {
        Self::Sdo { source }
    }
}

impl From<LssError> for MasterError {
    fn from(source: LssError) -> Self {
        Self::Lss { source }
    }
}

impl From<IspError> for MasterError {
    fn from(source: IspError) -> Self {
        Self::Isp { source }
    }
}

impl From<CacheError> for MasterError {
    fn from(source: CacheError) -> Self {
        Self::Cache { source }
    }
}

impl From<ConfigError> for MasterError {
    fn from(source: ConfigError) -> Self {
        Self::Config { source }
    }
}
