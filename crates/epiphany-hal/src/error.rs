// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for Epiphany host operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for HAL operations
pub type Result<T> = std::result::Result<T, HalError>;

/// Errors that can occur while reading an executable image
#[derive(Debug, Error)]
pub enum ImageError {
    /// Executable could not be read from disk
    #[error("Cannot read executable {path}: {source}")]
    Read {
        /// Path that was attempted
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Neither ELF nor any recognised legacy signature
    #[error("Executable header is not a valid ELF (starts with {magic:02x?})")]
    BadMagic {
        /// First bytes of the file
        magic: Vec<u8>,
    },

    /// Legacy S-record image
    #[error("SREC executables are deprecated and no longer supported; relink as ELF")]
    DeprecatedSrec,

    /// ELF image that is not 32-bit
    #[error("Unsupported ELF class: Epiphany cores only load 32-bit images")]
    UnsupportedClass,

    /// Header or program-header table does not fit in the file
    #[error("Malformed executable: {reason}")]
    Malformed {
        /// Reason for failure
        reason: String,
    },

    /// A program-header entry is inconsistent
    #[error("Bad program header {index}: {reason}")]
    BadSegment {
        /// Entry index in the program-header table
        index: usize,
        /// Reason for failure
        reason: String,
    },

    /// Header decoding failed
    #[error("ELF parse error: {source}")]
    Elf {
        /// Underlying goblin error
        #[from]
        source: goblin::error::Error,
    },
}

impl ImageError {
    /// Create a malformed-image error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Create a bad-segment error
    pub fn bad_segment(index: usize, reason: impl Into<String>) -> Self {
        Self::BadSegment {
            index,
            reason: reason.into(),
        }
    }
}

/// Errors that can occur during HAL operations
#[derive(Debug, Error)]
pub enum HalError {
    /// A device, mapping or memory segment could not be acquired
    #[error("Resource unavailable: {reason}")]
    Resource {
        /// Reason for failure
        reason: String,
    },

    /// Executable image rejected
    #[error("Executable format error: {source}")]
    Image {
        /// Underlying image error
        #[from]
        source: ImageError,
    },

    /// A host file could not be read
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File that was attempted
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// External memory does not permit the access
    #[error("Access denied: {reason}")]
    AccessDenied {
        /// Reason for failure
        reason: String,
    },

    /// A backend read or write failed
    #[error("Transfer failed: {reason}")]
    TransferFailed {
        /// Reason for failure
        reason: String,
    },

    /// An address range does not fit the region it targets
    #[error("Address range {addr:#010x}+{len:#x} outside {region}")]
    AddressRange {
        /// First address of the range
        addr: u32,
        /// Length of the range in bytes
        len: u32,
        /// Region the range was checked against
        region: String,
    },

    /// Workgroup coordinates are not on the platform or not in the group
    #[error("Invalid workgroup: {reason}")]
    InvalidGroup {
        /// Reason for failure
        reason: String,
    },

    /// Operation not valid in the current state
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// Bad configuration (platform description, environment)
    #[error("Configuration error: {reason}")]
    Config {
        /// Reason for failure
        reason: String,
    },
}

impl HalError {
    /// Create a resource error
    pub fn resource(reason: impl Into<String>) -> Self {
        Self::Resource {
            reason: reason.into(),
        }
    }

    /// Create an I/O error for `path`
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an access denied error
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }

    /// Create a transfer failed error
    pub fn transfer_failed(reason: impl Into<String>) -> Self {
        Self::TransferFailed {
            reason: reason.into(),
        }
    }

    /// Create an address range error
    pub fn address_range(addr: u32, len: u32, region: impl Into<String>) -> Self {
        Self::AddressRange {
            addr,
            len,
            region: region.into(),
        }
    }

    /// Create an invalid workgroup error
    pub fn invalid_group(reason: impl Into<String>) -> Self {
        Self::InvalidGroup {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// True for executable format errors
    pub const fn is_format_error(&self) -> bool {
        matches!(self, Self::Image { .. })
    }
}
