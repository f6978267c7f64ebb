// ========================================================================================
//
//                               Failure taxonomy for the core
//
// ========================================================================================
//
// Every failure is fatal to the container, variant or pass that raised it. Nothing in
// the core retries; a caller that wants a retry does it at the file level.

use crate::types::VariantIdentity;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BgenError>;

#[derive(Debug, Error)]
pub enum BgenError {
    /// Bad magic, truncated header, unsupported compression or a sample block that
    /// disagrees with the header.
    #[error("invalid BGEN container '{}': {message}", path.display())]
    ContainerFormat { path: PathBuf, message: String },

    /// A single variant's payload could not be decoded.
    #[error("invalid variant block: {message}")]
    VariantFormat { message: String },

    /// A wire value that is recognized but deliberately not implemented.
    #[error("unsupported BGEN feature: {0}")]
    UnsupportedFeature(String),

    /// Raised once the whole build pass has finished. `valid` lists every catalogued
    /// identity that was seen exactly once, in scan order, so a caller can restrict a
    /// re-run to it.
    #[error(
        "{} duplicated variant identities detected (first: {}); {} unique identities remain",
        duplicates.len(),
        duplicates.first().map(String::as_str).unwrap_or("?"),
        valid.len()
    )]
    DuplicateIdentity {
        duplicates: Vec<String>,
        valid: Vec<VariantIdentity>,
    },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl BgenError {
    pub fn container(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ContainerFormat {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn variant(message: impl Into<String>) -> Self {
        Self::VariantFormat {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
