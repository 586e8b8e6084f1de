// src/error.rs

//! Crate-wide error type
//!
//! Recoverable probe conditions (install-phase failures, unknown file
//! formats, header or file mismatches) are ordinary return values inside
//! the search; everything here surfaces to the driver, which logs and
//! exits.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read package {path}: {detail}")]
    PackageRead { path: PathBuf, detail: String },

    #[error("{path} is not a source package")]
    NotSourcePackage { path: PathBuf },

    #[error("required tool not found on PATH: {0}")]
    MissingTool(&'static str),

    #[error("{tool} failed on {path}: {detail}")]
    Inspector {
        tool: &'static str,
        path: PathBuf,
        detail: String,
    },

    #[error("failed to read archive {path}: {detail}")]
    Archive { path: PathBuf, detail: String },

    #[error("failed to extract {path}: {detail}")]
    Unpack { path: PathBuf, detail: String },

    #[error("mock {phase} failed in root {root}: {detail}")]
    Chroot {
        phase: &'static str,
        root: String,
        detail: String,
    },

    #[error("failed to synthesize marker package {name}: {detail}")]
    Marker { name: String, detail: String },

    #[error("reference build failed: {0}")]
    ReferenceBuild(String),

    #[error("reference builds are not reproducible")]
    NotReproducible,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
