// src/lib.rs

//! buildreq-prune finds build requirements a source package declares but
//! does not need: it rebuilds the package with candidate requirements
//! forcibly withheld and compares the built binary packages against a
//! reference build with format-aware, timestamp-insensitive rules.

pub mod chroot;
pub mod cli;
pub mod content;
mod error;
pub mod minimize;
pub mod package;
pub mod runner;

pub use error::{Error, Result};
