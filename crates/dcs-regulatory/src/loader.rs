//! # Bundle File Loader
//!
//! Loads bundle JSON files named `<bundle_id>@<version>.json`. The filename
//! must agree with the payload so a renamed file cannot smuggle a different
//! bundle identity past review. Directory loads are sorted by path, which
//! keeps import order (and therefore import logs) deterministic.

use std::path::{Path, PathBuf};

use thiserror::Error;

use dcs_core::ContentDigest;

use crate::schema::{bundle_checksum, parse_bundle, Bundle, BundleError};

/// Loader failures.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// The file could not be read.
    #[error("cannot read bundle file {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The payload failed schema validation.
    #[error("invalid bundle in {path}: {source}")]
    Invalid {
        /// Offending path.
        path: PathBuf,
        /// Underlying validation error.
        source: BundleError,
    },

    /// The filename does not match `<bundle_id>@<version>.json` for the
    /// payload it contains.
    #[error("bundle filename {filename:?} does not match payload identity {expected:?}")]
    FilenameMismatch {
        /// Actual filename.
        filename: String,
        /// Expected filename derived from the payload.
        expected: String,
    },
}

/// Load, validate, and checksum one bundle file.
pub fn load_bundle_file(path: &Path) -> Result<(Bundle, ContentDigest), LoaderError> {
    let payload = std::fs::read_to_string(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let bundle = parse_bundle(&payload).map_err(|source| LoaderError::Invalid {
        path: path.to_path_buf(),
        source,
    })?;

    let expected = format!("{}@{}.json", bundle.bundle_id, bundle.version);
    let filename = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or_default()
        .to_string();
    if filename != expected {
        return Err(LoaderError::FilenameMismatch { filename, expected });
    }

    let checksum = bundle_checksum(&bundle).map_err(|source| LoaderError::Invalid {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((bundle, checksum))
}

/// Load every `*.json` bundle under a directory tree, sorted by path.
pub fn load_bundle_dir(root: &Path) -> Result<Vec<(Bundle, ContentDigest)>, LoaderError> {
    let mut paths = Vec::new();
    collect_json_files(root, &mut paths);
    paths.sort();

    let mut bundles = Vec::new();
    for path in paths {
        bundles.push(load_bundle_file(&path)?);
    }
    Ok(bundles)
}

fn collect_json_files(dir: &Path, acc: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_json_files(&path, acc);
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            acc.push(path);
        }
    }
}
