//! Engine configuration.
//!
//! The source system kept a process-global configuration singleton; here the
//! configuration is an explicit value attached to the [`Graph`](crate::graph::Graph)
//! so two graphs in one process can use different cache roots.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::checksum::ChecksumOptions;

/// Default cache root, relative to the invoking process's working directory.
pub const DEFAULT_CACHE_DIR: &str = ".alkymi_cache";

/// How external files referenced by `Value::Path` are fingerprinted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChecksumMethod {
    /// Hash the file's byte content (default).
    Content,
    /// Hash the file's modification stamp; faster but less precise.
    Mtime,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// When false, all disk persistence is disabled; outputs live only in
    /// the current session and every recipe reports not-evaluated-yet after
    /// a restart.
    pub cache: bool,
    /// Directory used as the cache root.
    pub cache_path: PathBuf,
    /// External-file hashing method.
    pub file_checksum_method: FileChecksumMethod,
    /// When false, opaque values error at checksum/serialize time.
    pub allow_opaque: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache: true,
            cache_path: PathBuf::from(DEFAULT_CACHE_DIR),
            file_checksum_method: FileChecksumMethod::Content,
            allow_opaque: true,
        }
    }
}

impl Config {
    /// Derives the options passed to the checksum functions.
    pub fn checksum_options(&self) -> ChecksumOptions {
        ChecksumOptions {
            file_method: self.file_checksum_method,
            allow_opaque: self.allow_opaque,
        }
    }
}
