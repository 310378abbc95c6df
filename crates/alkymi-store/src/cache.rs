//! Per-recipe cache directories with atomic metadata swap.
//!
//! Layout under the cache root:
//!
//! ```text
//! <cache_root>/<recipe-name>/
//!   meta.json            # evaluation record + output document
//!   <blob_hash_1>.bin    # sidecar blob
//!   <blob_hash_2>.bin
//!   ...
//! ```
//!
//! `meta.json` is written to a temporary name in the same directory and
//! renamed into place after all sidecar blobs have been flushed, so a crash
//! mid-store leaves the previous metadata intact. An unreadable or
//! schema-violating `meta.json` is treated as "not evaluated" rather than an
//! error, so a poisoned cache never blocks progress.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use alkymi_core::{ChecksumOptions, Config, EvalRecord, Value};

use crate::document::{encode_outputs, OutputHandle};
use crate::error::StoreError;

const META_FILE: &str = "meta.json";
const META_TMP: &str = "meta.json.tmp";

/// The content of a recipe's `meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    /// The evaluation record.
    pub record: EvalRecord,
    /// One output document per output value.
    pub outputs: Vec<Json>,
}

/// Maps a recipe name onto a directory-safe form.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Store for per-recipe cache directories under a single root.
///
/// The root is canonicalized at construction so relative and absolute
/// invocations of the same program share one cache. When caching is disabled
/// in the configuration, every operation is a no-op and loads return `None`.
pub struct CacheStore {
    root: Option<PathBuf>,
}

impl CacheStore {
    /// Opens (or creates) the cache root named by the configuration.
    pub fn new(config: &Config) -> Result<Self, StoreError> {
        if !config.cache {
            return Ok(CacheStore { root: None });
        }
        std::fs::create_dir_all(&config.cache_path)
            .map_err(|e| StoreError::io(&config.cache_path, e))?;
        let root = config
            .cache_path
            .canonicalize()
            .map_err(|e| StoreError::io(&config.cache_path, e))?;
        Ok(CacheStore { root: Some(root) })
    }

    /// A store that never persists anything (cache disabled).
    pub fn disabled() -> Self {
        CacheStore { root: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    /// The directory holding a recipe's cache entry, or `None` when caching
    /// is disabled.
    pub fn path_for(&self, recipe_name: &str) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|root| root.join(sanitize_name(recipe_name)))
    }

    fn read_meta(&self, recipe_name: &str) -> Option<CacheMeta> {
        let path = self.path_for(recipe_name)?.join(META_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable cache metadata");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt cache metadata");
                None
            }
        }
    }

    /// Reads only the evaluation record; `None` means "not evaluated".
    pub fn load_record(&self, recipe_name: &str) -> Option<EvalRecord> {
        self.read_meta(recipe_name).map(|meta| meta.record)
    }

    /// Returns lazy handles over the persisted outputs; blob payloads are
    /// not touched until a handle is loaded.
    pub fn load_output_handles(&self, recipe_name: &str) -> Option<Vec<OutputHandle>> {
        let dir = self.path_for(recipe_name)?;
        let meta = self.read_meta(recipe_name)?;
        Some(
            meta.outputs
                .into_iter()
                .map(|doc| OutputHandle::new(doc, dir.clone()))
                .collect(),
        )
    }

    /// Persists a recipe's record and outputs: blobs first, then the
    /// metadata document via temp-file + rename.
    ///
    /// A no-op when caching is disabled.
    pub fn store(
        &self,
        recipe_name: &str,
        record: &EvalRecord,
        outputs: &[Value],
        opts: &ChecksumOptions,
    ) -> Result<(), StoreError> {
        let Some(dir) = self.path_for(recipe_name) else {
            return Ok(());
        };
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let docs = encode_outputs(outputs, &dir, opts)?;
        let meta = CacheMeta {
            record: record.clone(),
            outputs: docs,
        };

        let text = serde_json::to_string_pretty(&meta)?;
        write_atomic(&dir, &text)?;
        tracing::debug!(recipe = recipe_name, dir = %dir.display(), "stored cache entry");
        Ok(())
    }
}

/// Writes `meta.json` through a temporary name in the same directory.
fn write_atomic(dir: &Path, text: &str) -> Result<(), StoreError> {
    let tmp = dir.join(META_TMP);
    let target = dir.join(META_FILE);
    std::fs::write(&tmp, text).map_err(|e| StoreError::io(&tmp, e))?;
    std::fs::rename(&tmp, &target).map_err(|e| StoreError::io(&target, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alkymi_core::checksum_outputs;
    use alkymi_core::Checksum;

    fn config_at(dir: &Path) -> Config {
        Config {
            cache_path: dir.join("cache"),
            ..Config::default()
        }
    }

    fn record_for(outputs: &[Value]) -> EvalRecord {
        let opts = ChecksumOptions::default();
        let (output_checksums, _) = checksum_outputs(outputs, &opts).unwrap();
        EvalRecord {
            ingredient_checksums: vec![],
            output_checksums,
            function_checksum: Checksum::from_bytes([0u8; 16]),
            foreach: None,
        }
    }

    #[test]
    fn store_and_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(&config_at(tmp.path())).unwrap();
        let opts = ChecksumOptions::default();

        let outputs = vec![Value::from(42i64), Value::Bytes(vec![1, 2, 3])];
        let record = record_for(&outputs);
        store.store("answer", &record, &outputs, &opts).unwrap();

        assert_eq!(store.load_record("answer"), Some(record));

        let handles = store.load_output_handles("answer").unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].load().unwrap(), Value::from(42i64));
        assert_eq!(handles[1].load().unwrap(), Value::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn missing_entry_loads_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(&config_at(tmp.path())).unwrap();
        assert!(store.load_record("nothing").is_none());
        assert!(store.load_output_handles("nothing").is_none());
    }

    #[test]
    fn corrupt_metadata_loads_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(&config_at(tmp.path())).unwrap();
        let dir = store.path_for("broken").unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(META_FILE), b"{ not json").unwrap();

        assert!(store.load_record("broken").is_none());
    }

    #[test]
    fn failed_store_leaves_previous_metadata_intact() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(&config_at(tmp.path())).unwrap();
        let opts = ChecksumOptions::default();

        let outputs = vec![Value::from("good")];
        let record = record_for(&outputs);
        store.store("entry", &record, &outputs, &opts).unwrap();

        // Second store fails while encoding (opaque refused), before the
        // metadata swap is attempted.
        let strict = ChecksumOptions {
            allow_opaque: false,
            ..ChecksumOptions::default()
        };
        let bad = vec![Value::Opaque {
            codec: "bincode".into(),
            bytes: vec![1],
        }];
        assert!(store.store("entry", &record, &bad, &strict).is_err());

        let handles = store.load_output_handles("entry").unwrap();
        assert_eq!(handles[0].load().unwrap(), Value::from("good"));
    }

    #[test]
    fn disabled_store_is_inert() {
        let store = CacheStore::disabled();
        let opts = ChecksumOptions::default();
        let outputs = vec![Value::from(1i64)];
        let record = record_for(&outputs);

        assert!(!store.is_enabled());
        assert!(store.path_for("x").is_none());
        store.store("x", &record, &outputs, &opts).unwrap();
        assert!(store.load_record("x").is_none());
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_name("plain-name_1.2"), "plain-name_1.2");
        assert_eq!(sanitize_name("weird/name: x"), "weird_name__x");
    }

    #[test]
    fn relative_and_absolute_roots_share_a_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let absolute = CacheStore::new(&config_at(tmp.path())).unwrap();

        // Re-open through a dot-relative path to the same directory.
        let dotted = tmp.path().join(".").join("cache");
        let relative = CacheStore::new(&Config {
            cache_path: dotted,
            ..Config::default()
        })
        .unwrap();

        assert_eq!(absolute.path_for("r"), relative.path_for("r"));
    }
}
