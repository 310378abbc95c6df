//! Output documents: the on-disk JSON form of values, with sidecar blobs.
//!
//! A value is persisted as a JSON tree mirroring its structure. JSON-native
//! primitives are inlined; binary payloads are replaced by the token
//! `"::blob::<hexhash>"` pointing to a content-addressed sidecar file
//! `<hexhash>.bin` in the same directory, where the hash is the payload's
//! own checksum. Containers recurse:
//!
//! - mappings become `{"__map__": [[key_doc, value_doc], ...]}` so that
//!   non-string keys survive
//! - sets become `{"__set__": [elem_doc, ...]}`
//! - file paths become `{"__path__": "<string>"}`
//! - opaque values become `{"__opaque__": "<codec>", "data": "::blob::..."}`
//! - non-finite floats become `{"__float__": "nan" | "inf" | "-inf"}`
//!   (JSON has no encoding for them)
//! - a literal string that starts with the blob token prefix is wrapped as
//!   `{"__str__": "<string>"}` so it cannot be mistaken for a reference
//!
//! Decoding returns [`OutputHandle`]s, not values: a handle defers reading
//! sidecar blobs until the value is consumed, so status checks work from
//! the metadata document alone.

use std::path::{Path, PathBuf};

use serde_json::Value as Json;

use alkymi_core::checksum::{self, tag, ChecksumOptions};
use alkymi_core::recipe::{DynError, IngredientSource};
use alkymi_core::{checksum_path, checksum_value, Checksum, Value};

use crate::error::StoreError;

/// Token prefix marking a sidecar blob reference.
pub const BLOB_PREFIX: &str = "::blob::";

const MAP_KEY: &str = "__map__";
const SET_KEY: &str = "__set__";
const PATH_KEY: &str = "__path__";
const OPAQUE_KEY: &str = "__opaque__";
const OPAQUE_DATA_KEY: &str = "data";
const FLOAT_KEY: &str = "__float__";
const STR_KEY: &str = "__str__";

/// File extension of sidecar blobs.
const BLOB_EXT: &str = "bin";

/// Builds a one-entry tagged object like `{"__map__": ...}`.
fn tagged(key: &str, value: Json) -> Json {
    let mut obj = serde_json::Map::with_capacity(1);
    obj.insert(key.to_owned(), value);
    Json::Object(obj)
}

fn blob_file(dir: &Path, checksum: Checksum) -> PathBuf {
    dir.join(format!("{}.{}", checksum.to_hex(), BLOB_EXT))
}

/// Writes a content-addressed blob, atomically, skipping existing files.
fn write_blob(dir: &Path, checksum: Checksum, bytes: &[u8]) -> Result<(), StoreError> {
    let target = blob_file(dir, checksum);
    if target.exists() {
        return Ok(());
    }
    let tmp = target.with_extension("tmp");
    std::fs::write(&tmp, bytes).map_err(|e| StoreError::io(&tmp, e))?;
    std::fs::rename(&tmp, &target).map_err(|e| StoreError::io(&target, e))?;
    Ok(())
}

/// Encodes a single value into its document form, writing sidecar blobs
/// into `dir` as needed.
pub fn encode_value(
    value: &Value,
    dir: &Path,
    opts: &ChecksumOptions,
) -> Result<Json, StoreError> {
    match value {
        Value::Null => Ok(Json::Null),
        Value::Bool(b) => Ok(Json::Bool(*b)),
        Value::Int(i) => Ok(Json::from(*i)),
        Value::Float(f) if f.is_finite() => Ok(Json::from(*f)),
        Value::Float(f) => {
            let text = if f.is_nan() {
                "nan"
            } else if *f > 0.0 {
                "inf"
            } else {
                "-inf"
            };
            Ok(tagged(FLOAT_KEY, Json::String(text.to_owned())))
        }
        Value::Str(s) if s.starts_with(BLOB_PREFIX) => {
            Ok(tagged(STR_KEY, Json::String(s.clone())))
        }
        Value::Str(s) => Ok(Json::String(s.clone())),
        Value::Bytes(bytes) => {
            let checksum = checksum::leaf(tag::BYTES, bytes);
            write_blob(dir, checksum, bytes)?;
            Ok(Json::String(format!("{}{}", BLOB_PREFIX, checksum.to_hex())))
        }
        Value::Seq(items) => {
            let docs = items
                .iter()
                .map(|item| encode_value(item, dir, opts))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Json::Array(docs))
        }
        Value::Map(entries) => {
            let pairs = entries
                .iter()
                .map(|(k, v)| {
                    Ok(Json::Array(vec![
                        encode_value(k, dir, opts)?,
                        encode_value(v, dir, opts)?,
                    ]))
                })
                .collect::<Result<Vec<_>, StoreError>>()?;
            Ok(tagged(MAP_KEY, Json::Array(pairs)))
        }
        Value::Set(items) => {
            let docs = items
                .iter()
                .map(|item| encode_value(item, dir, opts))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tagged(SET_KEY, Json::Array(docs)))
        }
        Value::Path(p) => Ok(tagged(
            PATH_KEY,
            Json::String(p.to_string_lossy().into_owned()),
        )),
        Value::Opaque { codec, bytes } => {
            if !opts.allow_opaque {
                return Err(StoreError::Checksum(
                    alkymi_core::CoreError::OpaqueDisabled {
                        codec: codec.clone(),
                    },
                ));
            }
            let checksum = checksum::leaf(tag::BYTES, bytes);
            write_blob(dir, checksum, bytes)?;
            let mut obj = serde_json::Map::with_capacity(2);
            obj.insert(OPAQUE_KEY.to_owned(), Json::String(codec.clone()));
            obj.insert(
                OPAQUE_DATA_KEY.to_owned(),
                Json::String(format!("{}{}", BLOB_PREFIX, checksum.to_hex())),
            );
            Ok(Json::Object(obj))
        }
    }
}

/// Encodes a full output tuple.
pub fn encode_outputs(
    outputs: &[Value],
    dir: &Path,
    opts: &ChecksumOptions,
) -> Result<Vec<Json>, StoreError> {
    outputs
        .iter()
        .map(|v| encode_value(v, dir, opts))
        .collect()
}

/// Parses a blob token into the referenced checksum.
fn parse_blob_token(text: &str) -> Option<Result<Checksum, StoreError>> {
    let hex = text.strip_prefix(BLOB_PREFIX)?;
    Some(Checksum::from_hex(hex).map_err(StoreError::from))
}

/// Reads a sidecar blob, reporting a missing file distinctly from other
/// I/O failures.
fn read_blob(path: &Path) -> Result<Vec<u8>, StoreError> {
    std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StoreError::BlobMissing {
                path: path.to_path_buf(),
            }
        } else {
            StoreError::io(path, e)
        }
    })
}

/// A lazily-deserialized output value: the document plus the directory its
/// sidecar blobs live in. Reading the payload happens only in [`Self::load`].
#[derive(Debug, Clone)]
pub struct OutputHandle {
    doc: Json,
    dir: PathBuf,
}

impl OutputHandle {
    pub fn new(doc: Json, dir: PathBuf) -> Self {
        OutputHandle { doc, dir }
    }

    pub fn document(&self) -> &Json {
        &self.doc
    }

    /// Materializes the value, reading sidecar blobs as needed.
    pub fn load(&self) -> Result<Value, StoreError> {
        decode_value(&self.doc, &self.dir)
    }

    /// Re-derives the value's checksum from the document alone.
    ///
    /// Blob tokens contribute their embedded content hash after a cheap
    /// existence check; `__path__` entries re-hash the external file now.
    /// This is what makes outputs-invalid detection possible without
    /// touching blob payloads.
    pub fn checksum(&self, opts: &ChecksumOptions) -> Result<Checksum, StoreError> {
        document_checksum(&self.doc, &self.dir, opts)
    }
}

/// Materializes a document into a value.
fn decode_value(doc: &Json, dir: &Path) -> Result<Value, StoreError> {
    match doc {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(StoreError::InvalidDocument {
                    reason: format!("unrepresentable number: {}", n),
                })
            }
        }
        Json::String(s) => match parse_blob_token(s) {
            Some(checksum) => {
                let path = blob_file(dir, checksum?);
                Ok(Value::Bytes(read_blob(&path)?))
            }
            None => Ok(Value::Str(s.clone())),
        },
        Json::Array(items) => {
            let values = items
                .iter()
                .map(|item| decode_value(item, dir))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Seq(values))
        }
        Json::Object(obj) => {
            if let Some(pairs) = obj.get(MAP_KEY) {
                let pairs = pairs.as_array().ok_or_else(|| StoreError::InvalidDocument {
                    reason: "__map__ is not an array".into(),
                })?;
                let mut entries = indexmap_with_capacity(pairs.len());
                for pair in pairs {
                    let kv = pair.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
                        StoreError::InvalidDocument {
                            reason: "__map__ entry is not a pair".into(),
                        }
                    })?;
                    entries.insert(decode_value(&kv[0], dir)?, decode_value(&kv[1], dir)?);
                }
                return Ok(Value::Map(entries));
            }
            if let Some(items) = obj.get(SET_KEY) {
                let items = items.as_array().ok_or_else(|| StoreError::InvalidDocument {
                    reason: "__set__ is not an array".into(),
                })?;
                let values = items
                    .iter()
                    .map(|item| decode_value(item, dir))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Value::Set(values));
            }
            if let Some(path) = obj.get(PATH_KEY) {
                let text = path.as_str().ok_or_else(|| StoreError::InvalidDocument {
                    reason: "__path__ is not a string".into(),
                })?;
                return Ok(Value::Path(PathBuf::from(text)));
            }
            if let Some(codec) = obj.get(OPAQUE_KEY) {
                let codec = codec.as_str().ok_or_else(|| StoreError::InvalidDocument {
                    reason: "__opaque__ is not a string".into(),
                })?;
                let token = obj
                    .get(OPAQUE_DATA_KEY)
                    .and_then(|d| d.as_str())
                    .ok_or_else(|| StoreError::InvalidDocument {
                        reason: "opaque document has no data token".into(),
                    })?;
                let checksum = parse_blob_token(token).ok_or_else(|| {
                    StoreError::InvalidDocument {
                        reason: "opaque data is not a blob token".into(),
                    }
                })??;
                let path = blob_file(dir, checksum);
                return Ok(Value::Opaque {
                    codec: codec.to_owned(),
                    bytes: read_blob(&path)?,
                });
            }
            if let Some(text) = obj.get(FLOAT_KEY) {
                let text = text.as_str().ok_or_else(|| StoreError::InvalidDocument {
                    reason: "__float__ is not a string".into(),
                })?;
                let f = match text {
                    "nan" => f64::NAN,
                    "inf" => f64::INFINITY,
                    "-inf" => f64::NEG_INFINITY,
                    other => {
                        return Err(StoreError::InvalidDocument {
                            reason: format!("unknown __float__ form: '{}'", other),
                        })
                    }
                };
                return Ok(Value::Float(f));
            }
            if let Some(text) = obj.get(STR_KEY) {
                let text = text.as_str().ok_or_else(|| StoreError::InvalidDocument {
                    reason: "__str__ is not a string".into(),
                })?;
                return Ok(Value::Str(text.to_owned()));
            }
            Err(StoreError::InvalidDocument {
                reason: format!("unrecognized document object with keys {:?}", obj.keys().collect::<Vec<_>>()),
            })
        }
    }
}

fn indexmap_with_capacity(n: usize) -> indexmap::IndexMap<Value, Value> {
    indexmap::IndexMap::with_capacity(n)
}

/// Re-derives a value checksum from its document form without reading blob
/// payloads. Must mirror `checksum_value` exactly for every kind.
fn document_checksum(
    doc: &Json,
    dir: &Path,
    opts: &ChecksumOptions,
) -> Result<Checksum, StoreError> {
    match doc {
        Json::Null => Ok(checksum_value(&Value::Null, opts)?),
        Json::Bool(b) => Ok(checksum_value(&Value::Bool(*b), opts)?),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(checksum_value(&Value::Int(i), opts)?)
            } else if let Some(f) = n.as_f64() {
                Ok(checksum_value(&Value::Float(f), opts)?)
            } else {
                Err(StoreError::InvalidDocument {
                    reason: format!("unrepresentable number: {}", n),
                })
            }
        }
        Json::String(s) => match parse_blob_token(s) {
            Some(checksum) => {
                let checksum = checksum?;
                let path = blob_file(dir, checksum);
                if !path.exists() {
                    return Err(StoreError::BlobMissing { path });
                }
                Ok(checksum)
            }
            None => Ok(checksum::leaf(tag::STR, s.as_bytes())),
        },
        Json::Array(items) => {
            let parts = items
                .iter()
                .map(|item| document_checksum(item, dir, opts))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(checksum::fold(tag::SEQ, parts.len(), parts))
        }
        Json::Object(obj) => {
            if let Some(pairs) = obj.get(MAP_KEY) {
                let pairs = pairs.as_array().ok_or_else(|| StoreError::InvalidDocument {
                    reason: "__map__ is not an array".into(),
                })?;
                let mut parts = Vec::with_capacity(pairs.len());
                for pair in pairs {
                    let kv = pair.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
                        StoreError::InvalidDocument {
                            reason: "__map__ entry is not a pair".into(),
                        }
                    })?;
                    let key = document_checksum(&kv[0], dir, opts)?;
                    let value = document_checksum(&kv[1], dir, opts)?;
                    parts.push((key, checksum::map_entry(key, value)));
                }
                parts.sort();
                return Ok(checksum::fold(
                    tag::MAP,
                    parts.len(),
                    parts.into_iter().map(|(_, e)| e),
                ));
            }
            if let Some(items) = obj.get(SET_KEY) {
                let items = items.as_array().ok_or_else(|| StoreError::InvalidDocument {
                    reason: "__set__ is not an array".into(),
                })?;
                let mut parts = items
                    .iter()
                    .map(|item| document_checksum(item, dir, opts))
                    .collect::<Result<Vec<_>, _>>()?;
                parts.sort();
                return Ok(checksum::fold(tag::SET, parts.len(), parts));
            }
            if let Some(path) = obj.get(PATH_KEY) {
                let text = path.as_str().ok_or_else(|| StoreError::InvalidDocument {
                    reason: "__path__ is not a string".into(),
                })?;
                return Ok(checksum_path(Path::new(text), opts)?);
            }
            if let Some(codec) = obj.get(OPAQUE_KEY) {
                let codec = codec.as_str().ok_or_else(|| StoreError::InvalidDocument {
                    reason: "__opaque__ is not a string".into(),
                })?;
                if !opts.allow_opaque {
                    return Err(StoreError::Checksum(
                        alkymi_core::CoreError::OpaqueDisabled {
                            codec: codec.to_owned(),
                        },
                    ));
                }
                let token = obj
                    .get(OPAQUE_DATA_KEY)
                    .and_then(|d| d.as_str())
                    .ok_or_else(|| StoreError::InvalidDocument {
                        reason: "opaque document has no data token".into(),
                    })?;
                let bytes_checksum = parse_blob_token(token).ok_or_else(|| {
                    StoreError::InvalidDocument {
                        reason: "opaque data is not a blob token".into(),
                    }
                })??;
                let path = blob_file(dir, bytes_checksum);
                if !path.exists() {
                    return Err(StoreError::BlobMissing { path });
                }
                return Ok(checksum::checksum_opaque(codec, bytes_checksum));
            }
            if let Some(text) = obj.get(FLOAT_KEY) {
                let text = text.as_str().ok_or_else(|| StoreError::InvalidDocument {
                    reason: "__float__ is not a string".into(),
                })?;
                let f = match text {
                    "nan" => f64::NAN,
                    "inf" => f64::INFINITY,
                    "-inf" => f64::NEG_INFINITY,
                    other => {
                        return Err(StoreError::InvalidDocument {
                            reason: format!("unknown __float__ form: '{}'", other),
                        })
                    }
                };
                return Ok(checksum_value(&Value::Float(f), opts)?);
            }
            if let Some(text) = obj.get(STR_KEY) {
                let text = text.as_str().ok_or_else(|| StoreError::InvalidDocument {
                    reason: "__str__ is not a string".into(),
                })?;
                return Ok(checksum::leaf(tag::STR, text.as_bytes()));
            }
            Err(StoreError::InvalidDocument {
                reason: format!("unrecognized document object with keys {:?}", obj.keys().collect::<Vec<_>>()),
            })
        }
    }
}

/// An [`IngredientSource`] over a tuple of output handles, used by the
/// executor to feed cached ingredients to bound functions lazily.
pub struct HandleSource {
    handles: Vec<OutputHandle>,
}

impl HandleSource {
    pub fn new(handles: Vec<OutputHandle>) -> Self {
        HandleSource { handles }
    }
}

impl IngredientSource for HandleSource {
    fn load(&self) -> Result<Vec<Value>, DynError> {
        self.handles
            .iter()
            .map(|h| h.load().map_err(|e| -> DynError { Box::new(e) }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use proptest::prelude::*;

    fn roundtrip(value: &Value) -> Value {
        let dir = tempfile::tempdir().unwrap();
        let opts = ChecksumOptions::default();
        let doc = encode_value(value, dir.path(), &opts).unwrap();
        OutputHandle::new(doc, dir.path().to_path_buf()).load().unwrap()
    }

    fn doc_and_value_checksums_match(value: &Value) {
        let dir = tempfile::tempdir().unwrap();
        let opts = ChecksumOptions::default();
        let doc = encode_value(value, dir.path(), &opts).unwrap();
        let handle = OutputHandle::new(doc, dir.path().to_path_buf());
        assert_eq!(
            handle.checksum(&opts).unwrap(),
            checksum_value(value, &opts).unwrap(),
            "document checksum must mirror value checksum for {:?}",
            value
        );
    }

    #[test]
    fn scalars_roundtrip() {
        for v in [
            Value::Null,
            Value::Bool(true),
            Value::Int(-3),
            Value::Float(1.5),
            Value::Float(f64::NAN),
            Value::Float(f64::NEG_INFINITY),
            Value::Str("hello".into()),
        ] {
            assert_eq!(roundtrip(&v), v);
        }
    }

    #[test]
    fn bytes_roundtrip_through_blob() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ChecksumOptions::default();
        let value = Value::Bytes(vec![0, 1, 2, 255]);

        let doc = encode_value(&value, dir.path(), &opts).unwrap();
        let token = doc.as_str().unwrap();
        assert!(token.starts_with(BLOB_PREFIX));

        // The sidecar exists and is named by the payload checksum.
        let hex = token.strip_prefix(BLOB_PREFIX).unwrap();
        assert!(dir.path().join(format!("{}.bin", hex)).exists());

        let handle = OutputHandle::new(doc, dir.path().to_path_buf());
        assert_eq!(handle.load().unwrap(), value);
    }

    #[test]
    fn map_with_non_string_keys_roundtrips() {
        let mut entries = IndexMap::new();
        entries.insert(Value::Int(1), Value::from("one"));
        entries.insert(
            Value::Seq(vec![Value::Int(2)]),
            Value::from("two"),
        );
        let value = Value::Map(entries);
        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn map_iteration_order_survives() {
        let mut entries = IndexMap::new();
        entries.insert(Value::from("z"), Value::Int(1));
        entries.insert(Value::from("a"), Value::Int(2));
        let value = Value::Map(entries);

        let loaded = roundtrip(&value);
        let keys: Vec<_> = loaded.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec![Value::from("z"), Value::from("a")]);
    }

    #[test]
    fn set_and_path_roundtrip() {
        let set = Value::Set(vec![Value::Int(3), Value::Int(1)]);
        assert_eq!(roundtrip(&set), set);

        let path = Value::Path(PathBuf::from("/tmp/data.bin"));
        assert_eq!(roundtrip(&path), path);
    }

    #[test]
    fn opaque_roundtrips_and_respects_config() {
        let value = Value::Opaque {
            codec: "bincode".into(),
            bytes: vec![9, 9, 9],
        };
        assert_eq!(roundtrip(&value), value);

        let dir = tempfile::tempdir().unwrap();
        let opts = ChecksumOptions {
            allow_opaque: false,
            ..ChecksumOptions::default()
        };
        assert!(encode_value(&value, dir.path(), &opts).is_err());
    }

    #[test]
    fn string_looking_like_blob_token_is_escaped() {
        let value = Value::Str(format!("{}deadbeef", BLOB_PREFIX));
        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn document_checksums_mirror_value_checksums() {
        let mut entries = IndexMap::new();
        entries.insert(Value::from("k"), Value::Bytes(vec![1, 2, 3]));
        for v in [
            Value::Null,
            Value::Bool(false),
            Value::Int(7),
            Value::Float(2.25),
            Value::Float(f64::NAN),
            Value::Str("plain".into()),
            Value::Str(format!("{}cafe", BLOB_PREFIX)),
            Value::Bytes(vec![4, 5, 6]),
            Value::Seq(vec![Value::Int(1), Value::from("x")]),
            Value::Map(entries),
            Value::Set(vec![Value::Int(2), Value::Int(1)]),
            Value::Opaque {
                codec: "bincode".into(),
                bytes: vec![1],
            },
        ] {
            doc_and_value_checksums_match(&v);
        }
    }

    #[test]
    fn missing_blob_fails_checksum_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ChecksumOptions::default();
        let value = Value::Bytes(vec![1, 2, 3]);
        let doc = encode_value(&value, dir.path(), &opts).unwrap();

        // Remove the sidecar out from under the handle.
        let hex = doc.as_str().unwrap().strip_prefix(BLOB_PREFIX).unwrap();
        std::fs::remove_file(dir.path().join(format!("{}.bin", hex))).unwrap();

        let handle = OutputHandle::new(doc, dir.path().to_path_buf());
        assert!(matches!(
            handle.checksum(&opts),
            Err(StoreError::BlobMissing { .. })
        ));
        assert!(matches!(handle.load(), Err(StoreError::BlobMissing { .. })));
    }

    #[test]
    fn path_document_rehashes_external_file() {
        let dir = tempfile::tempdir().unwrap();
        let external = dir.path().join("data.txt");
        std::fs::write(&external, b"v1").unwrap();

        let opts = ChecksumOptions::default();
        let value = Value::Path(external.clone());
        let doc = encode_value(&value, dir.path(), &opts).unwrap();
        let handle = OutputHandle::new(doc, dir.path().to_path_buf());

        let before = handle.checksum(&opts).unwrap();
        std::fs::write(&external, b"v2").unwrap();
        let after = handle.checksum(&opts).unwrap();
        assert_ne!(before, after);
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            any::<f64>().prop_map(Value::Float),
            ".{0,12}".prop_map(Value::Str),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Seq),
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Set),
                proptest::collection::vec((inner.clone(), inner), 0..4)
                    .prop_map(|pairs| Value::Map(pairs.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn roundtrip_preserves_value(v in value_strategy()) {
            prop_assert_eq!(&roundtrip(&v), &v);
        }

        #[test]
        fn document_checksum_matches_value_checksum(v in value_strategy()) {
            let dir = tempfile::tempdir().unwrap();
            let opts = ChecksumOptions::default();
            let doc = encode_value(&v, dir.path(), &opts).unwrap();
            let handle = OutputHandle::new(doc, dir.path().to_path_buf());
            prop_assert_eq!(
                handle.checksum(&opts).unwrap(),
                checksum_value(&v, &opts).unwrap()
            );
        }
    }
}
