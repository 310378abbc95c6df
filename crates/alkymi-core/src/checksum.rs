//! Deterministic content checksums for values, files and output tuples.
//!
//! Produces 128-bit hex-string fingerprints that are stable across processes
//! and operating systems and strictly reflect the semantic content of a
//! value. The digest is MD5 by default; the `xxhash` cargo feature switches
//! to xxh3-128 for speed. Checksums are for change detection, never for
//! tamper resistance.
//!
//! # Determinism
//!
//! - Every value kind hashes a distinct tag byte before its payload.
//! - Canonical byte encodings: UTF-8 for strings, big-endian for integers,
//!   IEEE-754 bits with a canonical NaN for floats.
//! - Containers fold child checksums with a length prefix; mapping entries
//!   are sorted by key checksum and set elements lexicographically, so
//!   iteration order never leaks into the fingerprint.
//! - File paths hash the basename plus the file's byte content (or its
//!   modification stamp when the configured method is mtime); directories
//!   hash only the path string; a missing path hashes a distinct tag that
//!   cannot collide with any existing-file hash.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::FileChecksumMethod;
use crate::error::CoreError;
use crate::value::{canonical_float_bits, Value};

/// A 128-bit content checksum, displayed and persisted as 32 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum([u8; 16]);

impl Checksum {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Checksum(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses 32 hex digits back into a checksum.
    pub fn from_hex(text: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(text).map_err(|_| CoreError::InvalidChecksum {
            text: text.to_owned(),
        })?;
        let bytes: [u8; 16] = bytes.try_into().map_err(|_| CoreError::InvalidChecksum {
            text: text.to_owned(),
        })?;
        Ok(Checksum(bytes))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Checksum::from_hex(&text).map_err(D::Error::custom)
    }
}

/// Tag bytes, one per value kind, hashed before the payload.
pub mod tag {
    pub const NULL: u8 = 0x00;
    pub const BOOL: u8 = 0x01;
    pub const INT: u8 = 0x02;
    pub const FLOAT: u8 = 0x03;
    pub const STR: u8 = 0x04;
    pub const BYTES: u8 = 0x05;
    pub const SEQ: u8 = 0x06;
    pub const MAP: u8 = 0x07;
    pub const MAP_ENTRY: u8 = 0x08;
    pub const SET: u8 = 0x09;
    pub const TUPLE: u8 = 0x0a;
    pub const FILE: u8 = 0x0b;
    pub const DIR: u8 = 0x0c;
    pub const MISSING: u8 = 0x0d;
    pub const OPAQUE: u8 = 0x0e;
    pub const FUNCTION: u8 = 0x0f;
}

#[cfg(not(feature = "xxhash"))]
mod digest {
    use md5::{Digest, Md5};

    pub struct Hasher(Md5);

    impl Hasher {
        pub fn new() -> Self {
            Hasher(Md5::new())
        }

        pub fn update(&mut self, bytes: &[u8]) {
            Digest::update(&mut self.0, bytes);
        }

        pub fn finalize(self) -> [u8; 16] {
            self.0.finalize().into()
        }
    }
}

#[cfg(feature = "xxhash")]
mod digest {
    use xxhash_rust::xxh3::Xxh3;

    pub struct Hasher(Xxh3);

    impl Hasher {
        pub fn new() -> Self {
            Hasher(Xxh3::new())
        }

        pub fn update(&mut self, bytes: &[u8]) {
            self.0.update(bytes);
        }

        pub fn finalize(self) -> [u8; 16] {
            self.0.digest128().to_be_bytes()
        }
    }
}

use digest::Hasher;

/// Options steering checksum computation, derived from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumOptions {
    pub file_method: FileChecksumMethod,
    pub allow_opaque: bool,
}

impl Default for ChecksumOptions {
    fn default() -> Self {
        ChecksumOptions {
            file_method: FileChecksumMethod::Content,
            allow_opaque: true,
        }
    }
}

/// Hash of a tag byte plus a canonical payload encoding.
pub fn leaf(tag: u8, payload: &[u8]) -> Checksum {
    let mut h = Hasher::new();
    h.update(&[tag]);
    h.update(payload);
    Checksum(h.finalize())
}

/// Fold of child checksums under a tag with a length prefix.
pub fn fold<I>(tag: u8, len: usize, parts: I) -> Checksum
where
    I: IntoIterator<Item = Checksum>,
{
    let mut h = Hasher::new();
    h.update(&[tag]);
    h.update(&(len as u64).to_be_bytes());
    for part in parts {
        h.update(part.as_bytes());
    }
    Checksum(h.finalize())
}

/// Combines a mapping entry's key and value checksums.
pub fn map_entry(key: Checksum, value: Checksum) -> Checksum {
    fold(tag::MAP_ENTRY, 2, [key, value])
}

/// Computes the checksum of a single value.
///
/// Fails when the value references a file that vanishes mid-hash, or when it
/// contains an opaque value while opaque support is disabled.
pub fn checksum_value(value: &Value, opts: &ChecksumOptions) -> Result<Checksum, CoreError> {
    match value {
        Value::Null => Ok(leaf(tag::NULL, &[])),
        Value::Bool(b) => Ok(leaf(tag::BOOL, &[*b as u8])),
        Value::Int(i) => Ok(leaf(tag::INT, &i.to_be_bytes())),
        Value::Float(f) => Ok(leaf(tag::FLOAT, &canonical_float_bits(*f).to_be_bytes())),
        Value::Str(s) => Ok(leaf(tag::STR, s.as_bytes())),
        Value::Bytes(b) => Ok(leaf(tag::BYTES, b)),
        Value::Seq(items) => {
            let parts = items
                .iter()
                .map(|item| checksum_value(item, opts))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(fold(tag::SEQ, parts.len(), parts))
        }
        Value::Map(entries) => {
            let mut parts = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                let key = checksum_value(k, opts)?;
                let value = checksum_value(v, opts)?;
                parts.push((key, map_entry(key, value)));
            }
            parts.sort();
            Ok(fold(tag::MAP, parts.len(), parts.into_iter().map(|(_, e)| e)))
        }
        Value::Set(items) => {
            let mut parts = items
                .iter()
                .map(|item| checksum_value(item, opts))
                .collect::<Result<Vec<_>, _>>()?;
            parts.sort();
            Ok(fold(tag::SET, parts.len(), parts))
        }
        Value::Path(p) => checksum_path(p, opts),
        Value::Opaque { codec, bytes } => {
            if !opts.allow_opaque {
                return Err(CoreError::OpaqueDisabled {
                    codec: codec.clone(),
                });
            }
            Ok(checksum_opaque(codec, leaf(tag::BYTES, bytes)))
        }
    }
}

/// Combines an opaque value's codec tag with the checksum of its bytes.
///
/// Exposed so the store can re-derive the checksum from a document whose
/// bytes live in a content-addressed sidecar blob.
pub fn checksum_opaque(codec: &str, bytes_checksum: Checksum) -> Checksum {
    fold(tag::OPAQUE, 2, [leaf(tag::STR, codec.as_bytes()), bytes_checksum])
}

/// Checksum of a fixed-arity output tuple from its element checksums.
pub fn checksum_tuple(parts: &[Checksum]) -> Checksum {
    fold(tag::TUPLE, parts.len(), parts.iter().copied())
}

/// Checksums every output value and combines them into a tuple checksum.
pub fn checksum_outputs(
    outputs: &[Value],
    opts: &ChecksumOptions,
) -> Result<(Vec<Checksum>, Checksum), CoreError> {
    let parts = outputs
        .iter()
        .map(|v| checksum_value(v, opts))
        .collect::<Result<Vec<_>, _>>()?;
    let tuple = checksum_tuple(&parts);
    Ok((parts, tuple))
}

/// Computes the checksum of an external path.
///
/// A regular file hashes its basename plus its byte content (or modification
/// stamp); a directory hashes only the path string; a missing path hashes a
/// distinct tag over the basename.
pub fn checksum_path(path: &Path, opts: &ChecksumOptions) -> Result<Checksum, CoreError> {
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(leaf(tag::MISSING, basename.as_bytes()));
        }
        Err(e) => {
            return Err(CoreError::FileUnreadable {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    if meta.is_dir() {
        return Ok(leaf(tag::DIR, path.to_string_lossy().as_bytes()));
    }

    let content = match opts.file_method {
        FileChecksumMethod::Content => hash_file_content(path)?,
        FileChecksumMethod::Mtime => {
            let stamp = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            leaf(tag::BYTES, &stamp.to_be_bytes())
        }
    };

    Ok(fold(
        tag::FILE,
        2,
        [leaf(tag::STR, basename.as_bytes()), content],
    ))
}

/// Streams a file's bytes through the digest; equivalent to
/// `leaf(tag::BYTES, contents)` without holding the file in memory.
fn hash_file_content(path: &Path) -> Result<Checksum, CoreError> {
    let unreadable = |e: std::io::Error| CoreError::FileUnreadable {
        path: path.to_path_buf(),
        source: e,
    };

    let mut file = std::fs::File::open(path).map_err(unreadable)?;
    let mut h = Hasher::new();
    h.update(&[tag::BYTES]);
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(unreadable)?;
        if n == 0 {
            break;
        }
        h.update(&buf[..n]);
    }
    Ok(Checksum(h.finalize()))
}
