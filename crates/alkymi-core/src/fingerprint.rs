//! Bound-function fingerprints for change detection.
//!
//! Rust has no bytecode to introspect, so a function's fingerprint is built
//! from the closure's token text (captured by the [`bound_fn!`](crate::bound_fn)
//! macro via `stringify!`), plus the checksums of explicitly registered
//! captured constants, plus the fingerprints of other bound functions the
//! closure calls into. A module-level item referenced by name contributes
//! only its *name* through the token text, so changing its value between
//! runs does not change the fingerprint.
//!
//! Referenced-function graphs are acyclic by construction: a fingerprint can
//! only embed fingerprints that already exist, so the recursive fold always
//! terminates without a visited set.

use crate::checksum::{fold, leaf, tag, Checksum};

/// Fingerprint of a bound function: token-text checksum plus the checksums
/// of captured constants and referenced functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FnFingerprint {
    body: Checksum,
    captures: Vec<Checksum>,
    uses: Vec<Checksum>,
}

impl FnFingerprint {
    /// Builds a fingerprint from a closure's token text.
    pub fn from_body(text: &str) -> Self {
        FnFingerprint {
            body: leaf(tag::STR, text.as_bytes()),
            captures: Vec::new(),
            uses: Vec::new(),
        }
    }

    /// Registers the checksum of a captured constant.
    pub fn push_capture(&mut self, checksum: Checksum) {
        self.captures.push(checksum);
    }

    /// Registers the combined fingerprint of a referenced bound function.
    pub fn push_use(&mut self, other: &FnFingerprint) {
        self.uses.push(other.checksum());
    }

    /// The combined fingerprint checksum.
    pub fn checksum(&self) -> Checksum {
        fold(
            tag::FUNCTION,
            3,
            [
                self.body,
                fold(tag::SEQ, self.captures.len(), self.captures.iter().copied()),
                fold(tag::SEQ, self.uses.len(), self.uses.iter().copied()),
            ],
        )
    }
}
