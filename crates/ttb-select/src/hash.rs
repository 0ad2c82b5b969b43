//! Content hashing.
//!
//! Every selected file is identified by the SHA-256 of the bytes consumers
//! will read (post-patch). The bundle as a whole is identified by a single
//! fingerprint over the sorted `(name, digest)` pairs of the index.
//!
//! # Fingerprint encoding
//!
//! ```text
//! u32 big-endian entry count
//! 0x00
//! for each pair, sorted by (name, digest):
//!     name (UTF-8) 0x00 digest (32 raw bytes)
//! ```
//!
//! Sorting happens inside [`bundle_fingerprint`], so the result does not
//! depend on directory iteration order or on the order callers collect pairs.

use std::fmt;
use std::io::{self, Read};

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Length of a raw digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Number of hex characters shown in human-oriented reports.
pub const SHORT_HEX_LEN: usize = 8;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// A SHA-256 digest of file contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest([u8; DIGEST_LEN]);

impl ContentDigest {
    /// Digest an in-memory byte slice.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Digest everything readable from `reader`.
    ///
    /// # Errors
    /// Propagates read errors.
    pub fn of_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        io::copy(&mut reader, &mut hasher)?;
        Ok(Self(hasher.finalize().into()))
    }

    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex string (either case).
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != DIGEST_LEN * 2 || !s.is_ascii() {
            return None;
        }
        let mut out = [0u8; DIGEST_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(out))
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex encoding (64 chars).
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut hex = String::with_capacity(DIGEST_LEN * 2);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(hex, "{b:02x}");
        }
        hex
    }

    /// The first [`SHORT_HEX_LEN`] hex characters, for human scanning only.
    #[must_use]
    pub fn short_hex(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(SHORT_HEX_LEN);
        hex
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.short_hex())
    }
}

// ---------------------------------------------------------------------------
// Bundle fingerprint
// ---------------------------------------------------------------------------

/// Compute the bundle fingerprint over `(name, digest)` pairs.
///
/// The pairs are sorted by name (then digest) before hashing.
#[must_use]
pub fn bundle_fingerprint<'a, I>(pairs: I) -> ContentDigest
where
    I: IntoIterator<Item = (&'a str, &'a ContentDigest)>,
{
    let mut sorted: Vec<(&str, &ContentDigest)> = pairs.into_iter().collect();
    sorted.sort_unstable();

    // Bundles never approach 4 billion files; saturate rather than wrap.
    let count = u32::try_from(sorted.len()).unwrap_or(u32::MAX);

    let mut hasher = Sha256::new();
    hasher.update(count.to_be_bytes());
    hasher.update([0u8]);
    for (name, digest) in sorted {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(digest.as_bytes());
    }
    ContentDigest(hasher.finalize().into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_of_empty_input_is_known_value() {
        assert_eq!(
            ContentDigest::of(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn reader_and_slice_agree() {
        let data = b"\\ProvidesPackage{foo}\n".repeat(500);
        let a = ContentDigest::of(&data);
        let b = ContentDigest::of_reader(&data[..]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hex_round_trips_through_parse() {
        let d = ContentDigest::of(b"abc");
        assert_eq!(ContentDigest::from_hex(&d.to_hex()), Some(d));
        assert_eq!(ContentDigest::from_hex(&d.to_hex().to_uppercase()), Some(d));
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert_eq!(ContentDigest::from_hex("abc"), None);
        assert_eq!(ContentDigest::from_hex(&"zz".repeat(32)), None);
        assert_eq!(ContentDigest::from_hex(&"é".repeat(32)), None);
    }

    #[test]
    fn short_hex_is_prefix() {
        let d = ContentDigest::of(b"abc");
        assert_eq!(d.short_hex().len(), SHORT_HEX_LEN);
        assert!(d.to_hex().starts_with(&d.short_hex()));
    }

    #[test]
    fn fingerprint_ignores_input_order() {
        let a = ContentDigest::of(b"a");
        let b = ContentDigest::of(b"b");
        let c = ContentDigest::of(b"c");
        let one = bundle_fingerprint([("a.sty", &a), ("b.tex", &b), ("c.cls", &c)]);
        let two = bundle_fingerprint([("c.cls", &c), ("a.sty", &a), ("b.tex", &b)]);
        assert_eq!(one, two);
    }

    #[test]
    fn fingerprint_depends_on_names_and_contents() {
        let a = ContentDigest::of(b"a");
        let b = ContentDigest::of(b"b");
        let base = bundle_fingerprint([("a.sty", &a)]);
        assert_ne!(base, bundle_fingerprint([("x.sty", &a)]));
        assert_ne!(base, bundle_fingerprint([("a.sty", &b)]));
        assert_ne!(base, bundle_fingerprint([("a.sty", &a), ("b.sty", &b)]));
    }

    #[test]
    fn fingerprint_matches_documented_encoding() {
        let d = ContentDigest::of(b"hello");
        let mut hasher = Sha256::new();
        hasher.update(1u32.to_be_bytes());
        hasher.update([0u8]);
        hasher.update(b"hello.tex");
        hasher.update([0u8]);
        hasher.update(d.as_bytes());
        let expected = ContentDigest(hasher.finalize().into());
        assert_eq!(bundle_fingerprint([("hello.tex", &d)]), expected);
    }

    #[test]
    fn empty_fingerprint_is_stable() {
        let empty: [(&str, &ContentDigest); 0] = [];
        assert_eq!(bundle_fingerprint(empty), bundle_fingerprint(Vec::new()));
    }
}
