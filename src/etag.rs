//! Content-derived entity tags.
//!
//! An [`ETag`] is the quoted, lowercase hex SHA-256 digest of a resource's
//! bytes. Tags are never stored; they are recomputed from content whenever
//! needed, so edits made behind the server's back are picked up.

use std::fmt;

use sha2::{Digest, Sha256};

/// A strong entity tag, including its surrounding quotes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ETag(String);

impl ETag {
    /// The tag as sent on the wire, quotes included.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The tag without quotes.
    pub fn opaque(&self) -> &str {
        self.0.trim_matches('"')
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the entity tag for a complete byte sequence.
pub fn compute(content: &[u8]) -> ETag {
    let mut hasher = Hasher::new();
    hasher.update(content);
    hasher.finish()
}

/// Incremental tag computation for content read in chunks.
#[derive(Default)]
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finish(self) -> ETag {
        ETag(format!("\"{}\"", hex::encode(self.inner.finalize())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_is_deterministic() {
        assert_eq!(compute(b"hello"), compute(b"hello"));
    }

    #[test]
    fn test_distinct_content_distinct_tags() {
        assert_ne!(compute(b"hello"), compute(b"hello!"));
        assert_ne!(compute(b""), compute(b"\0"));
    }

    #[test]
    fn test_tag_is_quoted_hex() {
        let tag = compute(b"foo");
        assert!(tag.as_str().starts_with('"'));
        assert!(tag.as_str().ends_with('"'));
        assert_eq!(
            tag.opaque(),
            "2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae"
        );
    }

    #[test]
    fn test_chunked_matches_whole() {
        let mut hasher = Hasher::new();
        hasher.update(b"hel");
        hasher.update(b"lo");
        assert_eq!(hasher.finish(), compute(b"hello"));
    }
}
