//! Cache key derivation.
//!
//! Keys look like `{category}:{hash}`. The hash is the first 16 hex chars of a
//! SHA-256 digest over the normalized semantic inputs, so it is stable across
//! process restarts (the persistent tier depends on that). Collisions in the
//! truncated space are an accepted risk.

use std::fmt;

use sha2::{Digest, Sha256};

/// Separator between hashed components. Not expected in user text.
const COMPONENT_SEPARATOR: u8 = 0x1f;
const HASH_HEX_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    category: String,
    hash: String,
}

impl CacheKey {
    /// Builds a key from a category and the request's semantic inputs.
    /// Inputs are normalized (trimmed, lower-cased, whitespace collapsed)
    /// so cosmetic differences in user text still hit the same entry.
    pub fn derive<I, S>(category: &str, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hasher = Sha256::new();
        hasher.update(category.as_bytes());
        for input in inputs {
            hasher.update([COMPONENT_SEPARATOR]);
            hasher.update(normalize(input.as_ref()).as_bytes());
        }
        let digest = hex::encode(hasher.finalize());

        Self {
            category: category.to_string(),
            hash: digest[..HASH_HEX_LEN].to_string(),
        }
    }

    /// Rebuilds a key a caller got back earlier (e.g. `GeneratedRecord::cache_key`).
    /// Rejects anything that is not a digest this module could have produced.
    pub fn from_parts(category: &str, hash: &str) -> Option<Self> {
        let well_formed = hash.len() == HASH_HEX_LEN
            && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        (well_formed && !category.is_empty()).then(|| Self {
            category: category.to_string(),
            hash: hash.to_string(),
        })
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.hash)
    }
}

/// Lower-cases and collapses all runs of whitespace into single spaces.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_inputs_share_a_key() {
        let a = CacheKey::derive("analysis", ["Senior Rust Engineer\n\nAcme", "ctx"]);
        let b = CacheKey::derive("analysis", ["  senior   rust engineer acme ", "CTX"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_component_boundaries_matter() {
        let a = CacheKey::derive("analysis", ["ab", "c"]);
        let b = CacheKey::derive("analysis", ["a", "bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_category_partitions_keys() {
        let a = CacheKey::derive("analysis", ["same input"]);
        let b = CacheKey::derive("research", ["same input"]);
        assert_ne!(a.hash(), b.hash());
        assert!(b.to_string().starts_with("research:"));
    }

    #[test]
    fn test_key_format() {
        let key = CacheKey::derive("story_matching", ["x"]);
        let rendered = key.to_string();
        let (category, hash) = rendered.split_once(':').unwrap();
        assert_eq!(category, "story_matching");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Hello\tWORLD \n again "), "hello world again");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_from_parts_round_trips_display() {
        let key = CacheKey::derive("research", ["acme"]);
        let rebuilt = CacheKey::from_parts(key.category(), key.hash()).unwrap();
        assert_eq!(rebuilt, key);
        assert!(CacheKey::from_parts("research", "not-hex").is_none());
        assert!(CacheKey::from_parts("research", "ABCDEF0123456789").is_none());
        assert!(CacheKey::from_parts("", key.hash()).is_none());
    }
}
