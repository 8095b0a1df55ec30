use serde::{Deserialize, Serialize};

/// Content-addressed key for a translated text fragment.
///
/// Keys are MD5 hashes of the normalized source text, so:
/// - The same text yields the same key wherever it appears in any document
/// - Whitespace differences from extraction (line breaks, double spaces) do not matter
/// - Case and punctuation are preserved
/// - Keys are fixed-length (32 hex chars) for consistent storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey {
    hash: String,
}

impl CacheKey {
    pub fn from_text(text: &str) -> Self {
        let normalized = normalize_text(text);
        Self {
            hash: format!("{:x}", md5::compute(normalized.as_bytes())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

/// Collapse whitespace runs to a single space and trim.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
