use std::time::Duration;

use thiserror::Error;

/// Unified error type for pdf-reflow-core
///
/// Only document-level failures abort a run. Per-fragment problems
/// (translation failures, missing cache entries, overflow) are recorded
/// in the run report instead of being returned from the orchestrators.
#[derive(Error, Debug)]
pub enum Error {
    // ==========================================================================
    // PDF Errors
    // ==========================================================================
    /// Failed to open or parse a PDF file
    #[error("failed to open PDF: {0}")]
    PdfOpen(String),

    /// Invalid page number requested
    #[error("invalid page number {page} (document has {total} pages)")]
    PdfInvalidPage { page: usize, total: usize },

    /// Failed to extract text from a PDF page
    #[error("failed to extract text from page {page}: {reason}")]
    PdfTextExtraction { page: usize, reason: String },

    /// Failed to stamp translated text onto a page
    #[error("failed to stamp page {page}: {reason}")]
    PdfStamp { page: usize, reason: String },

    /// Failed to save a PDF
    #[error("failed to save PDF: {0}")]
    PdfSave(String),

    /// Error from the lopdf library
    #[error("lopdf error: {0}")]
    Lopdf(String),

    // ==========================================================================
    // Font Errors
    // ==========================================================================
    /// Failed to read or parse a font file
    #[error("failed to load font: {0}")]
    FontLoad(String),

    /// Translated text needs glyphs the stamping font does not have
    #[error("font {font} cannot draw {count} characters of the translated text (e.g. \"{sample}\"); pass a TrueType font that covers the target language")]
    FontCoverage {
        font: String,
        count: usize,
        sample: String,
    },

    // ==========================================================================
    // Translation Errors
    // ==========================================================================
    /// Translation API request failed at the transport level
    #[error("translation API request failed: {0}")]
    TranslationRequest(String),

    /// Translation service answered with a non-success status
    #[error("translation service error (HTTP {status}): {body}")]
    TranslationService { status: u16, body: String },

    /// Invalid response from translation API
    #[error("invalid translation API response: {0}")]
    TranslationInvalidResponse(String),

    /// Rate limited by translation API
    #[error("translation rate limited{}", retry_after.map(|s| format!(", retry after {s} seconds")).unwrap_or_default())]
    TranslationRateLimited { retry_after: Option<u64> },

    /// API key rejected or not configured for translation service
    #[error("translation API key missing or rejected")]
    TranslationMissingApiKey,

    /// Unsupported language for translation
    #[error("unsupported language for translation: {0}")]
    TranslationUnsupportedLanguage(String),

    /// Translation request timed out
    #[error("translation request timed out after {0:?}")]
    TranslationTimeout(Duration),

    /// Maximum retry attempts exceeded for translation
    #[error("translation failed after {attempts} attempts: {last}")]
    TranslationMaxRetriesExceeded { attempts: u32, last: String },

    // ==========================================================================
    // Cache Errors
    // ==========================================================================
    /// Persisted cache could not be read or parsed
    #[error("translation cache is corrupt: {0}")]
    CacheCorrupt(String),

    /// Failed to write the cache file
    #[error("failed to write translation cache: {0}")]
    CacheWrite(String),

    // ==========================================================================
    // Fragment Store Errors
    // ==========================================================================
    /// Fragment sidecar could not be read, parsed or written
    #[error("fragment store error: {0}")]
    FragmentStore(String),

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    /// Failed to load configuration file
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// Invalid configuration value
    #[error("invalid config value for '{field}': {reason}")]
    ConfigInvalid { field: String, reason: String },

    /// Page selection could not be parsed
    #[error("invalid page selection '{0}'")]
    PageSelection(String),

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether another attempt at the same translation request may succeed.
    ///
    /// Transport failures, timeouts, rate limiting and server-side errors are
    /// transient. Authentication, language and malformed-response errors are not.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::TranslationRequest(_)
            | Self::TranslationTimeout(_)
            | Self::TranslationRateLimited { .. } => true,
            Self::TranslationService { status, .. } => *status >= 500 || *status == 408,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
