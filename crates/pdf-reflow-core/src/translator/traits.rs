use async_trait::async_trait;
use crate::config::Lang;
use crate::error::Result;

/// Information about a translator backend
#[derive(Debug, Clone)]
pub struct TranslatorInfo {
    /// Human-readable name
    pub name: &'static str,
    /// Whether this translator requires an API key
    pub requires_api_key: bool,
    /// Whether this translator supports auto-detection of source language
    pub supports_auto_detect: bool,
}

/// A remote or local translation service.
///
/// Implementations make a single attempt per call. Deadlines, retries and
/// concurrency limits are applied by [`super::TranslationDispatcher`], so a
/// backend only has to map its failures onto the crate's error variants
/// (`Error::is_retryable` decides what is tried again).
#[async_trait]
pub trait Translator: Send + Sync {
    /// Get information about this translator
    fn info(&self) -> TranslatorInfo;

    /// Get the translator name (convenience method)
    fn name(&self) -> &'static str {
        self.info().name
    }

    /// Translate text from source language to target language
    async fn translate(&self, text: &str, source: &Lang, target: &Lang) -> Result<String>;
}
