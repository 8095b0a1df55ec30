mod dispatch;
mod openai;
mod retry;
mod traits;

pub use dispatch::{DispatchSummary, FailedJob, TranslationDispatcher, TranslationJob};
pub use openai::OpenAiTranslator;
pub use retry::{RetryPolicy, translate_with_retry};
pub use traits::{Translator, TranslatorInfo};

use crate::config::TranslatorConfig;
use crate::error::Result;
use std::sync::Arc;

/// Create a translator from configuration
pub fn create_translator(config: &TranslatorConfig) -> Result<Arc<dyn Translator>> {
    Ok(Arc::new(OpenAiTranslator::new(config)?))
}
