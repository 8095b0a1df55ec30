use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{Translator, TranslatorInfo};
use crate::config::{Lang, TranslatorConfig};
use crate::error::{Error, Result};

/// OpenAI-compatible API translator
/// Works with: llama.cpp server, Ollama, DeepSeek, OpenAI, etc.
///
/// Each call performs exactly one HTTP request. Retries, backoff and
/// per-attempt deadlines are applied by the caller.
pub struct OpenAiTranslator {
    client: Client,
    /// Base URL for the API (e.g., "http://localhost:8080/v1")
    pub api_base: String,
    /// Optional API key for authentication
    pub api_key: Option<String>,
    /// Model identifier
    pub model: String,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OpenAiTranslator {
    /// Create a translator for the configured endpoint.
    pub fn new(config: &TranslatorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::TranslationRequest(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    fn system_prompt(source: &Lang, target: &Lang) -> String {
        format!(
            "You are a professional translator from {} to {} specializing in scientific \
             and technical papers (computer science, mathematics, machine learning). \
             Keep terminology consistent, leave formulas, variable names and citations \
             unchanged, and output only the translation.",
            language_name(source),
            language_name(target)
        )
    }

    fn user_prompt(text: &str, source: &Lang, target: &Lang) -> String {
        format!(
            "Translate the following {} text to {}, preserving its structure:\n\n{}",
            language_name(source),
            language_name(target),
            text
        )
    }

    async fn request(&self, text: &str, source: &Lang, target: &Lang) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: Self::system_prompt(source, target),
                },
                Message {
                    role: "user",
                    content: Self::user_prompt(text, source, target),
                },
            ],
            temperature: Some(0.3), // Lower temperature for more consistent translations
        };

        debug!("Translation request to {} ({} chars)", url, text.len());

        let mut req = self.client.post(&url).json(&request);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::TranslationTimeout(Duration::from_secs(self.timeout_secs))
            } else {
                Error::TranslationRequest(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            warn!("Rate limited, retry after {:?}s", retry_after);
            return Err(Error::TranslationRateLimited { retry_after });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::TranslationMissingApiKey);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("API error: {} - {}", status, body);
            return Err(Error::TranslationService {
                status: status.as_u16(),
                body,
            });
        }

        let chat_response = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| Error::TranslationInvalidResponse(e.to_string()))?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::TranslationInvalidResponse("No choices in response".to_string()))?;

        Ok(clean_response(&choice.message.content))
    }
}

/// Strip surrounding whitespace and quotes some models wrap the answer in
fn clean_response(content: &str) -> String {
    content
        .trim()
        .trim_start_matches('"')
        .trim_end_matches('"')
        .trim()
        .to_string()
}

#[async_trait]
impl Translator for OpenAiTranslator {
    fn info(&self) -> TranslatorInfo {
        TranslatorInfo {
            name: "OpenAI Compatible",
            requires_api_key: false, // Optional for local servers
            supports_auto_detect: true,
        }
    }

    async fn translate(&self, text: &str, source: &Lang, target: &Lang) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        if target.as_str() == "auto" || target.as_str().trim().is_empty() {
            return Err(Error::TranslationUnsupportedLanguage(target.to_string()));
        }

        if source.as_str() == target.as_str() && source.as_str() != "auto" {
            return Ok(text.to_string());
        }

        self.request(text, source, target).await
    }
}

/// Convert language code to human-readable name for prompts
fn language_name(lang: &Lang) -> &'static str {
    match lang.as_str() {
        "en" => "English",
        "zh-CN" => "Simplified Chinese",
        "zh-TW" => "Traditional Chinese",
        "ja" => "Japanese",
        "ko" => "Korean",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "uk" => "Ukrainian",
        "pl" => "Polish",
        "auto" => "the source language",
        // For unknown languages, the LLM should still understand most ISO codes
        _ => "the specified language",
    }
}
