use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Language codes following ISO 639-1 with regional variants
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lang(pub String);

impl Lang {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn default_source_lang() -> Lang {
    Lang::new(DEFAULT_SOURCE_LANG)
}

fn default_target_lang() -> Lang {
    Lang::new(DEFAULT_TARGET_LANG)
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Lang {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Lang {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// RGB fill color used when stamping text
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl TextColor {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub const fn dark_red() -> Self {
        Self::new(0.6, 0.0, 0.0)
    }

    pub const fn black() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub const fn blue() -> Self {
        Self::new(0.0, 0.0, 0.8)
    }

    pub const fn dark_green() -> Self {
        Self::new(0.0, 0.5, 0.0)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "darkred" | "dark_red" | "dark-red" => Some(Self::dark_red()),
            "black" => Some(Self::black()),
            "blue" => Some(Self::blue()),
            "darkgreen" | "dark_green" | "dark-green" => Some(Self::dark_green()),
            _ => None,
        }
    }

    /// PDF `rg` operator for this color
    pub fn fill_operator(&self) -> String {
        format!(
            "{:.3} {:.3} {:.3} rg",
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0)
        )
    }
}

impl Default for TextColor {
    fn default() -> Self {
        Self::black()
    }
}

/// Translator backend configuration for OpenAI-compatible APIs.
///
/// Supports llama.cpp, Ollama, DeepSeek, OpenAI, and any other OpenAI-compatible API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Total attempts per fragment, including the first
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Per-attempt timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Concurrent translation requests in phase 1
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl TranslatorConfig {
    /// Create a new translator config
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            api_key,
            model: model.into(),
            ..Self::default()
        }
    }
}

fn default_api_base() -> String {
    "http://localhost:8080/v1".to_string()
}

fn default_model() -> String {
    "default_model".to_string()
}

const fn default_retry_count() -> u32 {
    3
}

const fn default_retry_delay_ms() -> u64 {
    1000
}

const fn default_retry_max_delay_ms() -> u64 {
    16_000
}

const fn default_timeout_secs() -> u64 {
    60
}

const fn default_max_workers() -> usize {
    4
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            model: default_model(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            timeout_secs: default_timeout_secs(),
            max_workers: default_max_workers(),
        }
    }
}

/// Translation cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache file (defaults to the per-language-pair file under the XDG cache dir)
    pub path: Option<PathBuf>,

    /// Directory for fragment sidecars (defaults to `fragments/` under the XDG cache dir)
    #[serde(default)]
    pub fragments_dir: Option<PathBuf>,

    /// Flush after this many completed translations
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,

    /// Bypass lookups and re-translate everything (results are still stored)
    #[serde(default)]
    pub ignore_cache: bool,
}

const fn default_checkpoint_every() -> usize {
    25
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            fragments_dir: None,
            checkpoint_every: default_checkpoint_every(),
            ignore_cache: false,
        }
    }
}

/// Prose/formula classifier configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Symbolic density at or above which a fragment is kept verbatim
    #[serde(default = "default_formula_ratio")]
    pub formula_ratio: f64,
}

const fn default_formula_ratio() -> f64 {
    0.25
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            formula_ratio: default_formula_ratio(),
        }
    }
}

/// Font-size search and line layout parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReflowConfig {
    #[serde(default = "default_min_font_size")]
    pub min_font_size: f32,
    #[serde(default = "default_size_step")]
    pub size_step: f32,
    /// Baseline distance as a multiple of the font size
    #[serde(default = "default_line_height_factor")]
    pub line_height_factor: f32,
    /// Padding kept free on every side of the box
    #[serde(default)]
    pub inset: f32,
}

const fn default_min_font_size() -> f32 {
    6.0
}

const fn default_size_step() -> f32 {
    0.5
}

const fn default_line_height_factor() -> f32 {
    1.2
}

impl Default for ReflowConfig {
    fn default() -> Self {
        Self {
            min_font_size: default_min_font_size(),
            size_step: default_size_step(),
            line_height_factor: default_line_height_factor(),
            inset: 0.0,
        }
    }
}

/// Output colors, by name, and glyph coverage policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_text_color")]
    pub text_color: String,
    #[serde(default = "default_marker_color")]
    pub marker_color: String,
    /// Stamp text the font cannot fully draw instead of failing the run.
    /// Each affected fragment is still reported.
    #[serde(default)]
    pub allow_missing_glyphs: bool,
}

fn default_text_color() -> String {
    DEFAULT_TEXT_COLOR.to_string()
}

fn default_marker_color() -> String {
    DEFAULT_MARKER_COLOR.to_string()
}

impl RenderConfig {
    pub fn text_color(&self) -> TextColor {
        TextColor::from_name(&self.text_color).unwrap_or_default()
    }

    pub fn marker_color(&self) -> TextColor {
        TextColor::from_name(&self.marker_color).unwrap_or_else(TextColor::dark_red)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            text_color: default_text_color(),
            marker_color: default_marker_color(),
            allow_missing_glyphs: false,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Source language
    #[serde(default = "default_source_lang")]
    pub source_lang: Lang,

    /// Target language
    #[serde(default = "default_target_lang")]
    pub target_lang: Lang,

    /// Translator backend configuration
    #[serde(default)]
    pub translator: TranslatorConfig,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub reflow: ReflowConfig,

    #[serde(default)]
    pub render: RenderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_lang: default_source_lang(),
            target_lang: default_target_lang(),
            translator: TranslatorConfig::default(),
            cache: CacheConfig::default(),
            classifier: ClassifierConfig::default(),
            reflow: ReflowConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::ConfigLoad(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::ConfigLoad(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations (~/.config/pdf-reflow/config.toml, ./config.toml)
    pub fn load() -> Self {
        if let Some(config_dir) = crate::util::config_dir() {
            let user_config = config_dir.join(crate::util::APP_DIR).join("config.toml");
            if user_config.exists() {
                match Self::from_file(&user_config) {
                    Ok(config) => {
                        tracing::debug!("Loaded config from {}", user_config.display());
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            match Self::from_file(&local_config) {
                Ok(config) => {
                    tracing::debug!("Loaded config from ./config.toml");
                    return config;
                }
                Err(e) => {
                    tracing::warn!("Failed to load ./config.toml: {}", e);
                }
            }
        }

        tracing::debug!("No config file found, using defaults");
        Self::default()
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        fn invalid(field: &str, reason: &str) -> Error {
            Error::ConfigInvalid {
                field: field.to_string(),
                reason: reason.to_string(),
            }
        }

        // NaN fails every comparison, so test for the accepted range
        let positive = |v: f32| v > 0.0;

        let r = &self.reflow;
        if !positive(r.min_font_size) {
            return Err(invalid("reflow.min_font_size", "must be positive"));
        }
        if !positive(r.size_step) {
            return Err(invalid("reflow.size_step", "must be positive"));
        }
        if !positive(r.line_height_factor) {
            return Err(invalid("reflow.line_height_factor", "must be positive"));
        }
        if r.inset.is_nan() || r.inset < 0.0 {
            return Err(invalid("reflow.inset", "must not be negative"));
        }

        let ratio = self.classifier.formula_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) || ratio.is_nan() {
            return Err(invalid("classifier.formula_ratio", "must be in (0, 1]"));
        }

        if self.translator.max_workers == 0 {
            return Err(invalid("translator.max_workers", "must be at least 1"));
        }
        if self.translator.retry_count == 0 {
            return Err(invalid("translator.retry_count", "must be at least 1"));
        }
        if self.translator.timeout_secs == 0 {
            return Err(invalid("translator.timeout_secs", "must be at least 1"));
        }
        if self.cache.checkpoint_every == 0 {
            return Err(invalid("cache.checkpoint_every", "must be at least 1"));
        }

        if TextColor::from_name(&self.render.text_color).is_none() {
            return Err(invalid("render.text_color", "unknown color name"));
        }
        if TextColor::from_name(&self.render.marker_color).is_none() {
            return Err(invalid("render.marker_color", "unknown color name"));
        }

        Ok(())
    }
}

/// Default source language code
pub const DEFAULT_SOURCE_LANG: &str = "en";
/// Default target language code
pub const DEFAULT_TARGET_LANG: &str = "ru";
/// Default color of translated text
pub const DEFAULT_TEXT_COLOR: &str = "black";
/// Default color of `[untranslated]` markers
pub const DEFAULT_MARKER_COLOR: &str = "darkred";
