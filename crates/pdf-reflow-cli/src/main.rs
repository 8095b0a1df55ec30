//! PDF Reflow CLI - translate PDF documents while keeping their layout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use pdf_reflow_core::{
    AppConfig, FontSet, Lang, PageSelection, PdfDocument, ReflowTranslator, Regenerator, RunReport,
    TranslationCache,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    DarkRed,
    Black,
    Blue,
    DarkGreen,
}

impl ColorOption {
    const fn name(self) -> &'static str {
        match self {
            Self::DarkRed => "darkred",
            Self::Black => "black",
            Self::Blue => "blue",
            Self::DarkGreen => "darkgreen",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "pdf-reflow")]
#[command(author, version, about = "Translate PDF documents, fitting the translation into the original layout", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v info, -vv debug, -vvv trace); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Translate missing fragments into the cache, then render the output
    Translate(TranslateArgs),
    /// Render the output from cached translations only, without network access
    Regenerate(CommonArgs),
    /// Delete every cached translation for a language pair
    ClearCache(CacheArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Input PDF file
    input: PathBuf,

    /// Output PDF file (default: <input>-<target>.pdf)
    output: Option<PathBuf>,

    /// Pages to process, 1-based (e.g. "1-5,8" or "3-")
    #[arg(long)]
    pages: Option<String>,

    /// translate: ignore cached translations; regenerate: re-extract fragments
    #[arg(long)]
    ignore_cache: bool,

    /// TrueType font for the translated text (default: first installed system font)
    #[arg(long)]
    font: Option<PathBuf>,

    /// Write the output even when the font lacks glyphs for some characters
    #[arg(long)]
    allow_missing_glyphs: bool,

    /// Translation cache file
    #[arg(long)]
    cache_file: Option<PathBuf>,

    /// Source language code
    #[arg(short = 's', long)]
    source: Option<String>,

    /// Target language code
    #[arg(short = 't', long)]
    target: Option<String>,

    /// Translated text color
    #[arg(long, value_enum)]
    color: Option<ColorOption>,
}

#[derive(Args, Debug)]
struct CacheArgs {
    /// Translation cache file
    #[arg(long)]
    cache_file: Option<PathBuf>,

    /// Source language code
    #[arg(short = 's', long)]
    source: Option<String>,

    /// Target language code
    #[arg(short = 't', long)]
    target: Option<String>,
}

#[derive(Args, Debug)]
struct TranslateArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// OpenAI API base URL
    #[arg(long, env = "OPENAI_API_BASE")]
    api_base: Option<String>,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model name for OpenAI-compatible API
    #[arg(long, env = "OPENAI_MODEL")]
    model: Option<String>,

    /// Concurrent translation requests
    #[arg(long)]
    workers: Option<usize>,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display())),
        None => Ok(AppConfig::load()),
    }
}

/// Apply the flags shared by both subcommands
fn apply_common(config: &mut AppConfig, args: &CommonArgs) {
    if let Some(ref source) = args.source {
        config.source_lang = Lang::new(source);
    }
    if let Some(ref target) = args.target {
        config.target_lang = Lang::new(target);
    }
    if let Some(color) = args.color {
        config.render.text_color = color.name().to_string();
    }
    if args.cache_file.is_some() {
        config.cache.path.clone_from(&args.cache_file);
    }
    config.cache.ignore_cache = args.ignore_cache;
    if args.allow_missing_glyphs {
        config.render.allow_missing_glyphs = true;
    }
}

fn load_fonts(path: Option<&Path>) -> Result<FontSet> {
    path.map_or_else(
        || Ok(FontSet::system()),
        |path| {
            FontSet::from_font_file(path)
                .with_context(|| format!("Failed to load font {}", path.display()))
        },
    )
}

fn page_selection(pages: Option<&str>, doc: &PdfDocument) -> Result<PageSelection> {
    pages.map_or_else(
        || Ok(PageSelection::all(doc.page_count())),
        |spec| {
            PageSelection::parse(spec, doc.page_count())
                .with_context(|| format!("No valid pages in '{spec}' (document has {} pages)", doc.page_count()))
        },
    )
}

fn output_path(args: &CommonArgs, target: &Lang) -> PathBuf {
    args.output.clone().unwrap_or_else(|| {
        let stem = args
            .input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        args.input.with_file_name(format!("{stem}-{target}.pdf"))
    })
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    // Template is hardcoded and valid, unwrap is safe
    #[allow(clippy::unwrap_used)]
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb
}

fn log_warnings(report: &RunReport) {
    for warning in &report.warnings {
        warn!("{warning}");
    }
}

/// Phase 2 and writing the output file
fn regenerate(config: AppConfig, args: &CommonArgs, doc: &PdfDocument, selection: &PageSelection) -> Result<()> {
    let fonts = load_fonts(args.font.as_deref())?;
    let output = output_path(args, &config.target_lang);

    let result = Regenerator::new(config)
        .with_fonts(fonts)
        .regenerate(doc, selection)
        .context("Failed to render translated PDF")?;
    log_warnings(&result.report);

    std::fs::write(&output, &result.pdf_bytes)
        .with_context(|| format!("Failed to write output: {}", output.display()))?;

    // CLI output is intentional
    #[allow(clippy::print_stdout)]
    {
        let report = &result.report;
        println!(
            "Stamped {} fragments on {} pages ({} marked untranslated, {} overflowing)",
            report.stamped,
            report.pages,
            report.marked,
            report.overflows()
        );
        if report.missing_glyphs() > 0 {
            println!("{} fragments contain characters the font cannot draw", report.missing_glyphs());
        }
        if report.image_only_pages() > 0 {
            println!("{} pages have no extractable text and were left unchanged", report.image_only_pages());
        }
        println!("Translated PDF saved to: {}", output.display());
    }

    Ok(())
}

async fn translate(mut config: AppConfig, args: TranslateArgs) -> Result<()> {
    apply_common(&mut config, &args.common);
    if let Some(api_base) = args.api_base {
        config.translator.api_base = api_base;
    }
    if args.api_key.is_some() {
        config.translator.api_key = args.api_key;
    }
    if let Some(model) = args.model {
        config.translator.model = model;
    }
    if let Some(workers) = args.workers {
        config.translator.max_workers = workers;
    }
    config.validate().context("Invalid configuration")?;

    info!("Loading PDF: {}", args.common.input.display());
    let doc = PdfDocument::from_file(&args.common.input)
        .with_context(|| format!("Failed to load PDF: {}", args.common.input.display()))?;
    let selection = page_selection(args.common.pages.as_deref(), &doc)?;
    info!("Translating {} of {} pages", selection.len(), doc.page_count());

    let translator = ReflowTranslator::new(config.clone()).context("Failed to initialize translator")?;
    let cache = Arc::clone(translator.cache());

    let pb = progress_bar();
    let bar = pb.clone();
    let progress = move |done: usize, total: usize| {
        bar.set_length(total as u64);
        bar.set_position(done as u64);
    };

    let report = tokio::select! {
        result = translator.translate(&doc, &selection, Some(&progress)) => {
            result.context("Translation failed")?
        }
        _ = tokio::signal::ctrl_c() => {
            pb.abandon_with_message("Interrupted");
            cache.bulk_flush().context("Failed to save translation cache")?;
            anyhow::bail!("Interrupted; completed translations were saved to {}", cache.path().display());
        }
    };
    pb.finish_and_clear();
    log_warnings(&report);

    // CLI output is intentional
    #[allow(clippy::print_stdout)]
    {
        println!(
            "Translated {} texts ({} cached, {} failed)",
            report.translated,
            report.cache_hits,
            report.failed_translations()
        );
    }

    // phase 2 reads the sidecar just written
    config.cache.ignore_cache = false;
    regenerate(config, &args.common, &doc, &selection)
}

fn regenerate_only(mut config: AppConfig, args: &CommonArgs) -> Result<()> {
    apply_common(&mut config, args);
    config.validate().context("Invalid configuration")?;

    let doc = PdfDocument::from_file(&args.input)
        .with_context(|| format!("Failed to load PDF: {}", args.input.display()))?;
    let selection = page_selection(args.pages.as_deref(), &doc)?;
    info!("Regenerating {} of {} pages", selection.len(), doc.page_count());

    regenerate(config, args, &doc, &selection)
}

fn clear_cache(mut config: AppConfig, args: &CacheArgs) -> Result<()> {
    if let Some(ref source) = args.source {
        config.source_lang = Lang::new(source);
    }
    if let Some(ref target) = args.target {
        config.target_lang = Lang::new(target);
    }
    if args.cache_file.is_some() {
        config.cache.path.clone_from(&args.cache_file);
    }
    config.validate().context("Invalid configuration")?;

    let cache = TranslationCache::from_config(&config);
    let removed = cache
        .clear()
        .with_context(|| format!("Failed to clear cache {}", cache.path().display()))?;

    // CLI output is intentional
    #[allow(clippy::print_stdout)]
    {
        println!("Removed {removed} translations from {}", cache.path().display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before parsing args so env vars are available)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Translate(args) => translate(config, args).await,
        Command::Regenerate(args) => regenerate_only(config, &args),
        Command::ClearCache(args) => clear_cache(config, &args),
    }
}
