//! Utility functions shared across the crate.

use std::path::{Path, PathBuf};

use crate::config::Lang;

/// Directory name used under the XDG config and cache roots
pub const APP_DIR: &str = "pdf-reflow";

/// Get the user's config directory following XDG conventions.
///
/// Returns `$XDG_CONFIG_HOME` if set, otherwise `$HOME/.config`.
pub fn config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
}

/// Get the user's cache directory following XDG conventions.
///
/// Returns `$XDG_CACHE_HOME` if set, otherwise `$HOME/.cache`.
pub fn cache_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
}

fn app_cache_dir() -> PathBuf {
    cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join(APP_DIR)
}

/// Default translation cache file for a language pair.
pub fn translation_cache_path(source: &Lang, target: &Lang) -> PathBuf {
    app_cache_dir().join(format!("translations-{source}-{target}.json"))
}

/// Fragment sidecar for a document digest, in `dir` or the default location.
pub fn fragment_sidecar_path(dir: Option<&Path>, document_digest: &str) -> PathBuf {
    dir.map_or_else(|| app_cache_dir().join("fragments"), Path::to_path_buf)
        .join(format!("{document_digest}.json"))
}

/// Unicode TrueType fonts commonly installed on Linux, macOS and Windows,
/// in order of preference. All of them cover Latin, Greek and Cyrillic.
const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/google-noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
    "/Library/Fonts/Arial Unicode.ttf",
    "/System/Library/Fonts/Supplemental/Arial Unicode.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Georgia.ttf",
    "C:/Windows/Fonts/arial.ttf",
    "C:/Windows/Fonts/times.ttf",
];

/// Installed system fonts from the candidate list, most preferred first.
pub fn system_font_paths() -> impl Iterator<Item = PathBuf> {
    SYSTEM_FONT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .filter(|path| path.is_file())
}
