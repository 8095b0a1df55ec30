//! On-disk JSON format of the translation cache.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{CacheEntry, CacheKey};
use crate::config::Lang;
use crate::error::{Error, Result};

pub const CACHE_FILE_VERSION: u32 = 1;

#[derive(Serialize)]
struct CacheFileRef<'a> {
    version: u32,
    source_lang: &'a Lang,
    target_lang: &'a Lang,
    entries: BTreeMap<&'a CacheKey, &'a CacheEntry>,
}

#[derive(Deserialize)]
struct CacheFile {
    version: u32,
    source_lang: Lang,
    target_lang: Lang,
    entries: HashMap<CacheKey, CacheEntry>,
}

/// Read a cache file. A missing file is an empty cache.
pub fn read(path: &Path, source: &Lang, target: &Lang) -> Result<HashMap<CacheKey, CacheEntry>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(Error::CacheCorrupt(format!("{}: {e}", path.display()))),
    };

    let file: CacheFile = serde_json::from_slice(&bytes)
        .map_err(|e| Error::CacheCorrupt(format!("{}: {e}", path.display())))?;

    if file.version != CACHE_FILE_VERSION {
        return Err(Error::CacheCorrupt(format!(
            "{}: unsupported version {}",
            path.display(),
            file.version
        )));
    }

    if &file.source_lang != source || &file.target_lang != target {
        return Err(Error::CacheCorrupt(format!(
            "{}: written for {}->{}, expected {}->{}",
            path.display(),
            file.source_lang,
            file.target_lang,
            source,
            target
        )));
    }

    Ok(file.entries)
}

/// Write entries sorted by key to a temp file next to `path`, then rename it over `path`.
///
/// The temp file is removed on any failure, leaving the previous cache intact.
pub fn write_atomic(
    path: &Path,
    source: &Lang,
    target: &Lang,
    entries: &HashMap<CacheKey, CacheEntry>,
) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| Error::CacheWrite(format!("{}: {e}", dir.display())))?;

    let file = CacheFileRef {
        version: CACHE_FILE_VERSION,
        source_lang: source,
        target_lang: target,
        entries: entries.iter().collect(),
    };
    let json = serde_json::to_vec_pretty(&file)?;

    let write_err = |e: std::io::Error| Error::CacheWrite(format!("{}: {e}", path.display()));

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(&json).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;

    Ok(())
}
