//! Resolves the raw map-data source file for an area of interest.
//!
//! Sources live in one directory (e.g. `data/external/pbf/`) and are
//! matched on their file stem against the AOI slug: an exact stem wins,
//! otherwise exactly one stem containing the slug is accepted. Anything
//! else is an error carrying enough context for the operator to fix the
//! selection.

use std::path::{Path, PathBuf};

/// Default source file suffix.
pub const PBF_SUFFIX: &str = ".osm.pbf";

/// Source resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The source directory is missing or has no candidate files at all.
    #[error("No {suffix} sources found in {dir}")]
    NoSources {
        /// Directory that was searched.
        dir: String,
        /// File suffix that was searched for.
        suffix: String,
    },

    /// No source matches the AOI.
    #[error("Missing source for AOI '{aoi}' (slug '{slug}') in {dir}\n   Available: {}", .available.join(", "))]
    NotFound {
        /// AOI name as given.
        aoi: String,
        /// Slug that was matched.
        slug: String,
        /// Directory that was searched.
        dir: String,
        /// Every available stem, sorted.
        available: Vec<String>,
    },

    /// Several sources contain the slug and none matches exactly.
    #[error("Ambiguous source for AOI '{aoi}' (slug '{slug}'); multiple matches:\n   - {}", .candidates.join("\n   - "))]
    Ambiguous {
        /// AOI name as given.
        aoi: String,
        /// Slug that was matched.
        slug: String,
        /// Matching file names, sorted.
        candidates: Vec<String>,
    },

    /// Directory listing failed.
    #[error("I/O error reading {dir}: {source}")]
    Io {
        /// Directory that was searched.
        dir: String,
        /// Underlying error.
        source: std::io::Error,
    },
}

/// Finds the source file for `aoi` (already slugified as `slug`) in `dir`.
///
/// # Errors
///
/// Returns [`ResolveError::NoSources`] when nothing with `suffix` exists,
/// [`ResolveError::NotFound`] when nothing matches, and
/// [`ResolveError::Ambiguous`] when several stems contain the slug without
/// an exact match.
pub fn find_source(
    dir: &Path,
    aoi: &str,
    slug: &str,
    suffix: &str,
) -> Result<PathBuf, ResolveError> {
    let files = list_sources(dir, suffix)?;
    if files.is_empty() {
        return Err(ResolveError::NoSources {
            dir: dir.display().to_string(),
            suffix: suffix.to_string(),
        });
    }

    let slug = slug.to_lowercase();
    let mut candidates: Vec<&(String, PathBuf)> = Vec::new();

    for entry in &files {
        let stem = entry.0.to_lowercase();
        if stem == slug {
            log::debug!("Exact source match for '{aoi}': {}", entry.1.display());
            return Ok(entry.1.clone());
        }
        if stem.contains(&slug) {
            candidates.push(entry);
        }
    }

    match candidates.as_slice() {
        [(_, path)] => Ok(path.clone()),
        [] => {
            let mut available: Vec<String> = files.into_iter().map(|(stem, _)| stem).collect();
            available.sort();
            Err(ResolveError::NotFound {
                aoi: aoi.to_string(),
                slug,
                dir: dir.display().to_string(),
                available,
            })
        }
        many => {
            let mut names: Vec<String> = many
                .iter()
                .filter_map(|(_, p)| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect();
            names.sort();
            Err(ResolveError::Ambiguous {
                aoi: aoi.to_string(),
                slug,
                candidates: names,
            })
        }
    }
}

/// Lists `(stem, path)` pairs for files in `dir` ending with `suffix`.
///
/// The stem is the file name with the whole suffix removed, so
/// `melbourne.osm.pbf` has stem `melbourne`. A missing directory yields an
/// empty list.
fn list_sources(dir: &Path, suffix: &str) -> Result<Vec<(String, PathBuf)>, ResolveError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let io_err = |source| ResolveError::Io {
        dir: dir.display().to_string(),
        source,
    };

    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(stem) = name.strip_suffix(suffix) {
            out.push((stem.to_string(), path.clone()));
        }
    }
    Ok(out)
}
