#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Extraction cache for feature layers.
//!
//! Each `(layer, area slug)` pair maps to one `GeoJSON` file,
//! `{area_slug}_{layer}.geojson`, plus a `.sha256` sidecar holding the
//! digest of its bytes. Artifacts are written to a temporary file and
//! renamed into place, so readers never observe a partial write.
//!
//! [`CacheStore::get_or_extract`] coordinates concurrent workers: the first
//! one to create the entry's `.lock` file extracts, the others wait for the
//! artifact to appear. Locks left behind by a crashed process are broken
//! once they are older than the configured stale age.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use hex_features_layer::extract::ExtractError;
use hex_features_layer::{FeatureLayer, LayerError, LayerKind, geojson_io};
use sha2::{Digest, Sha256};

const DIGEST_SUFFIX: &str = "sha256";
const LOCK_SUFFIX: &str = "lock";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Cache failures.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Reading or writing a cache file failed.
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        /// File involved.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The extractor failed on a cache miss.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// The extracted layer is not the requested kind.
    #[error("Extractor returned a {actual} layer when {expected} was requested")]
    WrongKind {
        /// Requested layer.
        expected: LayerKind,
        /// Layer actually returned.
        actual: LayerKind,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// How a [`CacheStore::get_or_extract`] call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The artifact already existed.
    Hit,
    /// This call ran the extractor and stored the result.
    Extracted,
}

/// The on-disk cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    lock_poll: Duration,
    stale_lock: Duration,
}

impl CacheStore {
    /// Creates a store rooted at `dir`. The directory is created lazily on
    /// first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_poll: Duration::from_millis(200),
            stale_lock: Duration::from_secs(3600),
        }
    }

    /// Sets how often waiters poll and when a lock counts as abandoned.
    #[must_use]
    pub const fn with_lock_timing(mut self, poll: Duration, stale: Duration) -> Self {
        self.lock_poll = poll;
        self.stale_lock = stale;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the artifact for `(layer, area_slug)`.
    #[must_use]
    pub fn entry_path(&self, layer: LayerKind, area_slug: &str) -> PathBuf {
        self.dir.join(format!("{area_slug}_{layer}.geojson"))
    }

    fn digest_path(&self, layer: LayerKind, area_slug: &str) -> PathBuf {
        sibling(&self.entry_path(layer, area_slug), DIGEST_SUFFIX)
    }

    fn lock_path(&self, layer: LayerKind, area_slug: &str) -> PathBuf {
        sibling(&self.entry_path(layer, area_slug), LOCK_SUFFIX)
    }

    /// Returns the cached layer, or `None` on a miss.
    ///
    /// An artifact whose digest sidecar disagrees with its bytes, or that
    /// cannot be decoded, is logged and treated as a miss.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if an existing artifact cannot be read.
    pub fn lookup(
        &self,
        layer: LayerKind,
        area_slug: &str,
    ) -> Result<Option<FeatureLayer>, CacheError> {
        let path = self.entry_path(layer, area_slug);
        if !path.is_file() {
            return Ok(None);
        }

        let bytes = fs::read(&path).map_err(io_error(&path))?;

        let digest_path = self.digest_path(layer, area_slug);
        if digest_path.is_file() {
            let expected = fs::read_to_string(&digest_path).map_err(io_error(&digest_path))?;
            if expected.trim() != digest(&bytes) {
                log::warn!(
                    "Cache artifact {} does not match its digest; treating as a miss",
                    path.display()
                );
                return Ok(None);
            }
        }

        let decoded = std::str::from_utf8(&bytes)
            .map_err(|e| e.to_string())
            .and_then(|text| {
                geojson_io::layer_from_geojson_str(layer, text).map_err(|e: LayerError| e.to_string())
            });

        match decoded {
            Ok(cached) => {
                log::info!(
                    "Cache hit: {} ({} features)",
                    path.display(),
                    cached.len()
                );
                Ok(Some(cached))
            }
            Err(e) => {
                log::warn!(
                    "Cache artifact {} is unreadable ({e}); treating as a miss",
                    path.display()
                );
                Ok(None)
            }
        }
    }

    /// Persists `data` for `(layer, area_slug)`, replacing any previous
    /// entry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the directory or files cannot be
    /// written.
    pub fn store(
        &self,
        layer: LayerKind,
        area_slug: &str,
        data: &FeatureLayer,
    ) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;

        let text = geojson_io::layer_to_geojson_string(data);
        let path = self.entry_path(layer, area_slug);
        write_atomic(&path, text.as_bytes())?;
        write_atomic(
            &self.digest_path(layer, area_slug),
            digest(text.as_bytes()).as_bytes(),
        )?;

        log::info!("Cached {} {layer} features at {}", data.len(), path.display());
        Ok(())
    }

    /// Returns the cached layer, extracting and storing it on a miss.
    ///
    /// At most one caller extracts a given entry at a time; concurrent
    /// callers for the same entry block until it is stored and then read
    /// it. If the extracting caller fails, its lock is released and the
    /// next waiter tries.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Extract`] if `extract` fails and
    /// [`CacheError::Io`] for file system failures.
    pub fn get_or_extract<F>(
        &self,
        layer: LayerKind,
        area_slug: &str,
        extract: F,
    ) -> Result<(FeatureLayer, CacheOutcome), CacheError>
    where
        F: FnOnce() -> Result<FeatureLayer, ExtractError>,
    {
        let mut extract = Some(extract);

        loop {
            if let Some(cached) = self.lookup(layer, area_slug)? {
                return Ok((cached, CacheOutcome::Hit));
            }

            let Some(_claim) = self.try_claim(layer, area_slug)? else {
                std::thread::sleep(self.lock_poll);
                continue;
            };

            // Another worker may have stored the entry between our lookup
            // and the claim.
            if let Some(cached) = self.lookup(layer, area_slug)? {
                return Ok((cached, CacheOutcome::Hit));
            }

            log::info!("Cache miss: {layer} for {area_slug}; extracting");
            let Some(extract) = extract.take() else {
                continue;
            };
            let data = extract()?;
            if data.kind != layer {
                return Err(CacheError::WrongKind {
                    expected: layer,
                    actual: data.kind,
                });
            }
            self.store(layer, area_slug, &data)?;
            return Ok((data, CacheOutcome::Extracted));
        }
    }

    /// Creates the entry's lock file. `None` means another live worker
    /// holds it; an abandoned lock is removed and the claim retried once.
    fn try_claim(&self, layer: LayerKind, area_slug: &str) -> Result<Option<Claim>, CacheError> {
        fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;
        let path = self.lock_path(layer, area_slug);

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Some(Claim { path }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if !self.is_stale(&path) {
                        return Ok(None);
                    }
                    log::warn!("Breaking stale cache lock {}", path.display());
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(io_error(&path)(e)),
                    }
                }
                Err(e) => return Err(io_error(&path)(e)),
            }
        }

        Ok(None)
    }

    fn is_stale(&self, lock: &Path) -> bool {
        fs::metadata(lock)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age >= self.stale_lock)
    }
}

/// A held entry lock; released on drop.
struct Claim {
    path: PathBuf,
}

impl Drop for Claim {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to release cache lock {}: {e}", self.path.display());
        }
    }
}

/// Hex-encoded SHA-256 of `bytes`.
#[must_use]
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let tmp = sibling(
        path,
        &format!(
            "tmp-{}-{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ),
    );
    fs::write(&tmp, bytes).map_err(io_error(&tmp))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        io_error(path)(e)
    })
}
