//! Slug generation for AOI names.
//!
//! Slugs key the extraction cache, name output artifacts, and match AOI
//! names that differ only in punctuation or case.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

/// Runs of characters that are not ASCII letters or digits.
static NON_ALNUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// How AOI names are turned into slugs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlugRule {
    /// Separator placed between alphanumeric runs.
    pub separator: String,
}

impl Default for SlugRule {
    fn default() -> Self {
        Self {
            separator: "_".to_string(),
        }
    }
}

impl SlugRule {
    /// Slugifies `name`: accents folded to ASCII, lowercase, every run of
    /// non `[a-z0-9]` characters becomes one separator, leading and trailing
    /// separators dropped.
    ///
    /// Letters with no ASCII decomposition are still treated as separators.
    #[must_use]
    pub fn slugify(&self, name: &str) -> String {
        let lower = fold_to_ascii(name).to_lowercase();
        let replaced = NON_ALNUM_RE.replace_all(&lower, self.separator.as_str());
        if self.separator.is_empty() {
            return replaced.into_owned();
        }
        replaced
            .trim_matches(|c| self.separator.contains(c))
            .to_string()
    }

    /// Slug for a run covering several AOIs: the single slug, or all slugs
    /// joined by the separator.
    #[must_use]
    pub fn run_slug(&self, aois: &[String]) -> String {
        aois.iter()
            .map(|a| self.slugify(a))
            .collect::<Vec<_>>()
            .join(&self.separator)
    }
}

/// Compatibility-decomposes `name` and drops the combining marks, so
/// `São` becomes `Sao`.
fn fold_to_ascii(name: &str) -> String {
    name.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Appends `, {country}` to `aoi` unless the country already appears in it
/// (case-insensitive).
#[must_use]
pub fn ensure_country(aoi: &str, country: &str) -> String {
    if country.is_empty() || aoi.to_lowercase().contains(&country.to_lowercase()) {
        aoi.to_string()
    } else {
        format!("{aoi}, {country}")
    }
}
