//! Catalog of known template families
//!
//! Each entry pairs a canonical template string (the reference chat template
//! a model family ships with) with the prompt template used to render it.
//! Arbitrary template text is matched to the closest entry by edit distance.

use std::io::{Cursor, Read};
use std::sync::OnceLock;

use include_dir::{include_dir, Dir};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::Template;

static TEMPLATES: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/templates");

/// Matches at or above this edit distance are rejected
pub const MATCH_THRESHOLD: usize = 100;

/// Errors from loading or querying a catalog
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("no matching template found")]
    NotFound,

    #[error("invalid catalog index: {0}")]
    Index(String),

    #[error("missing template source for {name}")]
    MissingSource { name: String },
}

#[derive(Debug, Deserialize)]
struct IndexRecord {
    name: String,
    template: String,
}

/// A named template family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    /// Canonical string matched against by [`Catalog::resolve`]
    pub template: String,
    bytes: Vec<u8>,
}

impl CatalogEntry {
    /// Raw template source, line endings normalized to LF
    pub fn reader(&self) -> impl Read + '_ {
        Cursor::new(self.bytes.as_slice())
    }

    pub fn source(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Compile the raw source
    pub fn template(&self) -> Result<Template, crate::Error> {
        Template::parse(&self.source())
    }
}

/// An ordered, immutable set of catalog entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Build a catalog from a JSON index (`[{"name": .., "template": ..}]`)
    /// and a lookup returning the contents of `<name>.gotmpl`.
    pub fn from_parts<F>(index: &[u8], sources: F) -> Result<Self, CatalogError>
    where
        F: Fn(&str) -> Option<Vec<u8>>,
    {
        let records: Vec<IndexRecord> =
            serde_json::from_slice(index).map_err(|e| CatalogError::Index(e.to_string()))?;

        let entries = records
            .into_iter()
            .map(|record| {
                let file = format!("{}.gotmpl", record.name);
                let bytes = sources(&file).ok_or_else(|| CatalogError::MissingSource {
                    name: record.name.clone(),
                })?;
                Ok(CatalogEntry {
                    name: record.name,
                    template: record.template,
                    bytes: normalize_line_endings(&bytes),
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;

        Ok(Self { entries })
    }

    /// The catalog embedded in this crate, loaded once per process.
    ///
    /// A load failure is cached and returned to every caller.
    pub fn builtin() -> Result<&'static Catalog, CatalogError> {
        static CATALOG: OnceLock<Result<Catalog, CatalogError>> = OnceLock::new();
        CATALOG
            .get_or_init(|| {
                let loaded = load_builtin();
                match &loaded {
                    Ok(catalog) => info!(entries = catalog.entries.len(), "loaded template catalog"),
                    Err(e) => warn!(error = %e, "failed to load template catalog"),
                }
                loaded
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// The entry with the smallest edit distance to `source`, with that
    /// distance. Ties go to the earlier entry.
    pub fn closest(&self, source: &str) -> Option<(&CatalogEntry, usize)> {
        let mut best: Option<(&CatalogEntry, usize)> = None;
        for entry in &self.entries {
            let distance = levenshtein_distance(source, &entry.template);
            if best.map_or(true, |(_, score)| distance < score) {
                best = Some((entry, distance));
            }
        }
        best
    }

    /// Resolve `source` to the closest entry within [`MATCH_THRESHOLD`]
    pub fn resolve(&self, source: &str) -> Result<&CatalogEntry, CatalogError> {
        self.resolve_with_threshold(source, MATCH_THRESHOLD)
    }

    /// Resolve `source`, accepting only distances strictly below `threshold`
    pub fn resolve_with_threshold(
        &self,
        source: &str,
        threshold: usize,
    ) -> Result<&CatalogEntry, CatalogError> {
        match self.closest(source) {
            Some((entry, distance)) if distance < threshold => {
                debug!(name = %entry.name, distance, "matched catalog template");
                Ok(entry)
            }
            Some((entry, distance)) => {
                debug!(name = %entry.name, distance, threshold, "closest catalog template too far");
                Err(CatalogError::NotFound)
            }
            None => Err(CatalogError::NotFound),
        }
    }
}

/// Resolve `source` against the built-in catalog
pub fn named(source: &str) -> Result<&'static CatalogEntry, CatalogError> {
    Catalog::builtin()?.resolve(source)
}

fn load_builtin() -> Result<Catalog, CatalogError> {
    let index = TEMPLATES
        .get_file("index.json")
        .ok_or_else(|| CatalogError::Index("index.json not embedded".to_string()))?;
    Catalog::from_parts(index.contents(), |file| {
        TEMPLATES.get_file(file).map(|f| f.contents().to_vec())
    })
}

fn normalize_line_endings(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().peekable();
    while let Some(&b) = iter.next() {
        if b == b'\r' && iter.peek() == Some(&&b'\n') {
            continue;
        }
        out.push(b);
    }
    out
}

/// Character-level Levenshtein distance
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0usize; b_chars.len() + 1];

    for (i, ca) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}
