use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

/// Terms made only of these characters get word-boundary anchors.
/// The anchors are ASCII-only, so Han or other non-ASCII text next to a term counts as
/// a boundary.
static NON_WORDISH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\s]").expect("non-wordish regex"));

const PATTERN_SIZE_LIMIT: usize = 256 << 20;

/// Source term -> target term, in authored order.
#[derive(Clone, Debug, Default)]
pub struct TermDictionary {
    entries: Vec<(String, String)>,
}

impl TermDictionary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read dictionary: {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("load dictionary: {}", path.display()))
    }

    /// Parses a flat `{ "source": "target" }` object. Nested values are rejected.
    pub fn from_json_str(text: &str) -> anyhow::Result<Self> {
        let map: Map<String, Value> =
            serde_json::from_str(text).context("parse dictionary json")?;
        let mut entries = Vec::with_capacity(map.len());
        for (src, tgt) in map {
            match tgt {
                Value::String(tgt) => entries.push((src, tgt)),
                other => {
                    return Err(anyhow::anyhow!(
                        "dictionary value for {src:?} is not a string: {other}"
                    ))
                }
            }
        }
        Ok(Self { entries })
    }

    /// Keys stay unique: inserting an existing key replaces its target in place.
    pub fn insert(&mut self, src: impl Into<String>, tgt: impl Into<String>) {
        let src = src.into();
        let tgt = tgt.into();
        match self.entries.iter_mut().find(|(k, _)| *k == src) {
            Some(entry) => entry.1 = tgt,
            None => self.entries.push((src, tgt)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TermDictionary {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut dict = Self::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}

/// Lookup index plus the single longest-first pattern built from a [`TermDictionary`].
///
/// The empty value (no pattern) turns every substitution into a passthrough; it is
/// what callers get before a dictionary is loaded or when loading fails.
#[derive(Clone, Debug, Default)]
pub struct CompiledDictionary {
    terms: TermDictionary,
    index: HashMap<String, String>,
    pattern: Option<Regex>,
}

impl CompiledDictionary {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn compile(terms: TermDictionary) -> Self {
        let mut index = HashMap::with_capacity(terms.len());
        for (src, tgt) in terms.iter() {
            index.insert(src.to_lowercase(), tgt.to_string());
        }

        let pattern = match build_pattern(&terms) {
            Ok(p) => p,
            Err(err) => {
                log::error!("failed to compile dictionary pattern: {err:#}");
                None
            }
        };
        if pattern.is_some() {
            log::info!("compiled dictionary: {} terms", terms.len());
        }

        Self {
            terms,
            index,
            pattern,
        }
    }

    /// Loads and compiles `path`; any failure degrades to the empty dictionary.
    #[must_use]
    pub fn load_or_empty(path: &Path) -> Self {
        match TermDictionary::load(path) {
            Ok(terms) => Self::compile(terms),
            Err(err) => {
                log::error!("dictionary unavailable, translation disabled: {err:#}");
                Self::empty()
            }
        }
    }

    #[must_use]
    pub fn terms(&self) -> &TermDictionary {
        &self.terms
    }

    #[must_use]
    pub fn pattern(&self) -> Option<&Regex> {
        self.pattern.as_ref()
    }

    #[must_use]
    pub fn lookup(&self, term: &str) -> Option<&str> {
        self.index.get(&term.to_lowercase()).map(|s| s.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

fn build_pattern(terms: &TermDictionary) -> anyhow::Result<Option<Regex>> {
    let mut keys: Vec<&str> = terms.iter().map(|(k, _)| k).filter(|k| !k.is_empty()).collect();
    if keys.is_empty() {
        return Ok(None);
    }
    // Stable sort: equal lengths keep dictionary order.
    keys.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));

    let alternation = keys
        .iter()
        .map(|k| term_alternative(k))
        .collect::<Vec<_>>()
        .join("|");
    let re = RegexBuilder::new(&alternation)
        .case_insensitive(true)
        .size_limit(PATTERN_SIZE_LIMIT)
        .dfa_size_limit(PATTERN_SIZE_LIMIT)
        .build()
        .context("build dictionary regex")?;
    Ok(Some(re))
}

fn term_alternative(term: &str) -> String {
    let escaped = regex::escape(term);
    if NON_WORDISH_RE.is_match(term) {
        escaped
    } else {
        format!(r"(?-u:\b){escaped}(?-u:\b)")
    }
}
