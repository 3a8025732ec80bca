// Metric dictionary
//
// In-memory index over the metric catalog. Lookups rank entries by alias
// equality, substring containment and token overlap; Chinese text is compared
// on character bigrams instead of whitespace tokens.

use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::hash::{Hash, Hasher};
use std::io::Read;
use std::path::Path;
use strsim::jaro_winkler;
use thiserror::Error;

use crate::error::TranslateError;
use crate::models::{is_cjk, Language, MetricEntry, MetricMatch, QueryIntent, TagSpec};

/// Scores closer than this to the best score count as a tie
const TIE_EPSILON: f64 = 1e-9;

/// Minimum Jaro-Winkler similarity for two ASCII words to count as the same token
const FUZZY_TOKEN_SIMILARITY: f64 = 0.92;

const EXACT_SCORE: f64 = 1.0;
const KEY_IN_TEXT_BASE: f64 = 0.6;
const TEXT_IN_KEY_BASE: f64 = 0.5;
const COVERAGE_WEIGHT: f64 = 0.3;
const TOKEN_OVERLAP_WEIGHT: f64 = 0.55;
const DESCRIPTION_WEIGHT: f64 = 0.35;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read metric catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid metric catalog header: {0}")]
    Header(String),

    #[error("Metric catalog contains no valid rows")]
    Empty,
}

impl From<CatalogError> for TranslateError {
    fn from(err: CatalogError) -> Self {
        TranslateError::Catalog(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    aliases: String,
}

impl CatalogRow {
    fn into_entry(self) -> Result<MetricEntry, String> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err("missing metric name".to_string());
        }

        let mut entry = MetricEntry::new(name, self.description.trim());
        let mut seen_keys = HashSet::new();
        for raw in self.tags.split(';').filter(|t| !t.trim().is_empty()) {
            let tag = TagSpec::parse(raw)?;
            if !seen_keys.insert(tag.key.clone()) {
                return Err(format!("tag '{}' declared twice", tag.key));
            }
            entry = entry.with_tag(tag);
        }
        for alias in self.aliases.split('|').map(str::trim).filter(|a| !a.is_empty()) {
            entry = entry.with_alias(alias);
        }
        Ok(entry)
    }
}

/// Read-only metric vocabulary shared by all requests
#[derive(Debug, Clone)]
pub struct MetricDictionary {
    entries: Vec<MetricEntry>,
    catalog_version: String,
    /// Values declared for a tag key by any entry, used for free-form tags
    tag_vocabulary: BTreeMap<String, BTreeSet<String>>,
}

impl MetricDictionary {
    pub fn from_entries(entries: Vec<MetricEntry>, catalog_version: impl Into<String>) -> Self {
        let mut tag_vocabulary: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for entry in &entries {
            for tag in &entry.tags {
                if let Some(values) = &tag.allowed_values {
                    tag_vocabulary
                        .entry(tag.key.clone())
                        .or_default()
                        .extend(values.iter().cloned());
                }
            }
        }

        Self {
            entries,
            catalog_version: catalog_version.into(),
            tag_vocabulary,
        }
    }

    /// Load the catalog from a CSV file; the version is a hash of its contents
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut hasher = DefaultHasher::new();
        contents.hash(&mut hasher);
        let version = format!("{:016x}", hasher.finish());

        let dictionary = Self::from_reader(contents.as_bytes(), version)?;
        tracing::info!(
            "Loaded {} metrics from {} (catalog version {})",
            dictionary.len(),
            path.display(),
            dictionary.catalog_version()
        );
        Ok(dictionary)
    }

    /// Parse catalog rows, skipping malformed ones with a warning
    pub fn from_reader<R: Read>(reader: R, catalog_version: impl Into<String>) -> Result<Self, CatalogError> {
        let mut csv_reader = ReaderBuilder::new()
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let headers = csv_reader
            .headers()
            .map_err(|e| CatalogError::Header(e.to_string()))?
            .clone();
        if !headers.iter().any(|h| h == "name") {
            return Err(CatalogError::Header("missing required column 'name'".to_string()));
        }

        let mut entries: Vec<MetricEntry> = Vec::new();
        let mut names = HashSet::new();
        for (idx, row) in csv_reader.deserialize::<CatalogRow>().enumerate() {
            // header is line 1
            let line = idx + 2;
            let entry = match row.map_err(|e| e.to_string()).and_then(CatalogRow::into_entry) {
                Ok(entry) => entry,
                Err(reason) => {
                    tracing::warn!("Skipping malformed catalog row at line {}: {}", line, reason);
                    continue;
                }
            };
            if !names.insert(entry.name.clone()) {
                tracing::warn!("Skipping duplicate metric '{}' at line {}", entry.name, line);
                continue;
            }
            entries.push(entry);
        }

        if entries.is_empty() {
            return Err(CatalogError::Empty);
        }

        Ok(Self::from_entries(entries, catalog_version))
    }

    pub fn catalog_version(&self) -> &str {
        &self.catalog_version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MetricEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&MetricEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Rank catalog entries against a text fragment.
    ///
    /// Returns an empty vector when nothing matches; ties keep catalog order.
    pub fn lookup(&self, text_fragment: &str, language: Language) -> Vec<MetricMatch<'_>> {
        let fragment = normalize(text_fragment);
        if fragment.is_empty() {
            return Vec::new();
        }
        let fragment_tokens = tokenize(&fragment, language);

        let mut matches: Vec<MetricMatch<'_>> = self
            .entries
            .iter()
            .map(|entry| MetricMatch {
                entry,
                score: score_entry(entry, &fragment, &fragment_tokens, language),
            })
            .filter(|m| m.score > 0.0)
            .collect();

        // stable sort: equal scores stay in insertion order
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        matches
    }

    /// Turn a question into a query intent, or fail before any generation
    /// happens when the metric is unknown or ambiguous.
    pub fn resolve_intent(&self, text: &str, min_score: f64) -> Result<QueryIntent<'_>, TranslateError> {
        let language = Language::detect(text);
        let matches = self.lookup(text, language);

        let best_score = matches.first().map(|m| m.score).unwrap_or(0.0);
        if best_score < min_score {
            tracing::info!("No metric above threshold {:.2} (best {:.2})", min_score, best_score);
            return Err(TranslateError::UnknownMetric { best_score });
        }

        let above: Vec<MetricMatch<'_>> = matches.into_iter().filter(|m| m.score >= min_score).collect();
        let tied: Vec<MetricMatch<'_>> = above
            .iter()
            .filter(|m| best_score - m.score <= TIE_EPSILON)
            .copied()
            .collect();

        let winner = if tied.len() == 1 {
            tied[0]
        } else {
            let tags = self.extract_tags(text, tied.iter().map(|m| m.entry));
            let narrowed: Vec<MetricMatch<'_>> = tied
                .iter()
                .filter(|m| {
                    !tags.is_empty()
                        && tags
                            .iter()
                            .all(|(key, value)| m.entry.tag(key).map_or(false, |t| t.admits(value)))
                })
                .copied()
                .collect();
            if narrowed.len() != 1 {
                let candidates: Vec<String> = tied.iter().map(|m| m.entry.name.clone()).collect();
                tracing::info!("Ambiguous metric match: {:?}", candidates);
                return Err(TranslateError::AmbiguousMetric { candidates });
            }
            narrowed[0]
        };

        let mut ordered = vec![winner];
        ordered.extend(
            above
                .iter()
                .filter(|m| best_score - m.score > TIE_EPSILON)
                .copied(),
        );

        let matched_metrics: Vec<&MetricEntry> = ordered.iter().map(|m| m.entry).collect();
        let matched_tags = self.extract_tags(text, matched_metrics.iter().copied());

        Ok(QueryIntent {
            raw_text: text.to_string(),
            detected_language: language,
            scores: ordered.iter().map(|m| m.score).collect(),
            matched_metrics,
            matched_tags,
        })
    }

    /// Collect tag values mentioned in the text for the given metrics.
    /// Earlier metrics win when two declare the same tag key.
    fn extract_tags<'e>(
        &self,
        text: &str,
        metrics: impl Iterator<Item = &'e MetricEntry>,
    ) -> BTreeMap<String, String> {
        let lowered = text.to_lowercase();
        let mut tags = BTreeMap::new();

        for entry in metrics {
            for tag in &entry.tags {
                if tags.contains_key(&tag.key) {
                    continue;
                }
                let vocabulary = tag
                    .allowed_values
                    .as_ref()
                    .or_else(|| self.tag_vocabulary.get(&tag.key));

                let found = vocabulary
                    .and_then(|values| {
                        values
                            .iter()
                            .filter(|v| lowered.contains(&v.to_lowercase()))
                            .max_by_key(|v| v.chars().count())
                            .cloned()
                    })
                    .or_else(|| {
                        if tag.allowed_values.is_none() {
                            free_form_value(&lowered, text, &tag.key)
                        } else {
                            None
                        }
                    });

                if let Some(value) = found {
                    tags.insert(tag.key.clone(), value);
                }
            }
        }
        tags
    }
}

fn score_entry(entry: &MetricEntry, fragment: &str, fragment_tokens: &[String], language: Language) -> f64 {
    let mut best: f64 = 0.0;

    for key in std::iter::once(&entry.name).chain(entry.aliases.iter()) {
        let key = normalize(key);
        if key.is_empty() {
            continue;
        }
        let score = if key == fragment {
            EXACT_SCORE
        } else if fragment.contains(&key) {
            KEY_IN_TEXT_BASE + COVERAGE_WEIGHT * coverage(&key, fragment)
        } else if key.contains(fragment) {
            TEXT_IN_KEY_BASE + COVERAGE_WEIGHT * coverage(fragment, &key)
        } else {
            TOKEN_OVERLAP_WEIGHT * jaccard(&tokenize(&key, language), fragment_tokens)
        };
        best = best.max(score);
    }

    if !entry.description.is_empty() {
        let description = normalize(&entry.description);
        best = best.max(DESCRIPTION_WEIGHT * jaccard(&tokenize(&description, language), fragment_tokens));
    }

    best
}

fn coverage(part: &str, whole: &str) -> f64 {
    let whole_len = whole.chars().count();
    if whole_len == 0 {
        return 0.0;
    }
    part.chars().count() as f64 / whole_len as f64
}

/// Lower-case, treat `_`/`-` as spaces and collapse whitespace
pub(crate) fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// ASCII words plus CJK character bigrams (single characters for one-char runs).
/// With `Language::En` a CJK run stays one token.
pub(crate) fn tokenize(text: &str, language: Language) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut cjk_run: Vec<char> = Vec::new();

    let flush_word = |word: &mut String, tokens: &mut Vec<String>| {
        if !word.is_empty() {
            tokens.push(std::mem::take(word));
        }
    };
    let flush_cjk = |run: &mut Vec<char>, tokens: &mut Vec<String>| {
        if run.is_empty() {
            return;
        }
        if language == Language::En || run.len() == 1 {
            tokens.push(run.iter().collect());
        } else {
            for pair in run.windows(2) {
                tokens.push(pair.iter().collect());
            }
        }
        run.clear();
    };

    for c in text.chars() {
        if is_cjk(c) {
            flush_word(&mut word, &mut tokens);
            cjk_run.push(c);
        } else if c.is_alphanumeric() {
            flush_cjk(&mut cjk_run, &mut tokens);
            word.extend(c.to_lowercase());
        } else {
            flush_word(&mut word, &mut tokens);
            flush_cjk(&mut cjk_run, &mut tokens);
        }
    }
    flush_word(&mut word, &mut tokens);
    flush_cjk(&mut cjk_run, &mut tokens);

    let mut seen = HashSet::new();
    tokens.retain(|t| seen.insert(t.clone()));
    tokens
}

fn tokens_equal(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let both_ascii = a.is_ascii() && b.is_ascii();
    both_ascii && a.len() >= 4 && b.len() >= 4 && jaro_winkler(a, b) >= FUZZY_TOKEN_SIMILARITY
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.iter().filter(|x| b.iter().any(|y| tokens_equal(x, y))).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

/// Free-form tag values written as `key=value`, `key: value`, `key 为 value` or `key is value`
fn free_form_value(lowered: &str, original: &str, key: &str) -> Option<String> {
    let key = key.to_lowercase();
    let start = lowered.find(&key)? + key.len();
    // lower-casing may change byte lengths; only slice when they line up
    if lowered.len() != original.len() {
        return None;
    }
    let rest = original.get(start..)?.trim_start();
    let rest = ["=", ":", "：", "为", "是", "is "]
        .iter()
        .find_map(|sep| rest.strip_prefix(sep))?
        .trim_start();

    let value: String = rest
        .chars()
        .take_while(|c| !c.is_whitespace() && !",，。;；、".contains(*c))
        .collect();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
