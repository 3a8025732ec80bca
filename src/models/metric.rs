use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A tag dimension declared for a metric in the catalog.
///
/// The position of a tag inside `MetricEntry::tags` decides which slot pair of
/// the metrics table carries it: the first tag lives in `tagK1`/`tagV1`, the
/// second in `tagK2`/`tagV2`, and so on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSpec {
    pub key: String,
    /// `None` means the tag accepts free-form values
    pub allowed_values: Option<BTreeSet<String>>,
}

impl TagSpec {
    pub fn free_form(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            allowed_values: None,
        }
    }

    pub fn with_values<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            allowed_values: Some(values.into_iter().map(Into::into).collect()),
        }
    }

    /// Whether `value` is acceptable for this tag
    pub fn admits(&self, value: &str) -> bool {
        match &self.allowed_values {
            Some(values) => values.iter().any(|v| v.eq_ignore_ascii_case(value)),
            None => true,
        }
    }

    /// Parse one tag spec from the catalog notation: `city` or `city:深圳|上海`
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        match raw.split_once(':') {
            None => {
                if raw.is_empty() {
                    return Err("empty tag key".to_string());
                }
                Ok(Self::free_form(raw))
            }
            Some((key, values)) => {
                let key = key.trim();
                if key.is_empty() {
                    return Err(format!("tag spec '{}' has no key", raw));
                }
                let values: BTreeSet<String> = values
                    .split('|')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect();
                if values.is_empty() {
                    return Err(format!("tag '{}' declares an empty value list", key));
                }
                Ok(Self {
                    key: key.to_string(),
                    allowed_values: Some(values),
                })
            }
        }
    }
}

/// One row of the metric catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub name: String,
    pub aliases: BTreeSet<String>,
    pub tags: Vec<TagSpec>,
    pub description: String,
}

impl MetricEntry {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: BTreeSet::new(),
            tags: Vec::new(),
            description: description.into(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    pub fn with_tag(mut self, tag: TagSpec) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn tag(&self, key: &str) -> Option<&TagSpec> {
        self.tags.iter().find(|t| t.key == key)
    }

    /// 1-based tag slot used by the `tagK<n>`/`tagV<n>` columns
    pub fn tag_slot(&self, key: &str) -> Option<usize> {
        self.tags.iter().position(|t| t.key == key).map(|idx| idx + 1)
    }
}

/// A dictionary hit with its similarity score in `[0, 1]`
#[derive(Debug, Clone, Copy)]
pub struct MetricMatch<'a> {
    pub entry: &'a MetricEntry,
    pub score: f64,
}
