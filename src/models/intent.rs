use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::metric::MetricEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Zh,
    Unknown,
}

impl Language {
    /// `zh` as soon as one CJK ideograph appears, `en` for ASCII letters only
    pub fn detect(text: &str) -> Self {
        if text.chars().any(is_cjk) {
            Language::Zh
        } else if text.chars().any(|c| c.is_ascii_alphabetic()) {
            Language::En
        } else {
            Language::Unknown
        }
    }
}

pub fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{20000}'..='\u{2A6DF}')
}

/// Resolved meaning of one question.
///
/// Metric entries are borrowed from the dictionary; an intent never outlives
/// the dictionary it was resolved against.
#[derive(Debug, Clone)]
pub struct QueryIntent<'a> {
    pub raw_text: String,
    pub detected_language: Language,
    /// Primary metric first
    pub matched_metrics: Vec<&'a MetricEntry>,
    pub scores: Vec<f64>,
    pub matched_tags: BTreeMap<String, String>,
}

impl<'a> QueryIntent<'a> {
    pub fn primary_metric(&self) -> Option<&'a MetricEntry> {
        self.matched_metrics.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language() {
        assert_eq!(Language::detect("查询深圳的tick行情延时"), Language::Zh);
        assert_eq!(Language::detect("show tick latency"), Language::En);
        assert_eq!(Language::detect("12345 !?"), Language::Unknown);
    }
}
