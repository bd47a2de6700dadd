use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;
use crate::text::tokenize;

pub const KEYWORD_MIN_LEN: usize = 2;
pub const KEYWORD_MAX_LEN: usize = 20;

pub const EMPLOYMENT_TYPES: [&str; 3] = ["Vollzeit", "Teilzeit", "Praktikum"];

pub const DEFAULT_DAY_HOUR_PATTERN: &str = r"vor (\d+) (Stunden|Stunde|Tagen|Tage|Tag)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionKind {
    EmploymentType,
    PostedNPeriodsAgo,
    Other,
}

impl ExtensionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionKind::EmploymentType => "employment_type",
            ExtensionKind::PostedNPeriodsAgo => "posted_n_periods_ago",
            ExtensionKind::Other => "other",
        }
    }
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn extract_keywords<S: AsRef<str>>(keywords: &[S], text: &str) -> Vec<String> {
    let tokens = tokenize(text, KEYWORD_MIN_LEN, KEYWORD_MAX_LEN);
    keywords
        .iter()
        .filter_map(|keyword| {
            let keyword: &str = keyword.as_ref();
            let needle = keyword.to_lowercase();
            tokens
                .iter()
                .any(|token| *token == needle)
                .then(|| keyword.to_string())
        })
        .collect()
}

pub fn identify_extension_type(value: &str, pattern: &Regex) -> ExtensionKind {
    if EMPLOYMENT_TYPES.contains(&value) {
        ExtensionKind::EmploymentType
    } else if pattern.is_match(value) {
        ExtensionKind::PostedNPeriodsAgo
    } else {
        ExtensionKind::Other
    }
}

pub fn classify_extension_value(
    value: &Value,
    pattern: &Regex,
) -> Result<ExtensionKind, PipelineError> {
    let text = value.as_str().ok_or_else(|| PipelineError::UnexpectedType {
        field: format!("extension {value}"),
        expected: "a string",
    })?;
    Ok(identify_extension_type(text, pattern))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodUnit {
    #[serde(rename = "Stunde")]
    Hour,
    #[serde(rename = "Tage")]
    Day,
}

impl PeriodUnit {
    pub fn from_word(word: &str) -> Option<Self> {
        match word {
            "Stunden" | "Stunde" => Some(PeriodUnit::Hour),
            "Tagen" | "Tage" | "Tag" => Some(PeriodUnit::Day),
            _ => None,
        }
    }

    pub fn canonical(&self) -> &'static str {
        match self {
            PeriodUnit::Hour => "Stunde",
            PeriodUnit::Day => "Tage",
        }
    }

    pub fn hours(&self) -> i64 {
        match self {
            PeriodUnit::Hour => 1,
            PeriodUnit::Day => 24,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingAge {
    pub number: i64,
    pub unit: PeriodUnit,
}

impl PostingAge {
    pub fn parse(text: &str, pattern: &Regex) -> Option<Self> {
        let captures = pattern.captures(text)?;
        let number = captures.get(1)?.as_str().parse::<i64>().ok()?;
        let unit = PeriodUnit::from_word(captures.get(2)?.as_str())?;
        Some(Self { number, unit })
    }

    pub fn in_hours(&self) -> Option<i64> {
        self.number.checked_mul(self.unit.hours())
    }
}
