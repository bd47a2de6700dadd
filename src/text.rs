use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

static WORD: LazyLock<Regex> = LazyLock::new(|| {
    // runs of letters and underscores; digits split a word
    Regex::new(r"[^\W\d]+").expect("word pattern is valid")
});

pub fn flatten(value: &Value) -> IndexMap<String, Value> {
    let mut flat = IndexMap::new();
    flatten_into(value, None, &mut flat);
    flat
}

fn flatten_into(value: &Value, prefix: Option<&str>, flat: &mut IndexMap<String, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let path = join_key(prefix, key);
                flatten_into(child, Some(&path), flat);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (index, child) in items.iter().enumerate() {
                let path = join_key(prefix, &index.to_string());
                flatten_into(child, Some(&path), flat);
            }
        }
        leaf => {
            flat.insert(prefix.unwrap_or_default().to_string(), leaf.clone());
        }
    }
}

fn join_key(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}_{key}"),
        None => key.to_string(),
    }
}

pub fn strip_accents(text: &str) -> String {
    text.nfd().filter(|ch| !is_combining_mark(*ch)).nfc().collect()
}

pub fn tokenize(text: &str, min_len: usize, max_len: usize) -> Vec<String> {
    let folded = strip_accents(&text.to_lowercase());
    WORD.find_iter(&folded)
        .map(|token| token.as_str())
        .filter(|token| !token.starts_with('_'))
        .filter(|token| {
            let len = token.chars().count();
            len >= min_len && len <= max_len
        })
        .map(str::to_string)
        .collect()
}

pub fn tokenize_text(text: &str) -> Vec<String> {
    tokenize(text, 1, usize::MAX)
}
