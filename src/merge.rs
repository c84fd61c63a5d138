//! Structural merge of task parameters.
//!
//! Mappings merge key by key. Conflicting string leaves are treated as
//! command-line fragments ("flag blobs") and merged flag by flag; any other
//! conflict takes the override value.

use serde_yaml::{Mapping, Value};

use crate::error::TaxrefError;

/// Ordered `flag -> value` list parsed from a shell-quoted string.
/// Flags without a value map to the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagBlob {
    entries: Vec<(String, String)>,
}

impl FlagBlob {
    /// Tokenizes `text` with shell quoting rules. `None` on unbalanced quotes.
    /// `#` is literal text, never a comment.
    pub fn parse(text: &str) -> Option<Self> {
        shlex::split(&escape_hashes(text)).map(|tokens| Self::from_tokens(&tokens))
    }

    /// Folds tokens into flags. A token starting with `-` takes the next token
    /// as its value unless that one also starts with `-` and has no embedded
    /// space. Stray tokens become value-less entries.
    pub fn from_tokens(tokens: &[String]) -> Self {
        let mut blob = Self::default();
        let mut iter = tokens.iter().peekable();
        while let Some(token) = iter.next() {
            if !token.starts_with('-') {
                blob.insert(token, "");
                continue;
            }
            let takes_value = iter.peek().is_some_and(|next| {
                !next.is_empty() && (!next.starts_with('-') || next.contains(' '))
            });
            if takes_value {
                let value = iter.next().map(String::as_str).unwrap_or_default();
                blob.insert(token, value);
            } else {
                blob.insert(token, "");
            }
        }
        blob
    }

    /// Sets `flag`, keeping its position if it is already present.
    pub fn insert(&mut self, flag: &str, value: &str) {
        match self.entries.iter_mut().find(|(existing, _)| existing.as_str() == flag) {
            Some((_, slot)) => *slot = value.to_string(),
            None => self.entries.push((flag.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, flag: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.as_str() == flag)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overlays `other`: its values win, new flags are appended in its order.
    pub fn merge(&mut self, other: &FlagBlob) {
        for (flag, value) in &other.entries {
            self.insert(flag, value);
        }
    }

    pub fn tokens(&self) -> Vec<&str> {
        let mut tokens = Vec::with_capacity(self.entries.len() * 2);
        for (flag, value) in &self.entries {
            tokens.push(flag.as_str());
            if !value.is_empty() {
                tokens.push(value.as_str());
            }
        }
        tokens
    }

    pub fn to_shell_string(&self) -> Result<String, shlex::QuoteError> {
        shlex::try_join(self.tokens())
    }
}

/// Backslash-escapes every unquoted `#` so the tokenizer does not start a
/// comment there. Quoted text and existing escapes are copied unchanged.
fn escape_hashes(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    let mut chars = text.chars();
    let mut quote = None;
    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (None, '#') => escaped.push_str("\\#"),
            (None, '\'' | '"') => {
                quote = Some(ch);
                escaped.push(ch);
            }
            (None | Some('"'), '\\') => {
                escaped.push(ch);
                if let Some(next) = chars.next() {
                    escaped.push(next);
                }
            }
            (Some(open), _) if open == ch => {
                quote = None;
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Merges `overrides` onto a copy of `base`.
///
/// An empty or null override returns `base` unchanged; `overrides` is never
/// modified.
pub fn merge(base: &Value, overrides: &Value) -> Result<Value, TaxrefError> {
    if overrides.is_null() {
        return Ok(base.clone());
    }
    merge_value("", base, overrides)
}

pub fn merge_mappings(base: &Mapping, overrides: &Mapping) -> Result<Mapping, TaxrefError> {
    merge_mapping_at("", base, overrides)
}

fn merge_mapping_at(
    path: &str,
    base: &Mapping,
    overrides: &Mapping,
) -> Result<Mapping, TaxrefError> {
    let mut merged = base.clone();
    for (key, value) in overrides {
        let key_path = join_key(path, key);
        let next = match merged.get(key) {
            Some(existing) => merge_value(&key_path, existing, value)?,
            None => value.clone(),
        };
        merged.insert(key.clone(), next);
    }
    Ok(merged)
}

fn merge_value(path: &str, base: &Value, overrides: &Value) -> Result<Value, TaxrefError> {
    match (base, overrides) {
        (Value::Mapping(base), Value::Mapping(overrides)) => {
            Ok(Value::Mapping(merge_mapping_at(path, base, overrides)?))
        }
        (Value::String(base), Value::String(overrides)) => {
            Ok(Value::String(merge_flag_strings(path, base, overrides)?))
        }
        _ => Ok(overrides.clone()),
    }
}

/// Merges two flag-blob strings; `key` names the parameter in errors.
pub fn merge_flag_strings(key: &str, base: &str, overrides: &str) -> Result<String, TaxrefError> {
    let malformed = |reason: &str| TaxrefError::MalformedParameterString {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    let mut merged = FlagBlob::parse(base)
        .ok_or_else(|| malformed("unbalanced quoting in default value"))?;
    let overrides = FlagBlob::parse(overrides)
        .ok_or_else(|| malformed("unbalanced quoting in override value"))?;
    merged.merge(&overrides);
    merged
        .to_shell_string()
        .map_err(|err| malformed(&err.to_string()))
}

fn join_key(path: &str, key: &Value) -> String {
    let key = match key {
        Value::String(value) => value.clone(),
        Value::Number(value) => value.to_string(),
        Value::Bool(value) => value.to_string(),
        _ => "?".to_string(),
    };
    if path.is_empty() {
        key
    } else {
        format!("{path}.{key}")
    }
}
