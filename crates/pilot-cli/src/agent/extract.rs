//! Pull one JSON object out of free-form model output
//!
//! Models wrap their answer in prose, code fences, or both. The scanner
//! starts at the first `{`, tracks nesting depth, and skips over string
//! literals (escape-aware) so braces inside values don't end the object early.

use serde_json::{Map, Value};

/// Why no object could be extracted
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("empty response")]
    Empty,
    #[error("no JSON object found")]
    NoObject,
    #[error("unbalanced JSON object")]
    Unbalanced,
    #[error("invalid JSON object: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Extract and strictly decode the first balanced object in `text`.
///
/// First match wins: if the region starting at the first `{` is balanced but
/// not valid JSON, later candidates are not tried.
pub fn extract(text: &str) -> Result<Map<String, Value>, ExtractionError> {
    if text.trim().is_empty() {
        return Err(ExtractionError::Empty);
    }

    let start = text.find('{').ok_or(ExtractionError::NoObject)?;
    let end = balanced_end(&text[start..]).ok_or(ExtractionError::Unbalanced)?;

    Ok(serde_json::from_str(&text[start..start + end])?)
}

/// Byte length of the balanced object at the start of `s`, if it closes
fn balanced_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}
