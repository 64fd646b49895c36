//! Layered decoding of free-form model output.
//!
//! Models are asked for JSON but routinely wrap it in prose, emit several
//! objects back to back, or drop the braces altogether. Decoding tries, in
//! order: the whole response as JSON, every balanced JSON block found in the
//! response, then a labeled-field pattern (`Problem: ... Severity: ... Impact: ...`).

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use ai_client::util::strip_code_blocks;

static LABELED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)\bproblem[*"]*\s*:\s*(?P<problem>.*?)\s*[*"]*\bseverity[*"]*\s*:\s*(?P<severity>.*?)\s*[*"]*\bimpact[*"]*\s*:\s*(?P<impact>[^\n]*)"#,
    )
    .unwrap()
});

const DESCRIPTION_KEYS: &[&str] = &["problem", "description", "problem_description"];
const VALUE_TRIM: &[char] = &['"', '\'', ',', '*', '{', '}', ' ', '\t'];

/// A problem as the model reported it, before standardization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedProblem {
    pub description: String,
    pub severity: String,
    pub impact: String,
}

/// Which decoding layer produced the result. Callers log the strategy;
/// `Unparsed` is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Structured(Vec<ExtractedProblem>),
    Labeled(Vec<ExtractedProblem>),
    Unparsed,
}

impl ParseOutcome {
    pub fn strategy(&self) -> &'static str {
        match self {
            ParseOutcome::Structured(_) => "structured",
            ParseOutcome::Labeled(_) => "labeled",
            ParseOutcome::Unparsed => "unparsed",
        }
    }

    pub fn into_problems(self) -> Vec<ExtractedProblem> {
        match self {
            ParseOutcome::Structured(problems) | ParseOutcome::Labeled(problems) => problems,
            ParseOutcome::Unparsed => Vec::new(),
        }
    }
}

pub fn parse_model_output(raw: &str) -> ParseOutcome {
    let text = strip_code_blocks(raw);

    let mut problems = Vec::new();
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if collect_problems(&value, &mut problems) {
            return ParseOutcome::Structured(problems);
        }
    }

    let mut shaped = false;
    for value in json_blocks(text) {
        shaped |= collect_problems(&value, &mut problems);
    }
    if shaped {
        return ParseOutcome::Structured(problems);
    }

    let labeled = labeled_problems(text);
    if !labeled.is_empty() {
        return ParseOutcome::Labeled(labeled);
    }

    ParseOutcome::Unparsed
}

/// Push every problem-shaped object in `value`. Returns whether `value` had
/// the shape of a problem list, so an explicit empty list counts as decoded.
fn collect_problems(value: &Value, out: &mut Vec<ExtractedProblem>) -> bool {
    match value {
        Value::Array(items) => {
            let mut shaped = items.is_empty();
            for item in items {
                shaped |= collect_problems(item, out);
            }
            shaped
        }
        Value::Object(map) => {
            if let Some(nested @ Value::Array(_)) = field(map, &["problems"]) {
                return collect_problems(nested, out);
            }
            match problem_from_object(map) {
                Some(problem) => {
                    out.push(problem);
                    true
                }
                None => false,
            }
        }
        _ => false,
    }
}

fn problem_from_object(map: &Map<String, Value>) -> Option<ExtractedProblem> {
    let description = field(map, DESCRIPTION_KEYS)
        .and_then(scalar_text)
        .filter(|d| !d.is_empty())?;
    Some(ExtractedProblem {
        description,
        severity: field(map, &["severity"]).and_then(scalar_text).unwrap_or_default(),
        impact: field(map, &["impact"]).and_then(scalar_text).unwrap_or_default(),
    })
}

fn field<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| {
        map.iter()
            .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Every top-level balanced `{...}` or `[...]` block that decodes as JSON.
fn json_blocks(text: &str) -> Vec<Value> {
    let bytes = text.as_bytes();
    let mut values = Vec::new();
    let mut start = 0;
    while start < bytes.len() {
        if matches!(bytes[start], b'{' | b'[') {
            if let Some(end) = matching_close(bytes, start) {
                if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
                    values.push(value);
                    start = end + 1;
                    continue;
                }
            }
        }
        start += 1;
    }
    values
}

fn matching_close(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn labeled_problems(text: &str) -> Vec<ExtractedProblem> {
    LABELED_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let description = clean_value(&caps["problem"]);
            if description.is_empty() {
                return None;
            }
            Some(ExtractedProblem {
                description,
                severity: clean_value(&caps["severity"]),
                impact: clean_value(&caps["impact"]),
            })
        })
        .collect()
}

fn clean_value(raw: &str) -> String {
    raw.trim().trim_matches(VALUE_TRIM).trim().to_string()
}
