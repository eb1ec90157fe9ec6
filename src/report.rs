//! Recovery of structured report content from a generative model's reply.
//!
//! The report worker asks the model for a strict JSON document but gets free
//! text in practice: markdown fences, prose around the object, raw control
//! characters inside string literals. Parsing is attempted in order of
//! strictness and always lands on a well-typed result; a parse failure never
//! propagates to the caller.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Structured report content recovered from the model response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportContent {
    #[serde(default = "default_summary")]
    pub summary: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub report_markdown: String,
}

fn default_summary() -> String {
    "Report generated".to_string()
}

impl Default for ReportContent {
    fn default() -> Self {
        Self {
            summary: default_summary(),
            key_findings: Vec::new(),
            recommendations: Vec::new(),
            report_markdown: String::new(),
        }
    }
}

/// Parse the model response: strict parse, then structural repair, then
/// regex field extraction, then defaults.
pub fn parse_model_response(response: &str) -> ReportContent {
    let text = strip_fences(response);

    match serde_json::from_str::<ReportContent>(text) {
        Ok(content) => return content,
        Err(e) => log::debug!("Strict report parse failed: {}", e),
    }

    let repaired = escape_control_chars_in_strings(text);
    match serde_json::from_str::<ReportContent>(&repaired) {
        Ok(content) => {
            log::debug!("Report parse succeeded after control-character repair");
            return content;
        }
        Err(e) => log::debug!("Repaired report parse failed: {}", e),
    }

    log::warn!("Falling back to regex field extraction for report response");
    extract_fields(text)
}

/// Strip markdown code fences and any prose around the JSON object.
fn strip_fences(response: &str) -> &str {
    let mut text = response.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped;
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }
    text = text.trim();

    if !text.starts_with('{') {
        if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
            if end > start {
                return &text[start..=end];
            }
        }
    }
    text
}

/// Escape raw control characters, but only inside string literals; the
/// structural whitespace between JSON elements must stay untouched.
fn escape_control_chars_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => {
                    escaped = false;
                    out.push(c);
                }
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }
    out
}

fn unescape(fragment: &str) -> String {
    fragment
        .replace("\\n", " ")
        .replace("\\\"", "\"")
        .trim()
        .to_string()
}

/// Last resort: scrape the known fields out of malformed JSON.
fn extract_fields(text: &str) -> ReportContent {
    let mut content = ReportContent::default();
    content.summary = String::new();

    let string_field = |name: &str| -> Option<String> {
        let re = Regex::new(&format!(
            r#"(?s)"{name}"\s*:\s*"((?:[^"\\]|\\.)*)""#
        ))
        .ok()?;
        re.captures(text)
            .map(|caps| unescape(caps.get(1).map_or("", |m| m.as_str())))
    };

    let list_field = |name: &str| -> Vec<String> {
        let Ok(array_re) = Regex::new(&format!(r#"(?s)"{name}"\s*:\s*\[(.*?)\]"#)) else {
            return Vec::new();
        };
        let Ok(item_re) = Regex::new(r#""((?:[^"\\]|\\.)*)""#) else {
            return Vec::new();
        };
        array_re
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|body| {
                item_re
                    .captures_iter(body.as_str())
                    .filter_map(|caps| caps.get(1))
                    .map(|m| unescape(m.as_str()))
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    };

    if let Some(summary) = string_field("summary") {
        content.summary = summary;
    }
    content.key_findings = list_field("key_findings");
    content.recommendations = list_field("recommendations");
    if let Some(markdown) = string_field("report_markdown") {
        content.report_markdown = markdown.replace("\\n", "\n").trim().to_string();
    }

    if content.summary.is_empty() {
        content.summary = default_summary();
    }

    log::warn!(
        "Extracted report fields manually - summary: {} chars, findings: {}, recommendations: {}",
        content.summary.len(),
        content.key_findings.len(),
        content.recommendations.len()
    );
    content
}
