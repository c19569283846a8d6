//! Parsing of JSON-formatted model replies.
//!
//! Models asked for `{"zh": ..., "POJ": ...}` do not always comply. The
//! parser tries a strict decode, then a decode of a repaired copy, then plain
//! regex extraction, and reports which of the three produced the value.

use crate::error::{PipelineError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Fields extracted from a structured reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyFields {
    /// Display and synthesis text.
    pub text: String,
    /// Romanized transcription, empty when absent.
    pub romanization: String,
}

/// Which parsing stage produced the fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Strict,
    Repaired,
    RegexFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub value: ReplyFields,
    pub provenance: Provenance,
}

const TEXT_KEYS: [&str; 2] = ["zh", "text"];
const ROMANIZATION_KEYS: [&str; 2] = ["POJ", "romanization"];

pub struct ReplyParser {
    code_fence: Regex,
    quoted_key: Regex,
    quoted_value: Regex,
    trailing_comma: Regex,
    text_field: Regex,
    romanization_field: Regex,
}

impl ReplyParser {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| PipelineError::Other(format!("Invalid reply pattern: {e}")))
        };
        Ok(Self {
            code_fence: compile(r"(?s)^```(?:json)?\s*|\s*```$")?,
            quoted_key: compile(r"'([A-Za-z_]+)'\s*:\s*")?,
            quoted_value: compile(r":\s*'([^']*)'")?,
            trailing_comma: compile(r",\s*([}\]])")?,
            text_field: compile(r#""(?:zh|text)"\s*:\s*"([^"]+)""#)?,
            romanization_field: compile(r#""(?:POJ|romanization)"\s*:\s*"([^"]+)""#)?,
        })
    }

    pub fn parse(&self, raw: &str) -> ParsedReply {
        if let Some(value) = decode_strict(raw) {
            return ParsedReply {
                value,
                provenance: Provenance::Strict,
            };
        }
        if let Some(value) = decode_strict(&self.repair(raw)) {
            return ParsedReply {
                value,
                provenance: Provenance::Repaired,
            };
        }
        ParsedReply {
            value: self.extract(raw),
            provenance: Provenance::RegexFallback,
        }
    }

    /// Undo the usual near-JSON mistakes: fences, full-width punctuation,
    /// single quotes and trailing commas.
    fn repair(&self, raw: &str) -> String {
        let cleaned = self.code_fence.replace_all(raw.trim(), "");
        let cleaned = cleaned
            .replace(['\u{201c}', '\u{201d}'], "\"")
            .replace('\u{ff1a}', ":");
        let cleaned = self.quoted_key.replace_all(&cleaned, "\"$1\": ");
        let cleaned = self.quoted_value.replace_all(&cleaned, ": \"$1\"");
        self.trailing_comma.replace_all(&cleaned, "$1").into_owned()
    }

    fn extract(&self, raw: &str) -> ReplyFields {
        let capture = |re: &Regex| {
            re.captures(raw)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        };
        ReplyFields {
            text: capture(&self.text_field),
            romanization: capture(&self.romanization_field),
        }
    }
}

fn decode_strict(raw: &str) -> Option<ReplyFields> {
    let value: serde_json::Value = serde_json::from_str(raw.trim()).ok()?;
    let object = value.as_object()?;
    let field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| object.get(*k))
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default()
    };
    Some(ReplyFields {
        text: field(&TEXT_KEYS),
        romanization: field(&ROMANIZATION_KEYS),
    })
}

/// Parse a reply with a freshly built parser.
pub fn parse_reply(raw: &str) -> Result<ParsedReply> {
    Ok(ReplyParser::new()?.parse(raw))
}
