//! Defensive parsing of collaborator output.
//!
//! Models are asked for JSON but may wrap it in prose or a fenced block.
//! Parsing accepts bare JSON, a ```json fence, or the outermost `{...}` span;
//! anything else is a [`CollaboratorError::Parse`], never a panic.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{Classification, Compaction, ExtractedTask};
use crate::error::CollaboratorError;

/// Wire shape of a classification response.
#[derive(Debug, Deserialize)]
struct ClassificationWire {
    #[serde(default)]
    intended_date: Option<String>,
    #[serde(default)]
    items: Vec<TaskWire>,
    #[serde(default)]
    risk_warning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskWire {
    activity: String,
    #[serde(default)]
    hours: Option<f64>,
}

/// Wire shape of a compaction response.
#[derive(Debug, Deserialize)]
struct CompactionWire {
    summary: String,
    #[serde(default)]
    new_constitution: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectiveWire {
    #[serde(rename = "UPDATE_PROFILE")]
    update_profile: Option<ProfilePatch>,
}

#[derive(Debug, Deserialize)]
struct ProfilePatch {
    constitution: Option<String>,
}

/// Deserialize a JSON payload out of free model text.
pub fn json_payload<T: DeserializeOwned>(text: &str) -> Result<T, CollaboratorError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    if let Some((_, body)) = fenced_json(trimmed) {
        if let Ok(value) = serde_json::from_str(body) {
            return Ok(value);
        }
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return serde_json::from_str(&trimmed[start..=end])
                .map_err(|e| CollaboratorError::Parse(e.to_string()));
        }
    }
    Err(CollaboratorError::Parse("no JSON object in response".to_string()))
}

pub fn classification(text: &str) -> Result<Classification, CollaboratorError> {
    let wire: ClassificationWire = json_payload(text)?;
    Ok(Classification {
        inferred_date: wire.intended_date.as_deref().and_then(parse_date),
        tasks: wire
            .items
            .into_iter()
            .filter(|item| !item.activity.trim().is_empty())
            .map(|item| ExtractedTask {
                label: item.activity.trim().to_string(),
                hours: item.hours,
            })
            .collect(),
        risk_note: non_blank(wire.risk_warning),
    })
}

pub fn compaction(text: &str) -> Result<Compaction, CollaboratorError> {
    let wire: CompactionWire = json_payload(text)?;
    let summary = wire.summary.trim().to_string();
    if summary.is_empty() {
        return Err(CollaboratorError::Parse("empty summary".to_string()));
    }
    Ok(Compaction {
        summary,
        revised_classification: non_blank(wire.new_constitution),
    })
}

/// Split a diagnosis reply into display text and an optional constitution
/// update carried as `{"UPDATE_PROFILE": {"constitution": ...}}`.
///
/// A malformed directive is ignored and the reply is shown unchanged.
pub fn profile_directive(reply: &str) -> (String, Option<String>) {
    let Some((span, body)) = fenced_json(reply) else {
        return (reply.to_string(), None);
    };
    let constitution = serde_json::from_str::<DirectiveWire>(body)
        .ok()
        .and_then(|d| d.update_profile)
        .and_then(|p| non_blank(p.constitution));

    match constitution {
        Some(c) => {
            let mut display = String::with_capacity(reply.len());
            display.push_str(&reply[..span.0]);
            display.push_str(&reply[span.1..]);
            (display.trim().to_string(), Some(c))
        }
        None => (reply.to_string(), None),
    }
}

/// Locate a ```json fenced block. Returns the byte span of the whole fence
/// and the JSON body inside it.
fn fenced_json(text: &str) -> Option<((usize, usize), &str)> {
    let open = text.find("```json")?;
    let body_start = open + "```json".len();
    let close_rel = text[body_start..].find("```")?;
    let body_end = body_start + close_rel;
    let fence_end = body_end + "```".len();
    Some(((open, fence_end), text[body_start..body_end].trim()))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    ["%Y-%m-%d", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "null")
}
