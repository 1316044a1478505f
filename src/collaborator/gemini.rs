//! Gemini `generateContent` backend.
//!
//! The capability is sent as the API key on every request. Structured calls
//! ask for `application/json` with a response schema and still go through
//! the defensive parser.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{
    parse, Classification, Collaborator, Compaction, ConversationContext, ConversePurpose,
};
use crate::error::CollaboratorError;
use crate::models::{Capability, ChatMessage, JournalEntry, Profile, Role};

const COMPANION_INSTRUCTION: &str = "You are a warm, long-term wellness companion. \
Be gentle and non-judgmental, and keep any advice practical and reliable.";

const DIAGNOSIS_INSTRUCTION: &str = "You are a careful constitution assessor using the nine \
standard constitution types. Ask one focused question per turn and give no diet, exercise or \
medication advice. Once you have enough information (usually 5-8 turns), state the result and \
append a fenced ```json block of the form {\"UPDATE_PROFILE\": {\"constitution\": \"<type>\"}}.";

const MEDITATION_INSTRUCTION: &str = "You are a patient meditation guide. Lead the user step by \
step with imagery, breathing and gentle questions.";

pub struct GeminiCollaborator {
    client: Client,
    base_url: String,
    model: String,
}

impl GeminiCollaborator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    async fn generate(
        &self,
        capability: &Capability,
        request: GenerateRequest,
    ) -> Result<String, CollaboratorError> {
        let response = self
            .client
            .post(self.generate_url())
            .header("x-goog-api-key", capability.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| CollaboratorError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, model = %self.model, "Collaborator request failed");

            if status.as_u16() == 429 {
                return Err(CollaboratorError::RateLimited);
            }
            return Err(CollaboratorError::RequestFailed(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Parse(e.to_string()))?;

        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(CollaboratorError::Parse("empty response".to_string()));
        }
        debug!(model = %self.model, chars = text.len(), "Collaborator responded");
        Ok(text)
    }
}

fn profile_context(profile: &Profile) -> String {
    format!(
        "[Profile] name: {}, age: {}, gender: {}, constitution: {}, history: {}, goals: {}",
        profile.name,
        profile.age,
        profile.gender,
        blank_or(&profile.constitution, "unknown"),
        profile.history,
        profile.goals
    )
}

fn blank_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

#[async_trait]
impl Collaborator for GeminiCollaborator {
    fn id(&self) -> &str {
        &self.model
    }

    async fn classify_and_extract(
        &self,
        capability: &Capability,
        text: &str,
        reference_date: NaiveDate,
        profile: &Profile,
    ) -> Result<Classification, CollaboratorError> {
        let prompt = format!(
            "Today: {reference_date}\nUser constitution: {constitution}\nUser input: \"{text}\"\n\n\
             1. Extract only explicit work, study or exercise tasks into `items`. If no duration \
             is stated use 0.5 hours; never return 0 or null. Eating, sleep, bodily sensations \
             and moods are not tasks.\n\
             2. `intended_date` is {reference_date} (YYYY-MM-DD) unless the user clearly refers \
             to another day.\n\
             3. If the described diet or behaviour clearly conflicts with the constitution, put \
             a short gentle warning in `risk_warning`, otherwise null.",
            constitution = blank_or(&profile.constitution, "unknown"),
        );
        let schema = json!({
            "type": "OBJECT",
            "properties": {
                "intended_date": { "type": "STRING" },
                "items": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "activity": { "type": "STRING" },
                            "hours": { "type": "NUMBER" }
                        },
                        "required": ["activity", "hours"]
                    }
                },
                "risk_warning": { "type": "STRING", "nullable": true }
            },
            "required": ["intended_date", "items"]
        });

        let raw = self
            .generate(capability, GenerateRequest::prompt(prompt).json_schema(schema))
            .await?;
        parse::classification(&raw)
    }

    async fn summarize_and_reclassify(
        &self,
        capability: &Capability,
        entries: &[JournalEntry],
        profile: &Profile,
    ) -> Result<Compaction, CollaboratorError> {
        let lines: Vec<String> = entries
            .iter()
            .map(|e| format!("{} {}", e.date, e.content))
            .collect();
        let prompt = format!(
            "{}\nArchive these journal entries into one short summary (`summary`). If they \
             clearly show the constitution has changed, give the new type in \
             `new_constitution`, otherwise null.\n\n{}",
            profile_context(profile),
            lines.join("\n")
        );
        let schema = json!({
            "type": "OBJECT",
            "properties": {
                "summary": { "type": "STRING" },
                "new_constitution": { "type": "STRING", "nullable": true }
            },
            "required": ["summary"]
        });

        let raw = self
            .generate(capability, GenerateRequest::prompt(prompt).json_schema(schema))
            .await?;
        parse::compaction(&raw)
    }

    async fn converse(
        &self,
        capability: &Capability,
        history: &[ChatMessage],
        context: &ConversationContext,
    ) -> Result<String, CollaboratorError> {
        let (instruction, temperature) = match context.purpose {
            ConversePurpose::Consultation | ConversePurpose::CycleReview => {
                (COMPANION_INSTRUCTION, None)
            }
            ConversePurpose::Diagnosis => (DIAGNOSIS_INSTRUCTION, Some(0.5)),
            ConversePurpose::Meditation => (MEDITATION_INSTRUCTION, Some(0.8)),
            ConversePurpose::MeditationSummary => (MEDITATION_INSTRUCTION, None),
        };

        let mut system = format!("{}\n{}", instruction, profile_context(&context.profile));
        if let Some(notes) = &context.notes {
            system.push('\n');
            system.push_str(notes);
        }

        let mut contents: Vec<Content> = history
            .iter()
            .map(|m| Content::text(m.role, &m.content))
            .collect();

        match context.purpose {
            ConversePurpose::MeditationSummary => {
                let transcript: Vec<String> = history
                    .iter()
                    .map(|m| format!("{:?}: {}", m.role, m.content))
                    .collect();
                contents = vec![Content::text(
                    Role::User,
                    &format!(
                        "Meditation transcript:\n{}\nSummarise the theme and outcome of this \
                         session in one sentence.",
                        transcript.join("\n")
                    ),
                )];
            }
            ConversePurpose::CycleReview if contents.is_empty() => {
                contents.push(Content::text(
                    Role::User,
                    "Write a short review (under 200 words) of this 10-day cycle: habit \
                     discipline, body trends, emotional energy, and one line of encouragement.",
                ));
            }
            _ => {}
        }

        let mut request = GenerateRequest {
            system_instruction: Some(Content::system(&system)),
            contents,
            generation_config: None,
        };
        if let Some(t) = temperature {
            request = request.temperature(t);
        }
        self.generate(capability, request).await
    }
}

/// `generateContent` request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl GenerateRequest {
    fn prompt(text: String) -> Self {
        Self {
            system_instruction: None,
            contents: vec![Content::text(Role::User, &text)],
            generation_config: None,
        }
    }

    fn json_schema(mut self, schema: serde_json::Value) -> Self {
        let config = self.generation_config.get_or_insert_with(Default::default);
        config.response_mime_type = Some("application/json".to_string());
        config.response_schema = Some(schema);
        self
    }

    fn temperature(mut self, temperature: f32) -> Self {
        self.generation_config
            .get_or_insert_with(Default::default)
            .temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: Role, text: &str) -> Self {
        let role = match role {
            Role::User => "user",
            Role::Assistant => "model",
        };
        Self {
            role: Some(role.to_string()),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }

    fn system(text: &str) -> Self {
        Self {
            role: None,
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}
