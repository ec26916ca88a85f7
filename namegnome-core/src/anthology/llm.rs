//! LLM grouping assist.
//!
//! Invoked only when the deterministic pass leaves unresolved flags or weak
//! confidence. The model sees the parsed segments, the deterministic groups
//! and the canonical episode list, and proposes groupings. Its output must
//! conform to [`GROUPS_SCHEMA`]; anything else is rejected and the caller
//! keeps the deterministic result. The model is never authoritative about
//! metadata: titles are always replaced with canonical ones.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use namegnome_config::LlmConfig;
use namegnome_model::{EpisodeRecord, Segment};

use crate::anthology::ResolvedGroup;
use crate::error::{CoreError, Result};

/// JSON schema the assist reply must satisfy.
pub const GROUPS_SCHEMA: &str = r#"
{
  "type": "object",
  "required": ["groups"],
  "additionalProperties": false,
  "properties": {
    "groups": {
      "type": "array",
      "minItems": 1,
      "items": {
        "type": "object",
        "required": ["season", "episodes", "titles", "confidence"],
        "additionalProperties": false,
        "properties": {
          "season": { "type": "integer", "minimum": 0 },
          "episodes": {
            "type": "array",
            "minItems": 1,
            "items": { "type": "integer", "minimum": 0 }
          },
          "titles": {
            "type": "array",
            "items": { "type": "string" }
          },
          "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
        }
      }
    }
  }
}
"#;

static GROUPS_VALIDATOR: LazyLock<jsonschema::Validator> = LazyLock::new(|| {
    let schema: serde_json::Value =
        serde_json::from_str(GROUPS_SCHEMA).expect("embedded schema is valid JSON");
    jsonschema::validator_for(&schema).expect("embedded schema compiles")
});

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("llm call timed out")]
    Timeout,

    #[error("llm response malformed: {0}")]
    Malformed(String),
}

/// Grouping model seam: one completion call, plain text in and out.
#[async_trait]
pub trait GroupingModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> std::result::Result<String, LlmError>;
}

/// Ollama-style HTTP backend (`POST /api/generate`, non-streaming, JSON
/// format requested).
pub struct OllamaModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl std::fmt::Debug for OllamaModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaModel")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaModel {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl GroupingModel for OllamaModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> std::result::Result<String, LlmError> {
        let request = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "format": "json",
            }))
            .send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| LlmError::Timeout)??;
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|err| LlmError::Malformed(err.to_string()))?;
        Ok(body.response)
    }
}

#[derive(Debug, Deserialize)]
struct GroupsPayload {
    groups: Vec<GroupPayload>,
}

#[derive(Debug, Deserialize)]
struct GroupPayload {
    season: u32,
    episodes: Vec<u32>,
    #[allow(dead_code)]
    titles: Vec<String>,
    confidence: f64,
}

fn build_prompt(
    segments: &[Segment],
    deterministic: &[ResolvedGroup],
    season: u32,
    canonical: &[EpisodeRecord],
) -> String {
    let canonical_lines: Vec<String> = canonical
        .iter()
        .filter(|e| e.season == season)
        .map(|e| format!("  S{:02}E{:02}: {}", e.season, e.episode, e.title))
        .collect();
    let segment_lines: Vec<String> = segments
        .iter()
        .map(|s| format!("  [{}-{}] \"{}\"", s.start, s.end, s.title_tokens.join(" ")))
        .collect();
    let deterministic_lines: Vec<String> = deterministic
        .iter()
        .map(|g| {
            format!(
                "  episodes {:?} confidence {:.2} warnings {:?}",
                g.episodes,
                g.confidence,
                g.warnings.iter().map(|w| w.as_str()).collect::<Vec<_>>()
            )
        })
        .collect();

    format!(
        "You map segments of a TV filename onto canonical episodes.\n\
         Canonical episode list (authoritative, do not invent entries):\n{}\n\
         Filename segments (declared interval and title words):\n{}\n\
         Best deterministic grouping so far:\n{}\n\
         Reply with JSON only, shaped exactly as:\n\
         {{\"groups\":[{{\"season\":{season},\"episodes\":[1,2],\"titles\":[\"...\"],\"confidence\":0.9}}]}}\n\
         Episodes within a group must be consecutive numbers from the list above.",
        canonical_lines.join("\n"),
        segment_lines.join("\n"),
        deterministic_lines.join("\n"),
    )
}

fn is_contiguous(episodes: &[u32]) -> bool {
    episodes.windows(2).all(|pair| pair[1] == pair[0] + 1)
}

/// Validate and convert a model reply. Titles come from the canonical list,
/// never from the model.
pub fn parse_assist_reply(
    raw: &str,
    season: u32,
    canonical: &[EpisodeRecord],
) -> Result<Vec<ResolvedGroup>> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|err| CoreError::SchemaViolation(format!("assist reply is not JSON: {err}")))?;
    GROUPS_VALIDATOR
        .validate(&value)
        .map_err(|err| CoreError::SchemaViolation(format!("assist reply rejected: {err}")))?;
    let payload: GroupsPayload = serde_json::from_value(value)?;

    let mut groups = Vec::new();
    for group in payload.groups {
        if group.season != season {
            return Err(CoreError::SchemaViolation(format!(
                "assist reply names season {}, expected {season}",
                group.season
            )));
        }
        let mut episodes: Vec<u32> = group
            .episodes
            .into_iter()
            .filter(|n| canonical.iter().any(|e| e.season == season && e.episode == *n))
            .collect();
        episodes.sort_unstable();
        episodes.dedup();
        if episodes.is_empty() || !is_contiguous(&episodes) {
            return Err(CoreError::SchemaViolation(
                "assist reply grouped unknown or non-contiguous episodes".to_string(),
            ));
        }
        let titles = episodes
            .iter()
            .filter_map(|n| {
                canonical
                    .iter()
                    .find(|e| e.season == season && e.episode == *n)
                    .map(|e| e.title.clone())
            })
            .collect();
        groups.push(ResolvedGroup {
            season,
            episodes,
            titles,
            confidence: group.confidence.clamp(0.0, 1.0),
            warnings: Vec::new(),
        });
    }
    Ok(groups)
}

/// Run the assist end to end. Transport failures and schema violations both
/// surface as errors; the caller degrades to the deterministic result.
pub async fn assist(
    model: &dyn GroupingModel,
    segments: &[Segment],
    deterministic: &[ResolvedGroup],
    season: u32,
    canonical: &[EpisodeRecord],
) -> Result<Vec<ResolvedGroup>> {
    let prompt = build_prompt(segments, deterministic, season, canonical);
    debug!(model = model.name(), "requesting grouping assist");
    let raw = model.complete(&prompt).await.map_err(|err| {
        warn!(error = %err, "grouping assist unavailable");
        CoreError::SchemaViolation(err.to_string())
    })?;
    parse_assist_reply(&raw, season, canonical)
}
