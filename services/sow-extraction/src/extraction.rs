//! Extraction via Completion
//!
//! Builds prompts from candidate content, calls the completion service and
//! turns its JSON output into typed records.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use sow_models::{Deliverable, Milestone, Provenance};
use sow_utils::{SowError, SowResult};
use std::sync::Arc;
use tracing::{debug, error, warn};
use validator::Validate;

use crate::completion_client::CompletionService;

/// Location of a content block, for provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSource {
    pub page: usize,
    pub block_index: usize,
}

pub struct MilestoneExtractor {
    completion: Arc<dyn CompletionService>,
    model: String,
    temperature: f32,
}

impl MilestoneExtractor {
    pub fn new(completion: Arc<dyn CompletionService>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            completion,
            model: model.into(),
            temperature,
        }
    }

    /// Extract milestones from one block (`source` set) or from the page-text
    /// pool (`source` unset).
    ///
    /// Unparseable output yields an empty list. Transport failures are
    /// returned so the caller decides whether to continue.
    pub async fn extract_milestones(
        &self,
        content: &str,
        source: Option<BlockSource>,
    ) -> SowResult<Vec<Milestone>> {
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .completion
            .complete(&milestone_prompt(content), &self.model, self.temperature)
            .await?;

        let raw: Vec<RawMilestone> = match parse_json_array(&response) {
            Ok(items) => items,
            Err(e) => {
                error!(error = %e, raw_response = %response, "Failed to parse milestone JSON");
                return Ok(Vec::new());
            }
        };

        let provenance = match source {
            Some(block) => Provenance::block(block.page, block.block_index),
            None => Provenance::text_pool(),
        };

        let milestones: Vec<Milestone> = raw
            .into_iter()
            .map(|item| item.into_milestone(provenance.clone()))
            .filter(|milestone| match milestone.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Dropping milestone without a name");
                    false
                }
            })
            .collect();

        debug!(count = milestones.len(), ?source, "Milestones extracted");
        Ok(milestones)
    }

    /// Extract deliverables from the concatenated deliverable text in one call.
    pub async fn extract_deliverables(&self, content: &str) -> SowResult<Vec<Deliverable>> {
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .completion
            .complete(&deliverable_prompt(content), &self.model, self.temperature)
            .await?;

        let raw: Vec<RawDeliverable> = match parse_json_array(&response) {
            Ok(items) => items,
            Err(e) => {
                error!(error = %e, raw_response = %response, "Failed to parse deliverables JSON");
                return Ok(Vec::new());
            }
        };

        Ok(raw
            .into_iter()
            .map(RawDeliverable::into_deliverable)
            .filter(|deliverable| match deliverable.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Dropping deliverable without a name");
                    false
                }
            })
            .collect())
    }
}

pub fn milestone_prompt(content: &str) -> String {
    format!(
        r#"Analyze the following content and extract ALL milestone information regardless of format. Return ONLY a valid JSON array.

Content:
{content}

Extract every milestone, phase, task, or deliverable item you find. For each item, create a JSON object:
{{
    "name": "milestone/phase/task name",
    "description": "description or title",
    "due_date": "any date found or null",
    "payment_amount": "any payment amount found or null"
}}

Instructions:
- Look for ANY format: tables, bullet points, numbered lists, headers
- Extract ALL items that represent work phases, milestones, or tasks
- Include payment amounts where available
- Use EXACT values from the content
- If information is missing, use null
- Return ONLY the JSON array, no other text
"#
    )
}

pub fn deliverable_prompt(content: &str) -> String {
    format!(
        r#"Analyze the following document content and extract ALL deliverable information in any format. Return ONLY a valid JSON array.

Document Content:
{content}

Find any deliverable, output, artifact, or work product mentioned. For each item, create a JSON object:
{{
    "name": "deliverable name",
    "description": "description found",
    "delivery_date": "any date found or null",
    "related_milestone": "related phase/milestone or null"
}}

Instructions:
- Look for ANY format: bullet points, numbered lists, tables, paragraphs
- Extract items that represent deliverables, outputs, artifacts, reports, systems
- Find associated dates and related milestones
- Use EXACT values from the content
- If information is missing, use null
- Return ONLY the JSON array, no other text
"#
    )
}

/// Remove one surrounding ``` or ```json fence, if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let body = rest.split("```").next().unwrap_or(rest);
        let body = body.strip_prefix("json").unwrap_or(body);
        return body.trim();
    }
    trimmed
}

/// Parse completion output strictly as a JSON array of objects.
pub fn parse_json_array<T: DeserializeOwned>(response: &str) -> SowResult<Vec<T>> {
    serde_json::from_str(strip_code_fence(response))
        .map_err(|e| SowError::completion_parse(e.to_string(), response))
}

#[derive(Debug, Deserialize)]
struct RawMilestone {
    #[serde(default, deserialize_with = "lenient_string")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    due_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    payment_amount: Option<String>,
}

impl RawMilestone {
    fn into_milestone(self, provenance: Provenance) -> Milestone {
        Milestone {
            name: self.name.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            due_date: self.due_date,
            payment_amount: self.payment_amount,
            provenance,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDeliverable {
    #[serde(default, deserialize_with = "lenient_string")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    delivery_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    related_milestone: Option<String>,
}

impl RawDeliverable {
    fn into_deliverable(self) -> Deliverable {
        Deliverable {
            name: self.name.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            delivery_date: self.delivery_date,
            related_milestone: self.related_milestone,
        }
    }
}

/// Models sometimes emit amounts as bare numbers; keep them as text.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
