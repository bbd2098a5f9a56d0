//! TargetProcess Client
//!
//! Forwards extracted milestones to TargetProcess as KeyMilestones.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use sow_models::{Milestone, SyncStatus};
use sow_utils::{SowError, SowResult, TargetProcessConfig};
use std::time::Duration;
use tracing::{error, info, warn};

/// Destination for extracted milestones.
#[async_trait]
pub trait MilestoneSink: Send + Sync {
    fn is_configured(&self) -> bool {
        true
    }

    /// Returns the tracker's acknowledgement, if it sent one.
    async fn send_milestone(&self, milestone: &Milestone) -> SowResult<Option<serde_json::Value>>;

    /// Send each milestone in turn. Failures are counted, not returned.
    async fn send_milestones_batch(&self, milestones: &[Milestone]) -> SyncStatus {
        if !self.is_configured() {
            info!("Skipping milestone batch sync - tracker not configured");
            return SyncStatus {
                skipped: true,
                ..SyncStatus::default()
            };
        }

        let mut status = SyncStatus {
            attempted: milestones.len(),
            ..SyncStatus::default()
        };
        for milestone in milestones {
            match self.send_milestone(milestone).await {
                Ok(_) => status.succeeded += 1,
                Err(e) => {
                    error!(milestone = %milestone.name, error = %e, "Failed to send milestone");
                    status.failed += 1;
                }
            }
        }

        info!(succeeded = status.succeeded, attempted = status.attempted, "Milestone sync finished");
        status
    }
}

/// KeyMilestone payload in TargetProcess's field names.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct KeyMilestonePayload<'a> {
    name: &'a str,
    description: &'a str,
    date: Option<&'a str>,
    payment: Option<&'a str>,
    #[serde(rename = "SOW")]
    sow: bool,
}

impl<'a> From<&'a Milestone> for KeyMilestonePayload<'a> {
    fn from(milestone: &'a Milestone) -> Self {
        Self {
            name: &milestone.name,
            description: &milestone.description,
            date: milestone.due_date.as_deref(),
            payment: milestone.payment_amount.as_deref(),
            sow: true,
        }
    }
}

pub struct TargetProcessClient {
    client: Client,
    credentials: Option<(String, String)>,
}

impl TargetProcessClient {
    pub fn new(config: &TargetProcessConfig) -> SowResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SowError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        let credentials = match (&config.domain, &config.access_token) {
            (Some(domain), Some(token)) if config.is_configured() => {
                Some((domain.trim_end_matches('/').to_string(), token.clone()))
            }
            _ => {
                warn!("TargetProcess credentials not configured. Milestone sync will be skipped.");
                None
            }
        };

        Ok(Self { client, credentials })
    }

    fn api_url(domain: &str) -> String {
        format!("{}/api/v1/KeyMilestones", domain)
    }
}

#[async_trait]
impl MilestoneSink for TargetProcessClient {
    fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    async fn send_milestone(&self, milestone: &Milestone) -> SowResult<Option<serde_json::Value>> {
        let Some((domain, token)) = &self.credentials else {
            info!("Skipping milestone sync - TargetProcess not configured");
            return Ok(None);
        };

        let response = self
            .client
            .post(Self::api_url(domain))
            .query(&[("access_token", token)])
            .json(&KeyMilestonePayload::from(milestone))
            .send()
            .await
            .map_err(|e| SowError::sync(format!("Request error sending milestone: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SowError::sync(format!("TargetProcess returned {}: {}", status.as_u16(), body)));
        }

        let ack: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SowError::sync(format!("Invalid TargetProcess response: {}", e)))?;

        info!(milestone = %milestone.name, id = %ack["Id"], "Sent milestone to TargetProcess");
        Ok(Some(ack))
    }
}
