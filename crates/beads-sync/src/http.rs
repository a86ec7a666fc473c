//! HTTP implementation of the backend seams

use crate::backend::{MutationBackend, SnapshotSource};
use crate::config::SyncConfig;
use crate::error::SyncError;
use async_trait::async_trait;
use beads_graph::{NodeId, NodePatch, Snapshot, Status};
use serde_json::json;

/// Beads HTTP API client
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    config: SyncConfig,
}

impl HttpBackend {
    /// Create client for the configured backend
    #[must_use]
    pub fn new(config: SyncConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Create with a preconfigured client
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: SyncConfig) -> Self {
        Self { client, config }
    }

    async fn send(&self, id: &NodeId, request: reqwest::RequestBuilder) -> Result<(), SyncError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        let reason = if body.trim().is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            format!("HTTP {}: {}", status.as_u16(), body.trim())
        };
        Err(SyncError::Rejected {
            id: id.to_string(),
            reason,
        })
    }
}

#[async_trait]
impl SnapshotSource for HttpBackend {
    async fn fetch(&self) -> Result<Snapshot, SyncError> {
        let url = self.config.snapshot_url();
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Fetch(format!("{url}: HTTP {}", status.as_u16())));
        }
        let body = response.text().await?;
        Ok(Snapshot::from_json(&body)?)
    }
}

#[async_trait]
impl MutationBackend for HttpBackend {
    async fn update_status(&self, id: &NodeId, status: &Status) -> Result<(), SyncError> {
        let url = self.config.issue_url(id.as_str());
        self.send(id, self.client.patch(url).json(&json!({ "status": status })))
            .await
    }

    async fn update_fields(&self, id: &NodeId, patch: &NodePatch) -> Result<(), SyncError> {
        let url = self.config.issue_url(id.as_str());
        self.send(id, self.client.patch(url).json(patch)).await
    }

    async fn close(&self, id: &NodeId, reason: Option<&str>) -> Result<(), SyncError> {
        let url = format!("{}/close", self.config.issue_url(id.as_str()));
        self.send(id, self.client.post(url).json(&json!({ "reason": reason })))
            .await
    }
}
