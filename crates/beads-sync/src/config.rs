//! Engine configuration
//!
//! Every section has defaults, so an empty TOML file is a valid config:
//!
//! ```toml
//! base_url = "http://localhost:8080"
//! poll_interval_ms = 30000
//!
//! [backoff]
//! max_attempts = 50
//!
//! [refresh]
//! applied_delay_ms = 10000
//!
//! [filter]
//! hide_closed = true
//! ```

use crate::error::SyncError;
use crate::reconciler::RefreshPolicy;
use beads_graph::{ForceConfig, MergeConfig, StabilizerConfig, ViewFilter};
use beads_stream::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Backend origin, e.g. `http://localhost:8080`
    pub base_url: String,
    /// Graph snapshot endpoint
    pub snapshot_path: String,
    /// Issue collection used for mutations
    pub issues_path: String,
    /// Mutation event stream
    pub mutation_stream_path: String,
    /// Event bus stream; empty disables the bus channel
    pub bus_stream_path: String,
    /// Background snapshot cadence (milliseconds)
    pub poll_interval_ms: u64,
    pub backoff: BackoffPolicy,
    pub refresh: RefreshPolicy,
    pub stabilizer: StabilizerConfig,
    pub merge: MergeConfig,
    pub force: ForceConfig,
    pub filter: ViewFilter,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            snapshot_path: "/api/graph".into(),
            issues_path: "/api/issues".into(),
            mutation_stream_path: "/api/events".into(),
            bus_stream_path: "/api/bus/events".into(),
            poll_interval_ms: 30_000,
            backoff: BackoffPolicy::default(),
            refresh: RefreshPolicy::default(),
            stabilizer: StabilizerConfig::default(),
            merge: MergeConfig::default(),
            force: ForceConfig::default(),
            filter: ViewFilter::default(),
        }
    }
}

impl SyncConfig {
    /// Parse TOML
    ///
    /// # Errors
    /// `SyncError::Config` on malformed TOML or invalid values
    pub fn from_toml_str(text: &str) -> Result<Self, SyncError> {
        let config: Self = toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `SyncError::Config` if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Check values the engine cannot run with
    ///
    /// # Errors
    /// `SyncError::Config` naming the offending field
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::Config("base_url must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(SyncError::Config("poll_interval_ms must be positive".into()));
        }
        if self.mutation_stream_path.trim().is_empty() {
            return Err(SyncError::Config(
                "mutation_stream_path must not be empty".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(SyncError::Config(
                "backoff.jitter must be within [0, 1]".into(),
            ));
        }
        if !self.merge.seed_radius.is_finite() {
            return Err(SyncError::Config("merge.seed_radius must be finite".into()));
        }
        for (field, value) in [
            ("force.strength", self.force.strength),
            ("force.decay", self.force.decay),
            ("force.rest_distance", self.force.rest_distance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SyncError::Config(format!(
                    "{field} must be finite and non-negative"
                )));
            }
        }
        Ok(())
    }

    /// With backend origin
    #[inline]
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// With poll cadence
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With backoff policy
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// With refresh policy
    #[inline]
    #[must_use]
    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    /// With view filter
    #[inline]
    #[must_use]
    pub fn with_filter(mut self, filter: ViewFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Without the bus channel
    #[inline]
    #[must_use]
    pub fn without_bus(mut self) -> Self {
        self.bus_stream_path.clear();
        self
    }

    /// Poll cadence
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Absolute URL for `path`
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Snapshot URL
    #[must_use]
    pub fn snapshot_url(&self) -> String {
        self.endpoint(&self.snapshot_path)
    }

    /// Mutation stream URL
    #[must_use]
    pub fn mutation_stream_url(&self) -> String {
        self.endpoint(&self.mutation_stream_path)
    }

    /// Bus stream URL, unless disabled
    #[must_use]
    pub fn bus_stream_url(&self) -> Option<String> {
        (!self.bus_stream_path.trim().is_empty()).then(|| self.endpoint(&self.bus_stream_path))
    }

    /// URL of one issue
    #[must_use]
    pub fn issue_url(&self, id: &str) -> String {
        self.endpoint(&format!("{}/{id}", self.issues_path.trim_end_matches('/')))
    }
}
