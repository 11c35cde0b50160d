//! Drift monitor: a periodic freshness scan that only reports what it
//! observes. Grounded in the teacher's `ResumeTracker`
//! (`src/ingestion/resume.rs`) "scan, don't mutate" style — this module
//! never mutates campaign data, it only emits alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{CampaignVariant, TenantId};
use crate::error::PkeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Notice,
    NeedsRefresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftAlert {
    pub campaign_variant_id: Uuid,
    pub reason: String,
    pub severity: AlertSeverity,
    pub detected_at: DateTime<Utc>,
}

/// Input pairing a campaign variant with the most recent `updated_at`
/// timestamp across its spec values and chunks; the router/ingestion layer
/// computes this aggregate since it requires a join the monitor doesn't
/// own.
pub struct StalenessCandidate {
    pub variant: CampaignVariant,
    pub last_updated_at: DateTime<Utc>,
}

/// Periodic freshness scan. Holds no state of its own beyond the config
/// it's built with; `scan` is a pure function of its inputs so the caller
/// controls the schedule (e.g. a `tokio::time::interval` loop calling
/// `scan` every `driftCheckInterval`).
pub struct DriftMonitor<'a> {
    config: &'a Config,
}

impl<'a> DriftMonitor<'a> {
    #[must_use]
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Flags any candidate whose `last_updated_at` is older than
    /// `stalenessWindow` (notice) or `needsRefreshWindow` (escalated).
    /// Never mutates `candidates`.
    #[must_use]
    pub fn scan(&self, now: DateTime<Utc>, candidates: &[StalenessCandidate]) -> Vec<DriftAlert> {
        candidates
            .iter()
            .filter_map(|c| {
                let age = now.signed_duration_since(c.last_updated_at).to_std().ok()?;
                if age > self.config.needs_refresh_window {
                    Some(DriftAlert {
                        campaign_variant_id: c.variant.id,
                        reason: "stale beyond needs-refresh window".to_string(),
                        severity: AlertSeverity::NeedsRefresh,
                        detected_at: now,
                    })
                } else if age > self.config.staleness_window {
                    Some(DriftAlert {
                        campaign_variant_id: c.variant.id,
                        reason: "stale beyond notification window".to_string(),
                        severity: AlertSeverity::Notice,
                        detected_at: now,
                    })
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Storage for emitted alerts. A thin in-memory sink; external observers
/// (the `listAlerts`/`triggerCheck` entry points) read through this.
#[derive(Default)]
pub struct AlertStore {
    alerts: parking_lot::RwLock<std::collections::HashMap<TenantId, Vec<DriftAlert>>>,
}

impl AlertStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, tenant_id: TenantId, alerts: Vec<DriftAlert>) {
        self.alerts.write().entry(tenant_id).or_default().extend(alerts);
    }

    #[must_use]
    pub fn list(&self, tenant_id: TenantId) -> Vec<DriftAlert> {
        self.alerts.read().get(&tenant_id).cloned().unwrap_or_default()
    }
}

/// `triggerCheck()` entry point: runs a scan immediately against whatever
/// candidates the caller supplies and records the result.
pub async fn trigger_check(
    monitor: &DriftMonitor<'_>,
    alerts: &AlertStore,
    tenant_id: TenantId,
    now: DateTime<Utc>,
    candidates: &[StalenessCandidate],
) -> PkeResult<Vec<DriftAlert>> {
    let found = monitor.scan(now, candidates);
    alerts.record(tenant_id, found.clone());
    Ok(found)
}
