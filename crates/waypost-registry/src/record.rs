//! Registry records and read-only projections

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// The whole registry table, keyed by logical service name
pub type RegistryTable = BTreeMap<String, ServiceRecord>;

/// Descriptive metadata supplied at registration.
///
/// Never interpreted by the registry; unknown keys survive a round trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetadata {
    /// Service version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Endpoints the service advertises
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<serde_json::Value>,

    /// Any other keys
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// What a service supplies when it registers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    /// Origin the gateway must use to reach the service
    pub base_url: String,

    /// Pass-through metadata
    #[serde(default)]
    pub metadata: ServiceMetadata,
}

impl ServiceInfo {
    /// Create registration info for `base_url` with empty metadata
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            metadata: ServiceMetadata::default(),
        }
    }

    /// Set the advertised version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.metadata.version = Some(version.into());
        self
    }

    /// Set the description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    /// Add an advertised endpoint
    pub fn endpoint(mut self, endpoint: impl Into<serde_json::Value>) -> Self {
        self.metadata.endpoints.push(endpoint.into());
        self
    }
}

/// One row of the registry table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    /// Logical service name (table key)
    pub name: String,

    /// Origin the gateway must use to reach the service
    pub base_url: String,

    /// Last known liveness
    pub healthy: bool,

    /// First registration time; rewritten only by a re-registration
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub registered_at: DateTime<Utc>,

    /// Time of the last probe or registration
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_health_check_at: DateTime<Utc>,

    /// Diagnostic identifier of the registering process
    pub owner_process_id: String,

    /// Pass-through metadata
    #[serde(default)]
    pub metadata: ServiceMetadata,
}

impl ServiceRecord {
    /// Build a fresh, healthy record stamped at `now`
    pub fn new(
        name: impl Into<String>,
        info: ServiceInfo,
        owner: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: info.base_url,
            healthy: true,
            registered_at: now,
            last_health_check_at: now,
            owner_process_id: owner.into(),
            metadata: info.metadata,
        }
    }

    /// Milliseconds since registration, clamped at zero
    pub fn uptime_ms(&self, now: DateTime<Utc>) -> u64 {
        millis_between(self.registered_at, now)
    }

    /// Milliseconds since the last health check, clamped at zero
    pub fn idle_ms(&self, now: DateTime<Utc>) -> u64 {
        millis_between(self.last_health_check_at, now)
    }

    /// Whether the record has gone unchecked for longer than `timeout`
    pub fn is_inactive(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        if timeout_ms == 0 {
            return true;
        }
        self.idle_ms(now) > timeout_ms
    }

    /// Read-only projection used by `list_services`
    pub fn view(&self, now: DateTime<Utc>) -> ServiceView {
        ServiceView {
            url: self.base_url.clone(),
            healthy: self.healthy,
            registered_at: self.registered_at,
            uptime: self.uptime_ms(now),
            owner: self.owner_process_id.clone(),
        }
    }
}

fn millis_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
    u64::try_from((later - earlier).num_milliseconds()).unwrap_or(0)
}

/// Diagnostic view of one service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
    /// Base URL
    pub url: String,
    /// Last known liveness
    pub healthy: bool,
    /// Registration time (RFC 3339)
    pub registered_at: DateTime<Utc>,
    /// Age in milliseconds
    pub uptime: u64,
    /// Registering process
    pub owner: String,
}

/// Per-service entry of [`RegistryStats`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    /// Last known liveness
    pub healthy: bool,
    /// Age in milliseconds
    pub uptime: u64,
    /// Last probe time
    pub last_health_check_at: DateTime<Utc>,
}

/// Aggregate statistics over a table snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Number of records
    pub total: usize,
    /// Records marked healthy
    pub healthy_count: usize,
    /// Records marked unhealthy
    pub unhealthy_count: usize,
    /// Mean age in milliseconds (0 when empty)
    pub average_uptime: f64,
    /// Per-service breakdown
    pub per_service: BTreeMap<String, ServiceStats>,
}

impl RegistryStats {
    /// Derive statistics from `table` as of `now`
    pub fn from_table(table: &RegistryTable, now: DateTime<Utc>) -> Self {
        let mut stats = RegistryStats {
            total: table.len(),
            ..Default::default()
        };
        let mut total_uptime: u64 = 0;

        for (name, record) in table {
            let uptime = record.uptime_ms(now);
            total_uptime = total_uptime.saturating_add(uptime);

            if record.healthy {
                stats.healthy_count += 1;
            } else {
                stats.unhealthy_count += 1;
            }

            stats.per_service.insert(
                name.clone(),
                ServiceStats {
                    healthy: record.healthy,
                    uptime,
                    last_health_check_at: record.last_health_check_at,
                },
            );
        }

        if stats.total > 0 {
            stats.average_uptime = total_uptime as f64 / stats.total as f64;
        }

        stats
    }
}
