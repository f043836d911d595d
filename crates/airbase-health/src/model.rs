use serde::{Deserialize, Serialize};

use airbase_types::prelude::{ServiceName, Timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Last observed liveness of one downstream. Superseded wholesale on every
/// probe cycle; `Unknown` until at least one check has completed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    #[serde(rename = "name")]
    pub service_name: ServiceName,
    #[serde(rename = "status")]
    pub state: HealthState,
    #[serde(rename = "response_time")]
    pub response_time_ms: Option<f64>,
    pub last_checked: Option<Timestamp>,
}

impl HealthStatus {
    pub fn unknown(service_name: ServiceName) -> Self {
        Self {
            service_name,
            state: HealthState::Unknown,
            response_time_ms: None,
            last_checked: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

impl OverallHealth {
    /// Healthy iff every service is healthy (vacuously true for an empty
    /// table), unhealthy iff none is, degraded in between. `Unknown` counts
    /// as not-yet-healthy.
    pub fn derive(statuses: &[HealthStatus]) -> Self {
        if statuses.is_empty() {
            return OverallHealth::Healthy;
        }
        let healthy = statuses
            .iter()
            .filter(|s| s.state == HealthState::Healthy)
            .count();
        if healthy == statuses.len() {
            OverallHealth::Healthy
        } else if healthy > 0 {
            OverallHealth::Degraded
        } else {
            OverallHealth::Unhealthy
        }
    }
}

/// Aggregate view over all registered services, in configuration order.
#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub overall: OverallHealth,
    pub services: Vec<HealthStatus>,
}

impl HealthReport {
    pub fn from_statuses(services: Vec<HealthStatus>) -> Self {
        Self {
            overall: OverallHealth::derive(&services),
            services,
        }
    }
}
