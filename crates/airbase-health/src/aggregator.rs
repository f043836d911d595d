use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use airbase_net::prelude::{NetClient, NetRequest};
use airbase_types::prelude::{ServiceDescriptor, Timestamp};

use crate::model::{HealthReport, HealthState, HealthStatus};

#[derive(Clone, Copy, Debug)]
pub struct HealthOptions {
    /// Budget for one probe, independent of the service's proxy timeout.
    /// Health checks must stay cheap even when a service is allowed slow
    /// responses on its real endpoints.
    pub probe_timeout_ms: u64,
    /// 0 = probe live on every `report()`; positive = a background refresher
    /// owns probing and `report()` serves the last snapshot.
    pub check_interval_ms: u64,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 3_000,
            check_interval_ms: 0,
        }
    }
}

pub struct HealthAggregator {
    services: Vec<ServiceDescriptor>,
    client: Arc<dyn NetClient>,
    options: HealthOptions,
    snapshot: Mutex<Arc<Vec<HealthStatus>>>,
}

impl HealthAggregator {
    pub fn new(
        services: Vec<ServiceDescriptor>,
        client: Arc<dyn NetClient>,
        options: HealthOptions,
    ) -> Self {
        let unknown: Vec<_> = services
            .iter()
            .map(|svc| HealthStatus::unknown(svc.name.clone()))
            .collect();
        Self {
            services,
            client,
            options,
            snapshot: Mutex::new(Arc::new(unknown)),
        }
    }

    /// Probe one service. Never errors: every outcome folds into a status.
    pub async fn check(&self, service: &ServiceDescriptor) -> HealthStatus {
        probe(self.client.clone(), self.options.probe_timeout_ms, service.clone()).await
    }

    /// Probe every registered service concurrently, one task per service so a
    /// stuck or panicking probe cannot take the others down with it.
    pub async fn probe_all(&self) -> Vec<HealthStatus> {
        let handles: Vec<JoinHandle<HealthStatus>> = self
            .services
            .iter()
            .cloned()
            .map(|svc| {
                let client = self.client.clone();
                let timeout_ms = self.options.probe_timeout_ms;
                tokio::spawn(probe(client, timeout_ms, svc))
            })
            .collect();

        let mut statuses = Vec::with_capacity(handles.len());
        for (handle, svc) in handles.into_iter().zip(self.services.iter()) {
            match handle.await {
                Ok(status) => statuses.push(status),
                Err(err) => {
                    warn!(service = %svc.name, %err, "health probe task failed");
                    statuses.push(HealthStatus {
                        service_name: svc.name.clone(),
                        state: HealthState::Unhealthy,
                        response_time_ms: None,
                        last_checked: Some(Timestamp::now()),
                    });
                }
            }
        }
        statuses
    }

    /// Current aggregate view. Live probes in on-demand mode, the cached
    /// snapshot when a refresher owns the probing.
    pub async fn report(&self) -> HealthReport {
        if self.options.check_interval_ms > 0 {
            let cached = self.snapshot.lock().clone();
            return HealthReport::from_statuses(cached.as_ref().clone());
        }
        let statuses = self.probe_all().await;
        self.store(statuses.clone());
        HealthReport::from_statuses(statuses)
    }

    /// One refresh cycle: probe everything and replace the snapshot wholesale.
    pub async fn refresh(&self) {
        let statuses = self.probe_all().await;
        self.store(statuses);
    }

    /// Background refresher for cached mode. Returns `None` when the
    /// aggregator is configured for on-demand probing.
    pub fn spawn_refresher(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.options.check_interval_ms == 0 {
            return None;
        }
        let aggregator = self.clone();
        let period = Duration::from_millis(self.options.check_interval_ms);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                aggregator.refresh().await;
            }
        }))
    }

    fn store(&self, statuses: Vec<HealthStatus>) {
        *self.snapshot.lock() = Arc::new(statuses);
    }
}

async fn probe(
    client: Arc<dyn NetClient>,
    probe_timeout_ms: u64,
    service: ServiceDescriptor,
) -> HealthStatus {
    let target = ServiceDescriptor {
        timeout_ms: probe_timeout_ms,
        ..service.clone()
    };
    let checked_at = Timestamp::now();
    let request = NetRequest::get(service.health_path.as_str());
    match client.call(&target, request).await {
        Ok(resp) if resp.status.is_success() => HealthStatus {
            service_name: service.name,
            state: HealthState::Healthy,
            response_time_ms: Some(resp.elapsed.as_secs_f64() * 1_000.0),
            last_checked: Some(checked_at),
        },
        Ok(resp) => {
            debug!(service = %service.name, status = %resp.status, "health probe non-2xx");
            HealthStatus {
                service_name: service.name,
                state: HealthState::Unhealthy,
                response_time_ms: Some(resp.elapsed.as_secs_f64() * 1_000.0),
                last_checked: Some(checked_at),
            }
        }
        Err(err) => {
            debug!(service = %service.name, %err, "health probe failed");
            HealthStatus {
                service_name: service.name,
                state: HealthState::Unhealthy,
                response_time_ms: None,
                last_checked: Some(checked_at),
            }
        }
    }
}
