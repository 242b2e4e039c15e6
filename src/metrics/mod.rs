pub mod analyzer;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ContractEvent {
    Created { duration_hours: f64, value: f64 },
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NetworkEvent {
    Corruption,
    ProviderFailure,
    Latency(f64),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub avg_response_time: f64,
    pub std_response_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractSummary {
    pub created: u64,
    pub completed: u64,
    pub failed: u64,
    pub avg_duration_hours: f64,
    pub avg_value: f64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub avg_utilization: f64,
    pub avg_reputation: f64,
    pub total_earnings: f64,
    pub avg_earnings_per_provider: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub corruptions: u64,
    pub provider_failures: u64,
    pub avg_latency: f64,
    pub corruption_rate: f64,
    pub failure_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub elapsed: f64,
    pub requests: RequestSummary,
    pub contracts: ContractSummary,
    pub providers: ProviderSummary,
    pub network: NetworkSummary,
}

/// Shared accumulator handed to every agent of a run.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<RwLock<MetricsInner>>,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct MetricsInner {
    requests_successful: u64,
    requests_failed: u64,
    response_times: Vec<f64>,

    contracts_created: u64,
    contracts_completed: u64,
    contracts_failed: u64,
    contract_durations: Vec<f64>,
    contract_values: Vec<f64>,

    utilizations: Vec<f64>,
    reputations: Vec<f64>,
    // earnings are cumulative per provider, so only the latest sample counts
    earnings: HashMap<String, f64>,

    corruptions: u64,
    provider_failures: u64,
    latencies: Vec<f64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsInner::default())),
            start_time: Instant::now(),
        }
    }

    /// `response_time` is `None` when no response ever arrived (timeouts).
    pub fn record_request(&self, success: bool, response_time: Option<f64>) {
        let mut inner = self.inner.write();
        if success {
            inner.requests_successful += 1;
        } else {
            inner.requests_failed += 1;
        }

        if let Some(rt) = response_time {
            if rt.is_finite() && rt >= 0.0 {
                inner.response_times.push(rt);
            } else {
                warn!("Ignoring invalid response time sample {}", rt);
            }
        }
    }

    pub fn record_contract(&self, event: ContractEvent) {
        let mut inner = self.inner.write();
        match event {
            ContractEvent::Created { duration_hours, value } => {
                inner.contracts_created += 1;
                inner.contract_durations.push(duration_hours);
                inner.contract_values.push(value);
            }
            ContractEvent::Completed => inner.contracts_completed += 1,
            ContractEvent::Failed => inner.contracts_failed += 1,
        }
    }

    pub fn record_provider_sample(&self, provider_id: &str, utilization: f64, reputation: f64, earnings: f64) {
        let mut inner = self.inner.write();
        inner.utilizations.push(utilization);
        inner.reputations.push(reputation);
        inner.earnings.insert(provider_id.to_string(), earnings);
    }

    pub fn record_network_event(&self, event: NetworkEvent) {
        let mut inner = self.inner.write();
        match event {
            NetworkEvent::Corruption => inner.corruptions += 1,
            NetworkEvent::ProviderFailure => inner.provider_failures += 1,
            NetworkEvent::Latency(secs) => {
                if secs > 0.0 {
                    inner.latencies.push(secs);
                }
            }
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        use analyzer::{mean, stdev};

        let inner = self.inner.read();
        let total = inner.requests_successful + inner.requests_failed;
        let total_earnings: f64 = inner.earnings.values().sum();

        MetricsSummary {
            elapsed: self.start_time.elapsed().as_secs_f64(),
            requests: RequestSummary {
                total,
                successful: inner.requests_successful,
                failed: inner.requests_failed,
                success_rate: ratio(inner.requests_successful, total),
                avg_response_time: mean(&inner.response_times),
                std_response_time: stdev(&inner.response_times),
            },
            contracts: ContractSummary {
                created: inner.contracts_created,
                completed: inner.contracts_completed,
                failed: inner.contracts_failed,
                avg_duration_hours: mean(&inner.contract_durations),
                avg_value: mean(&inner.contract_values),
                completion_rate: ratio(inner.contracts_completed, inner.contracts_created),
            },
            providers: ProviderSummary {
                avg_utilization: mean(&inner.utilizations),
                avg_reputation: mean(&inner.reputations),
                total_earnings,
                avg_earnings_per_provider: if inner.earnings.is_empty() {
                    0.0
                } else {
                    total_earnings / inner.earnings.len() as f64
                },
            },
            network: NetworkSummary {
                corruptions: inner.corruptions,
                provider_failures: inner.provider_failures,
                avg_latency: mean(&inner.latencies),
                corruption_rate: ratio(inner.corruptions, total),
                failure_rate: ratio(inner.provider_failures, total),
            },
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 { 0.0 } else { part as f64 / whole as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_summary_is_all_zero() {
        let summary = MetricsCollector::new().summary();
        assert_eq!(summary.requests, RequestSummary::default());
        assert_eq!(summary.contracts, ContractSummary::default());
        assert_eq!(summary.providers, ProviderSummary::default());
        assert_eq!(summary.network, NetworkSummary::default());
    }

    #[test]
    fn single_response_time_has_zero_stdev() {
        let metrics = MetricsCollector::new();
        metrics.record_request(true, Some(1.5));

        let requests = metrics.summary().requests;
        assert_eq!(requests.total, 1);
        assert_eq!(requests.success_rate, 1.0);
        assert_eq!(requests.avg_response_time, 1.5);
        assert_eq!(requests.std_response_time, 0.0);
    }

    #[test]
    fn request_counts_and_rates() {
        let metrics = MetricsCollector::new();
        metrics.record_request(true, Some(1.0));
        metrics.record_request(true, Some(3.0));
        metrics.record_request(false, Some(2.0));
        metrics.record_request(false, None);
        metrics.record_network_event(NetworkEvent::Corruption);
        metrics.record_network_event(NetworkEvent::ProviderFailure);

        let summary = metrics.summary();
        assert_eq!(summary.requests.total, 4);
        assert_eq!(summary.requests.failed, 2);
        assert_eq!(summary.requests.success_rate, 0.5);
        assert_eq!(summary.requests.avg_response_time, 2.0);
        assert_eq!(summary.requests.std_response_time, 1.0);
        assert_eq!(summary.network.corruption_rate, 0.25);
        assert_eq!(summary.network.failure_rate, 0.25);
    }

    #[test]
    fn contract_completion_rate() {
        let metrics = MetricsCollector::new();
        metrics.record_contract(ContractEvent::Created { duration_hours: 2.0, value: 50.0 });
        metrics.record_contract(ContractEvent::Created { duration_hours: 4.0, value: 10.0 });
        metrics.record_contract(ContractEvent::Completed);
        metrics.record_contract(ContractEvent::Failed);

        let contracts = metrics.summary().contracts;
        assert_eq!(contracts.created, 2);
        assert_eq!(contracts.failed, 1);
        assert_eq!(contracts.avg_duration_hours, 3.0);
        assert_eq!(contracts.avg_value, 30.0);
        assert_eq!(contracts.completion_rate, 0.5);
    }

    #[test]
    fn earnings_use_latest_sample_per_provider() {
        let metrics = MetricsCollector::new();
        metrics.record_provider_sample("provider0", 0.2, 5.0, 10.0);
        metrics.record_provider_sample("provider0", 0.4, 5.1, 25.0);
        metrics.record_provider_sample("provider1", 0.6, 4.9, 5.0);

        let providers = metrics.summary().providers;
        assert_eq!(providers.total_earnings, 30.0);
        assert_eq!(providers.avg_earnings_per_provider, 15.0);
        assert!((providers.avg_utilization - 0.4).abs() < 1e-9);
    }

    #[test]
    fn clones_share_state() {
        let metrics = MetricsCollector::new();
        let handle = metrics.clone();
        handle.record_network_event(NetworkEvent::Latency(0.2));
        handle.record_network_event(NetworkEvent::Latency(0.0));

        assert_eq!(metrics.summary().network.avg_latency, 0.2);
    }
}
