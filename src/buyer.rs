// Buyer: issues storage requests and tracks what came of them

use crate::contract::{AgentId, ContractId, FailureReason, RequestId, StorageContract, StorageRequest};
use crate::error::{MarketError, Result};
use crate::metrics::ContractEvent;
use crate::network::{Envelope, Message, MessageBus, StorageOutcome, StorageResponse};
use parking_lot::Mutex;
use rand::{Rng, thread_rng};
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestPattern {
    Uniform { min: Duration, max: Duration },
    Poisson { mean: Duration },
    /// No generator, requests only go out through [`Buyer::submit`].
    OnDemand,
}

impl RequestPattern {
    pub fn next_delay(&self) -> Option<Duration> {
        let mut rng = thread_rng();
        match *self {
            Self::Uniform { min, max } => Some(if max > min { rng.gen_range(min..=max) } else { min }),
            Self::Poisson { mean } => {
                let mean = mean.as_secs_f64();
                let secs = Exp::new(1.0 / mean)
                    .map(|exp| exp.sample(&mut rng))
                    .unwrap_or(mean);
                Some(Duration::from_secs_f64(secs))
            }
            Self::OnDemand => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyerConfig {
    pub budget_per_hour: f64,
    pub request_pattern: RequestPattern,
    pub space_gb: (u64, u64),
    pub duration_hours: (f64, f64),
    pub max_price: (f64, f64),
    pub request_timeout: Duration,
    pub poll_timeout: Duration,
    pub eviction_interval: Duration,
}

impl Default for BuyerConfig {
    fn default() -> Self {
        Self {
            budget_per_hour: 25.0,
            request_pattern: RequestPattern::Uniform {
                min: Duration::from_secs(2),
                max: Duration::from_secs(8),
            },
            space_gb: (5, 50),
            duration_hours: (0.5, 6.0),
            max_price: (0.2, 1.5),
            request_timeout: Duration::from_secs(60),
            poll_timeout: Duration::from_secs(1),
            eviction_interval: Duration::from_secs(5),
        }
    }
}

impl BuyerConfig {
    pub fn with_budget(mut self, budget_per_hour: f64) -> Self {
        self.budget_per_hour = budget_per_hour;
        self
    }

    pub fn with_pattern(mut self, pattern: RequestPattern) -> Self {
        self.request_pattern = pattern;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(MarketError::InvalidConfig(msg));

        if !(self.budget_per_hour > 0.0) {
            return invalid(format!("budget per hour must be positive, got {}", self.budget_per_hour));
        }
        let (space_min, space_max) = self.space_gb;
        if space_min == 0 || space_min > space_max {
            return invalid(format!("bad space range {space_min}..={space_max}"));
        }
        let (hours_min, hours_max) = self.duration_hours;
        if !(hours_min > 0.0) || hours_min > hours_max {
            return invalid(format!("bad duration range {hours_min}..={hours_max}"));
        }
        let (price_min, price_max) = self.max_price;
        if !(price_min >= 0.0) || price_min > price_max {
            return invalid(format!("bad price range {price_min}..={price_max}"));
        }
        match self.request_pattern {
            RequestPattern::Uniform { min, max } if min > max => {
                invalid(format!("request interval {min:?} exceeds {max:?}"))
            }
            RequestPattern::Poisson { mean } if mean.is_zero() => invalid("poisson mean must be positive".into()),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuyerStats {
    pub buyer_id: AgentId,
    pub requests_sent: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub failures_by_reason: BTreeMap<FailureReason, u64>,
    pub success_rate: f64,
    pub total_spent: f64,
    pub total_storage_gb: u64,
    pub avg_response_time: f64,
    pub contracts_completed: u64,
    pub active_contracts: usize,
    pub pending_requests: usize,
}

#[derive(Debug, Default)]
struct BuyerState {
    pending: HashMap<RequestId, StorageRequest>,
    active: HashMap<ContractId, StorageContract>,
    requests_sent: u64,
    successful: u64,
    failed: u64,
    failures_by_reason: BTreeMap<FailureReason, u64>,
    total_spent: f64,
    total_storage_gb: u64,
    response_time_total: f64,
    responses: u64,
    contracts_completed: u64,
}

impl BuyerState {
    fn fail(&mut self, reason: FailureReason) {
        self.failed += 1;
        *self.failures_by_reason.entry(reason).or_default() += 1;
    }
}

pub struct Buyer {
    id: AgentId,
    broker_id: AgentId,
    bus: MessageBus,
    config: BuyerConfig,
    state: Mutex<BuyerState>,
    shutdown: CancellationToken,
}

impl Buyer {
    pub fn new(
        id: impl Into<AgentId>,
        broker_id: impl Into<AgentId>,
        bus: MessageBus,
        config: BuyerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let id = id.into();
        bus.register(&id)?;

        Ok(Self {
            id,
            broker_id: broker_id.into(),
            bus,
            config,
            state: Mutex::new(BuyerState::default()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(
            "Buyer {} started (budget ${:.2}/h, {:?})",
            self.id, self.config.budget_per_hour, self.config.request_pattern
        );

        let mut handles = vec![
            tokio::spawn(self.clone().response_loop()),
            tokio::spawn(self.clone().eviction_loop()),
        ];
        if self.config.request_pattern != RequestPattern::OnDemand {
            handles.push(tokio::spawn(self.clone().request_loop()));
        }
        handles
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
        info!("Buyer {} stopped", self.id);
    }

    /// Draws a request shape: (space_gb, duration_hours, max_price_per_gb_hour).
    /// The price is capped so the request never costs more per hour than the budget.
    pub fn generate(&self) -> (u64, f64, f64) {
        let mut rng = thread_rng();
        let (space_min, space_max) = self.config.space_gb;
        let (hours_min, hours_max) = self.config.duration_hours;
        let (price_min, price_max) = self.config.max_price;

        let space = rng.gen_range(space_min..=space_max);
        let hours = rng.gen_range(hours_min..=hours_max);
        let price = rng
            .gen_range(price_min..=price_max)
            .min(self.config.budget_per_hour / space as f64);
        (space, hours, price)
    }

    pub async fn submit(&self, space_gb: u64, duration_hours: f64, max_price: f64) -> Result<RequestId> {
        let request = StorageRequest::new(
            self.id.clone(),
            space_gb,
            duration_hours,
            max_price,
            self.bus.clock().now(),
        );
        request.validate()?;
        let request_id = request.request_id;

        self.state.lock().pending.insert(request_id, request.clone());

        if let Err(e) = self
            .bus
            .send(&self.id, &self.broker_id, Message::StorageRequest(request))
            .await
        {
            self.state.lock().pending.remove(&request_id);
            return Err(e);
        }

        self.state.lock().requests_sent += 1;
        info!(
            "Buyer {} requested {}GB for {:.1}h (max ${:.3}/GB/h)",
            self.id, space_gb, duration_hours, max_price
        );
        Ok(request_id)
    }

    async fn request_loop(self: Arc<Self>) {
        while !self.shutdown.is_cancelled() {
            let Some(delay) = self.config.request_pattern.next_delay() else {
                break;
            };
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let (space, hours, price) = self.generate();
            if let Err(e) = self.submit(space, hours, price).await {
                warn!("Buyer {} could not send request: {}", self.id, e);
            }
        }
    }

    async fn response_loop(self: Arc<Self>) {
        while !self.shutdown.is_cancelled() {
            match self.bus.receive(&self.id, self.config.poll_timeout).await {
                Ok(Some(envelope)) => self.handle_envelope(envelope),
                Ok(None) => {}
                Err(e) => {
                    warn!("Buyer {} receive failed: {}", self.id, e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    fn handle_envelope(self: &Arc<Self>, envelope: Envelope) {
        if let Err(e) = envelope.body.validate() {
            warn!("Buyer {} dropping message from {}: {}", self.id, envelope.from, e);
            return;
        }

        match envelope.body {
            Message::StorageResponse(response) => {
                if let Some(contract) = self.resolve(response) {
                    tokio::spawn(self.clone().await_completion(contract));
                }
            }
            other => warn!("Buyer {}: {}", self.id, other.unexpected(&self.id)),
        }
    }

    /// Settles a pending request. Returns the new contract on success.
    ///
    /// Responses for requests that are no longer pending (already answered or
    /// timed out) are dropped.
    pub fn resolve(&self, response: StorageResponse) -> Option<StorageContract> {
        let now = self.bus.clock().now();
        let metrics = self.bus.metrics();
        let mut state = self.state.lock();

        let Some(request) = state.pending.remove(&response.request_id) else {
            debug!("Buyer {} dropping response for unknown request {}", self.id, response.request_id);
            return None;
        };
        let response_time = now - request.timestamp;
        state.response_time_total += response_time;
        state.responses += 1;

        match response.outcome {
            StorageOutcome::Success { contract } => {
                state.successful += 1;
                state.total_spent += contract.total_cost;
                state.total_storage_gb += contract.space_gb;
                state.active.insert(contract.contract_id, contract.clone());

                metrics.record_request(true, Some(response_time));
                metrics.record_contract(ContractEvent::Created {
                    duration_hours: contract.duration_hours,
                    value: contract.total_cost,
                });
                info!(
                    "Buyer {} got contract {} with {} (${:.2})",
                    self.id, contract.contract_id, contract.provider_id, contract.total_cost
                );
                Some(contract)
            }
            StorageOutcome::Failure { reason } => {
                state.fail(reason);
                metrics.record_request(false, Some(response_time));
                info!("Buyer {} request {} failed: {}", self.id, request.request_id, reason);
                None
            }
        }
    }

    async fn await_completion(self: Arc<Self>, contract: StorageContract) {
        let wait = self.bus.clock().until(contract.end_time);
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(wait) => {
                self.complete(&contract.contract_id);
            }
        }
    }

    pub fn complete(&self, contract_id: &ContractId) -> bool {
        let mut state = self.state.lock();
        if state.active.remove(contract_id).is_none() {
            return false;
        }
        state.contracts_completed += 1;
        self.bus.metrics().record_contract(ContractEvent::Completed);
        info!("Buyer {} contract {} completed", self.id, contract_id);
        true
    }

    /// Gives up on requests older than the request timeout.
    pub fn evict_pending(&self) -> Vec<RequestId> {
        let now = self.bus.clock().now();
        let timeout = self.config.request_timeout.as_secs_f64();
        let metrics = self.bus.metrics();
        let mut state = self.state.lock();

        let expired: Vec<RequestId> = state
            .pending
            .values()
            .filter(|request| now - request.timestamp > timeout)
            .map(|request| request.request_id)
            .collect();
        for request_id in &expired {
            state.pending.remove(request_id);
            state.fail(FailureReason::Timeout);
            metrics.record_request(false, None);
            warn!("Buyer {} gave up on request {}", self.id, request_id);
        }
        expired
    }

    async fn eviction_loop(self: Arc<Self>) {
        let mut tick = interval(self.config.eviction_interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            self.evict_pending();
        }
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn active_contracts(&self) -> Vec<StorageContract> {
        self.state.lock().active.values().cloned().collect()
    }

    pub fn stats(&self) -> BuyerStats {
        let state = self.state.lock();
        let resolved = state.successful + state.failed;
        BuyerStats {
            buyer_id: self.id.clone(),
            requests_sent: state.requests_sent,
            successful_requests: state.successful,
            failed_requests: state.failed,
            failures_by_reason: state.failures_by_reason.clone(),
            success_rate: if resolved == 0 {
                0.0
            } else {
                state.successful as f64 / resolved as f64
            },
            total_spent: state.total_spent,
            total_storage_gb: state.total_storage_gb,
            avg_response_time: if state.responses == 0 {
                0.0
            } else {
                state.response_time_total / state.responses as f64
            },
            contracts_completed: state.contracts_completed,
            active_contracts: state.active.len(),
            pending_requests: state.pending.len(),
        }
    }
}
