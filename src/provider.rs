// Storage provider: owns the capacity ledger and is the source of truth for its reputation

use crate::contract::{
    AgentId, ContractId, ContractStatus, FailureReason, ProviderInfo, RequestId, StatusUpdate,
    StorageContract,
};
use crate::error::{MarketError, Result};
use crate::metrics::NetworkEvent;
use crate::network::{AllocationDecision, AllocationResponse, Envelope, Message, MessageBus};
use crate::pricing::{PricingConfig, PricingStrategy};
use crate::reputation::{Reputation, ReputationPolicy};
use parking_lot::Mutex;
use rand::{Rng, thread_rng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub total_space_gb: u64,
    pub base_price_per_gb_hour: f64,
    pub failure_probability: f64,
    pub pricing: PricingConfig,
    pub reputation: ReputationPolicy,
    pub processing_delay: (Duration, Duration),
    pub poll_timeout: Duration,
    pub sweep_interval: Duration,
    pub status_interval: Duration,
    pub pricing_interval: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            total_space_gb: 200,
            base_price_per_gb_hour: 0.5,
            failure_probability: 0.1,
            pricing: PricingConfig::default(),
            reputation: ReputationPolicy::AUTHORITATIVE,
            processing_delay: (Duration::from_millis(50), Duration::from_millis(200)),
            poll_timeout: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(2),
            status_interval: Duration::from_secs(5),
            pricing_interval: Duration::from_secs(10),
        }
    }
}

impl ProviderConfig {
    pub fn with_capacity(mut self, total_space_gb: u64) -> Self {
        self.total_space_gb = total_space_gb;
        self
    }

    pub fn with_base_price(mut self, price: f64) -> Self {
        self.base_price_per_gb_hour = price;
        self
    }

    pub fn with_failure_probability(mut self, p: f64) -> Self {
        self.failure_probability = p;
        self
    }

    pub fn with_pricing(mut self, pricing: PricingConfig) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn without_processing_delay(mut self) -> Self {
        self.processing_delay = (Duration::ZERO, Duration::ZERO);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.total_space_gb == 0 {
            return Err(MarketError::InvalidConfig("provider capacity must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.failure_probability) {
            return Err(MarketError::InvalidConfig(format!(
                "failure probability {} outside [0, 1]",
                self.failure_probability
            )));
        }
        if !(self.base_price_per_gb_hour >= 0.0) {
            return Err(MarketError::InvalidConfig("base price must be >= 0".into()));
        }
        if self.processing_delay.0 > self.processing_delay.1 {
            return Err(MarketError::InvalidConfig("processing delay range is inverted".into()));
        }
        Ok(())
    }
}

/// Space bookkeeping. `available + reserved() == total` after every call.
#[derive(Debug, Clone)]
pub struct CapacityLedger {
    total: u64,
    available: u64,
    active: HashMap<ContractId, StorageContract>,
}

impl CapacityLedger {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            available: total,
            active: HashMap::new(),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn available(&self) -> u64 {
        self.available
    }

    pub fn reserved(&self) -> u64 {
        self.active.values().map(|c| c.space_gb).sum()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn contains(&self, contract_id: &ContractId) -> bool {
        self.active.contains_key(contract_id)
    }

    pub fn fits(&self, space_gb: u64) -> bool {
        self.available >= space_gb
    }

    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.total - self.available) as f64 / self.total as f64
    }

    // Check and decrement happen together, no await can sit between them
    pub fn reserve(&mut self, contract: StorageContract) -> std::result::Result<(), FailureReason> {
        if !self.fits(contract.space_gb) || self.active.contains_key(&contract.contract_id) {
            return Err(FailureReason::InsufficientSpace);
        }
        self.available -= contract.space_gb;
        self.active.insert(contract.contract_id, contract.with_status(ContractStatus::Active));
        Ok(())
    }

    /// Releases every contract with `now >= end_time`, returning them completed.
    pub fn sweep(&mut self, now: f64) -> Vec<StorageContract> {
        let expired: Vec<ContractId> = self
            .active
            .values()
            .filter(|c| c.is_expired(now))
            .map(|c| c.contract_id)
            .collect();

        let mut released = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(contract) = self.active.remove(&id) {
                self.available = (self.available + contract.space_gb).min(self.total);
                released.push(contract.with_status(ContractStatus::Completed));
            }
        }
        released
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub provider_id: AgentId,
    pub requests_received: u64,
    pub requests_accepted: u64,
    pub requests_rejected: u64,
    pub total_earnings: f64,
    pub uptime: f64,
    pub utilization: f64,
    pub contracts_completed: u64,
    pub reputation: f64,
    pub price_per_gb_hour: f64,
    pub total_space_gb: u64,
    pub available_space_gb: u64,
    pub active_contracts: usize,
}

#[derive(Debug)]
struct ProviderState {
    ledger: CapacityLedger,
    reputation: Reputation,
    price: f64,
    requests_received: u64,
    requests_accepted: u64,
    requests_rejected: u64,
    earnings: f64,
    contracts_completed: u64,
}

pub struct Provider {
    id: AgentId,
    broker_id: AgentId,
    bus: MessageBus,
    config: ProviderConfig,
    pricing: Box<dyn PricingStrategy>,
    state: Mutex<ProviderState>,
    shutdown: CancellationToken,
    started_at: f64,
}

impl Provider {
    pub fn new(
        id: impl Into<AgentId>,
        broker_id: impl Into<AgentId>,
        bus: MessageBus,
        config: ProviderConfig,
    ) -> Result<Self> {
        config.validate()?;
        let pricing = config.pricing.build().ok_or_else(|| {
            MarketError::InvalidConfig(format!("unknown pricing strategy: {}", config.pricing.strategy))
        })?;

        let id = id.into();
        bus.register(&id)?;

        let state = ProviderState {
            ledger: CapacityLedger::new(config.total_space_gb),
            reputation: Reputation::new(config.reputation),
            price: config.base_price_per_gb_hour,
            requests_received: 0,
            requests_accepted: 0,
            requests_rejected: 0,
            earnings: 0.0,
            contracts_completed: 0,
        };

        Ok(Self {
            started_at: bus.clock().now(),
            id,
            broker_id: broker_id.into(),
            bus,
            config,
            pricing,
            state: Mutex::new(state),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        if let Err(e) = self.register_with_broker().await {
            warn!("Provider {} could not register with {}: {}", self.id, self.broker_id, e);
        }

        info!(
            "Provider {} started: {}GB at ${:.3}/GB/h ({} pricing)",
            self.id,
            self.config.total_space_gb,
            self.current_price(),
            self.pricing.name()
        );

        vec![
            tokio::spawn(self.clone().request_loop()),
            tokio::spawn(self.clone().sweep_loop()),
            tokio::spawn(self.clone().status_loop()),
            tokio::spawn(self.clone().pricing_loop()),
        ]
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
        info!("Provider {} stopped", self.id);
    }

    pub fn info(&self) -> ProviderInfo {
        let state = self.state.lock();
        ProviderInfo {
            agent_id: self.id.clone(),
            total_space_gb: state.ledger.total(),
            available_space_gb: state.ledger.available(),
            reputation: state.reputation.score(),
            price_per_gb_hour: state.price,
            last_seen: self.bus.clock().now(),
            success_count: state.reputation.successes(),
            failure_count: state.reputation.failures(),
        }
    }

    async fn register_with_broker(&self) -> Result<()> {
        let info = self.info();
        self.bus
            .send(&self.id, &self.broker_id, Message::ProviderRegistration(info))
            .await?;
        debug!("Provider {} registered with {}", self.id, self.broker_id);
        Ok(())
    }

    async fn request_loop(self: Arc<Self>) {
        while !self.shutdown.is_cancelled() {
            match self.bus.receive(&self.id, self.config.poll_timeout).await {
                Ok(Some(envelope)) => self.handle_envelope(envelope).await,
                Ok(None) => {}
                Err(e) => {
                    warn!("Provider {} receive failed: {}", self.id, e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_envelope(&self, envelope: Envelope) {
        if let Err(e) = envelope.body.validate() {
            warn!("Provider {} dropping message from {}: {}", self.id, envelope.from, e);
            return;
        }

        match envelope.body {
            Message::AllocationRequest { request_id, contract } => {
                let delay = {
                    let (min, max) = self.config.processing_delay;
                    if max > min { thread_rng().gen_range(min..=max) } else { min }
                };
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                let decision = self.admit(request_id, contract);
                let response = Message::AllocationResponse(AllocationResponse {
                    request_id,
                    provider_id: self.id.clone(),
                    decision,
                });
                self.dispatch(envelope.from, response);
            }
            other => {
                warn!("Provider {}: {}", self.id, other.unexpected(&self.id));
            }
        }
    }

    /// Admission test: enough free space and a successful reliability draw.
    ///
    /// The whole decision runs under one lock, so concurrent requests can never
    /// overcommit the ledger.
    pub fn admit(&self, request_id: RequestId, contract: StorageContract) -> AllocationDecision {
        let metrics = self.bus.metrics();
        let mut state = self.state.lock();
        state.requests_received += 1;

        let space = contract.space_gb;
        let contract_id = contract.contract_id;
        let cost = contract.total_cost;
        let fits = state.ledger.fits(space);
        let failed = fits && thread_rng().gen_bool(self.config.failure_probability);

        let decision = if fits && !failed {
            match state.ledger.reserve(contract) {
                Ok(()) => {
                    state.requests_accepted += 1;
                    state.earnings += cost;
                    state.reputation.record(true);
                    info!(
                        "Provider {} accepted contract {} ({}GB, ${:.2})",
                        self.id, contract_id, space, cost
                    );
                    AllocationDecision::Accepted { contract_id }
                }
                Err(reason) => {
                    state.requests_rejected += 1;
                    state.reputation.record(false);
                    AllocationDecision::Rejected { reason }
                }
            }
        } else {
            state.requests_rejected += 1;
            state.reputation.record(false);
            let reason = if fits {
                metrics.record_network_event(NetworkEvent::ProviderFailure);
                FailureReason::ProviderFailure
            } else {
                FailureReason::InsufficientSpace
            };
            info!("Provider {} rejected request {}: {}", self.id, request_id, reason);
            AllocationDecision::Rejected { reason }
        };

        metrics.record_provider_sample(
            &self.id,
            state.ledger.utilization(),
            state.reputation.score(),
            state.earnings,
        );
        decision
    }

    fn dispatch(&self, to: AgentId, message: Message) {
        let bus = self.bus.clone();
        let from = self.id.clone();
        tokio::spawn(async move {
            if let Err(e) = bus.send(&from, &to, message).await {
                warn!("Provider {} failed to reach {}: {}", from, to, e);
            }
        });
    }

    pub fn sweep_expired(&self) -> usize {
        let now = self.bus.clock().now();
        let mut state = self.state.lock();
        let released = state.ledger.sweep(now);
        state.contracts_completed += released.len() as u64;

        for contract in &released {
            info!(
                "Provider {} completed contract {} - released {}GB",
                self.id, contract.contract_id, contract.space_gb
            );
        }
        released.len()
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut tick = interval(self.config.sweep_interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            self.sweep_expired();
        }
    }

    pub fn status(&self) -> StatusUpdate {
        let state = self.state.lock();
        StatusUpdate {
            provider_id: self.id.clone(),
            available_space_gb: state.ledger.available(),
            utilization: state.ledger.utilization(),
            reputation: state.reputation.score(),
            price_per_gb_hour: state.price,
            active_contracts: state.ledger.active_len(),
        }
    }

    async fn status_loop(self: Arc<Self>) {
        let mut tick = interval(self.config.status_interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            let status = self.status();
            if let Err(e) = self
                .bus
                .send(&self.id, &self.broker_id, Message::StatusUpdate(status))
                .await
            {
                warn!("Provider {} status push failed: {}", self.id, e);
            }
        }
    }

    pub fn update_price(&self) -> f64 {
        let mut state = self.state.lock();
        let price = self
            .pricing
            .quote(self.config.base_price_per_gb_hour, state.ledger.utilization());
        if (price - state.price).abs() > f64::EPSILON {
            debug!("Provider {} price {:.3} -> {:.3}", self.id, state.price, price);
        }
        state.price = price;
        price
    }

    async fn pricing_loop(self: Arc<Self>) {
        let mut tick = interval(self.config.pricing_interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            self.update_price();
        }
    }

    pub fn current_price(&self) -> f64 {
        self.state.lock().price
    }

    pub fn available_space(&self) -> u64 {
        self.state.lock().ledger.available()
    }

    pub fn reputation(&self) -> f64 {
        self.state.lock().reputation.score()
    }

    pub fn holds_contract(&self, contract_id: &ContractId) -> bool {
        self.state.lock().ledger.contains(contract_id)
    }

    // available + reserved, which must always equal total
    pub fn ledger_balance(&self) -> (u64, u64, u64) {
        let state = self.state.lock();
        (state.ledger.available(), state.ledger.reserved(), state.ledger.total())
    }

    pub fn stats(&self) -> ProviderStats {
        let state = self.state.lock();
        ProviderStats {
            provider_id: self.id.clone(),
            requests_received: state.requests_received,
            requests_accepted: state.requests_accepted,
            requests_rejected: state.requests_rejected,
            total_earnings: state.earnings,
            uptime: self.bus.clock().now() - self.started_at,
            utilization: state.ledger.utilization(),
            contracts_completed: state.contracts_completed,
            reputation: state.reputation.score(),
            price_per_gb_hour: state.price,
            total_space_gb: state.ledger.total(),
            available_space_gb: state.ledger.available(),
            active_contracts: state.ledger.active_len(),
        }
    }
}
