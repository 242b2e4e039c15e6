// Broker: provider registry, request router and fault injector.
// Handlers are plain state transitions returning the message to send, the
// async loop does the actual sending.

use crate::contract::{
    AgentId, ContractStatus, FailureReason, ProviderInfo, RequestId, StatusUpdate, StorageContract,
    StorageRequest,
};
use crate::error::{MarketError, Result};
use crate::metrics::{ContractEvent, NetworkEvent};
use crate::network::{
    AllocationDecision, AllocationResponse, Envelope, Message, MessageBus, StorageResponse,
};
use crate::reputation::ReputationPolicy;
use parking_lot::Mutex;
use rand::{Rng, thread_rng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionWeights {
    pub reputation: f64,
    pub price: f64,
    pub availability: f64,
    pub success_rate: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            reputation: 0.4,
            price: 0.3,
            availability: 0.2,
            success_rate: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub corruption_probability: f64,
    pub reputation_floor: f64,
    pub freshness_window: Duration,
    pub eviction_timeout: Duration,
    pub eviction_interval: Duration,
    pub pending_timeout: Duration,
    pub poll_timeout: Duration,
    pub weights: SelectionWeights,
    pub provisional: ReputationPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            corruption_probability: 0.03,
            reputation_floor: 1.0,
            freshness_window: Duration::from_secs(30),
            eviction_timeout: Duration::from_secs(60),
            eviction_interval: Duration::from_secs(15),
            pending_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(1),
            weights: SelectionWeights::default(),
            provisional: ReputationPolicy::PROVISIONAL,
        }
    }
}

impl BrokerConfig {
    pub fn with_corruption_probability(mut self, p: f64) -> Self {
        self.corruption_probability = p;
        self
    }

    pub fn with_reputation_floor(mut self, floor: f64) -> Self {
        self.reputation_floor = floor;
        self
    }

    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.corruption_probability) {
            return Err(MarketError::InvalidConfig(format!(
                "corruption probability {} outside [0, 1]",
                self.corruption_probability
            )));
        }
        let w = self.weights;
        let sum = w.reputation + w.price + w.availability + w.success_rate;
        if [w.reputation, w.price, w.availability, w.success_rate].iter().any(|x| *x < 0.0)
            || (sum - 1.0).abs() > 1e-6
        {
            return Err(MarketError::InvalidConfig(format!(
                "selection weights must be non-negative and sum to 1, got {sum}"
            )));
        }
        if self.eviction_timeout < self.freshness_window {
            return Err(MarketError::InvalidConfig(
                "eviction timeout must not be shorter than the freshness window".into(),
            ));
        }
        Ok(())
    }
}

/// Weighted score of one candidate, every factor normalized to [0, 1].
pub fn score_provider(
    info: &ProviderInfo,
    request: &StorageRequest,
    weights: &SelectionWeights,
    reputation: &ReputationPolicy,
) -> f64 {
    let price = if request.max_price_per_gb_hour > 0.0 {
        (1.0 - info.price_per_gb_hour / request.max_price_per_gb_hour).clamp(0.0, 1.0)
    } else {
        // only free providers pass the filter here
        1.0
    };

    weights.reputation * reputation.normalize(info.reputation)
        + weights.price * price
        + weights.availability * info.availability()
        + weights.success_rate * info.success_rate()
}

pub fn is_eligible(info: &ProviderInfo, request: &StorageRequest, now: f64, config: &BrokerConfig) -> bool {
    info.available_space_gb >= request.space_gb
        && info.price_per_gb_hour <= request.max_price_per_gb_hour
        && info.reputation >= config.reputation_floor
        && now - info.last_seen < config.freshness_window.as_secs_f64()
}

/// Picks the highest scoring eligible provider. Equal scores go to the
/// lexicographically smallest provider id, whatever order `providers` is in.
pub fn select_provider<'a>(
    providers: impl IntoIterator<Item = &'a ProviderInfo>,
    request: &StorageRequest,
    now: f64,
    config: &BrokerConfig,
) -> Option<&'a ProviderInfo> {
    providers
        .into_iter()
        .filter(|info| is_eligible(info, request, now, config))
        .map(|info| (info, score_provider(info, request, &config.weights, &config.provisional)))
        .max_by(|(a, score_a), (b, score_b)| {
            score_a
                .partial_cmp(score_b)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.agent_id.cmp(&a.agent_id))
        })
        .map(|(info, _)| info)
}

#[derive(Debug, Clone)]
struct PendingAllocation {
    buyer_id: AgentId,
    request: StorageRequest,
    provider_id: AgentId,
    contract: StorageContract,
    created_at: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerStats {
    pub requests_processed: u64,
    pub successful_allocations: u64,
    pub failed_allocations: u64,
    pub corrupted_contracts: u64,
    pub timed_out_allocations: u64,
    pub active_providers: usize,
    pub total_providers_registered: usize,
    pub pending_allocations: usize,
    pub avg_response_time: f64,
}

#[derive(Debug, Default)]
struct BrokerState {
    providers: BTreeMap<AgentId, ProviderInfo>,
    ever_registered: HashSet<AgentId>,
    pending: HashMap<RequestId, PendingAllocation>,
    requests_processed: u64,
    successful_allocations: u64,
    failed_allocations: u64,
    corrupted_contracts: u64,
    timed_out_allocations: u64,
    response_time_total: f64,
    responses: u64,
}

pub type Outgoing = (AgentId, Message);

pub struct Broker {
    id: AgentId,
    bus: MessageBus,
    config: BrokerConfig,
    state: Mutex<BrokerState>,
    shutdown: CancellationToken,
}

impl Broker {
    pub fn new(id: impl Into<AgentId>, bus: MessageBus, config: BrokerConfig) -> Result<Self> {
        config.validate()?;
        let id = id.into();
        bus.register(&id)?;

        Ok(Self {
            id,
            bus,
            config,
            state: Mutex::new(BrokerState::default()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(
            "Broker {} started (corruption p={:.2}, reputation floor {:.1})",
            self.id, self.config.corruption_probability, self.config.reputation_floor
        );
        vec![
            tokio::spawn(self.clone().message_loop()),
            tokio::spawn(self.clone().housekeeping_loop()),
        ]
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
        info!("Broker {} stopped", self.id);
    }

    async fn message_loop(self: Arc<Self>) {
        while !self.shutdown.is_cancelled() {
            match self.bus.receive(&self.id, self.config.poll_timeout).await {
                Ok(Some(envelope)) => {
                    if let Some((to, message)) = self.handle_envelope(envelope) {
                        self.dispatch(to, message);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Broker {} receive failed: {}", self.id, e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub fn handle_envelope(&self, envelope: Envelope) -> Option<Outgoing> {
        if let Err(e) = envelope.body.validate() {
            warn!("Broker {} dropping message from {}: {}", self.id, envelope.from, e);
            return None;
        }

        match envelope.body {
            Message::ProviderRegistration(info) => {
                self.register_provider(info);
                None
            }
            Message::StorageRequest(request) => Some(self.route_request(&envelope.from, request)),
            Message::AllocationResponse(response) => self.resolve_allocation(&envelope.from, response),
            Message::StatusUpdate(update) => {
                self.apply_status(update);
                None
            }
            other @ (Message::AllocationRequest { .. } | Message::StorageResponse(_)) => {
                warn!("Broker {}: {}", self.id, other.unexpected(&self.id));
                None
            }
        }
    }

    fn dispatch(&self, to: AgentId, message: Message) {
        let bus = self.bus.clone();
        let from = self.id.clone();
        tokio::spawn(async move {
            if let Err(e) = bus.send(&from, &to, message).await {
                warn!("Broker {} failed to reach {}: {}", from, to, e);
            }
        });
    }

    pub fn register_provider(&self, mut info: ProviderInfo) {
        info.last_seen = self.bus.clock().now();
        let mut state = self.state.lock();
        state.ever_registered.insert(info.agent_id.clone());
        info!("Broker registered provider {} ({}GB free)", info.agent_id, info.available_space_gb);
        state.providers.insert(info.agent_id.clone(), info);
    }

    /// Authoritative refresh. Overwrites any provisional nudge made since the last push.
    pub fn apply_status(&self, update: StatusUpdate) -> bool {
        let now = self.bus.clock().now();
        let mut state = self.state.lock();
        match state.providers.get_mut(&update.provider_id) {
            Some(info) => {
                info.available_space_gb = update.available_space_gb.min(info.total_space_gb);
                info.reputation = update.reputation;
                info.price_per_gb_hour = update.price_per_gb_hour;
                info.last_seen = now;
                true
            }
            None => {
                debug!("Broker ignoring status from unregistered provider {}", update.provider_id);
                false
            }
        }
    }

    pub fn select(&self, request: &StorageRequest) -> Option<ProviderInfo> {
        let now = self.bus.clock().now();
        let state = self.state.lock();
        select_provider(state.providers.values(), request, now, &self.config).cloned()
    }

    pub fn route_request(&self, buyer_id: &str, request: StorageRequest) -> Outgoing {
        let clock = *self.bus.clock();
        let now = clock.now();
        let mut state = self.state.lock();
        state.requests_processed += 1;

        let selected = select_provider(state.providers.values(), &request, now, &self.config).cloned();
        let Some(provider) = selected else {
            state.failed_allocations += 1;
            info!("Broker found no provider for request {} from {}", request.request_id, buyer_id);
            let response = StorageResponse::failure(request.request_id, FailureReason::NoSuitableProvider);
            return (buyer_id.to_string(), Message::StorageResponse(response));
        };

        let contract = StorageContract::pending(
            &request,
            provider.agent_id.clone(),
            provider.price_per_gb_hour,
            now,
            clock.hours(1.0),
        );
        let request_id = request.request_id;
        info!("Broker forwarding request {} to {}", request_id, provider.agent_id);

        state.pending.insert(
            request_id,
            PendingAllocation {
                buyer_id: buyer_id.to_string(),
                request,
                provider_id: provider.agent_id.clone(),
                contract: contract.clone(),
                created_at: now,
            },
        );

        (provider.agent_id, Message::AllocationRequest { request_id, contract })
    }

    pub fn resolve_allocation(&self, from: &str, response: AllocationResponse) -> Option<Outgoing> {
        let now = self.bus.clock().now();
        let metrics = self.bus.metrics();
        let mut state = self.state.lock();

        match state.pending.get(&response.request_id) {
            None => {
                debug!("Broker dropping response for unknown request {}", response.request_id);
                return None;
            }
            Some(pending) if pending.provider_id != response.provider_id || pending.provider_id != from => {
                warn!(
                    "Broker got response for {} from {}, expected {}",
                    response.request_id, from, pending.provider_id
                );
                return None;
            }
            Some(_) => {}
        }
        let pending = state.pending.remove(&response.request_id)?;

        let accepted = response.decision.is_accepted();
        // provisional until the provider's next status push
        if let Some(info) = state.providers.get_mut(&pending.provider_id) {
            if accepted {
                info.success_count += 1;
            } else {
                info.failure_count += 1;
            }
            info.reputation = self.config.provisional.apply(info.reputation, accepted);
        }

        let response_time = now - pending.request.timestamp;
        state.response_time_total += response_time;
        state.responses += 1;

        let outcome = match response.decision {
            AllocationDecision::Accepted { contract_id } => {
                if contract_id != pending.contract.contract_id {
                    warn!("Provider {} echoed contract {}, keeping {}", from, contract_id, pending.contract.contract_id);
                }
                let corrupted = thread_rng().gen_bool(self.config.corruption_probability);
                if corrupted {
                    // the provider keeps its reservation, the buyer never learns it existed
                    state.corrupted_contracts += 1;
                    state.failed_allocations += 1;
                    metrics.record_network_event(NetworkEvent::Corruption);
                    metrics.record_contract(ContractEvent::Failed);
                    warn!("Broker corrupted contract for request {}", pending.request.request_id);
                    StorageResponse::failure(pending.request.request_id, FailureReason::NetworkCorruption)
                } else {
                    state.successful_allocations += 1;
                    let contract = pending.contract.with_status(ContractStatus::Active);
                    StorageResponse::success(pending.request.request_id, contract)
                }
            }
            AllocationDecision::Rejected { reason } => {
                state.failed_allocations += 1;
                StorageResponse::failure(pending.request.request_id, reason)
            }
        };

        info!(
            "Broker completed request {} in {:.2}s",
            pending.request.request_id, response_time
        );
        Some((pending.buyer_id, Message::StorageResponse(outcome)))
    }

    pub fn evict_stale(&self) -> Vec<AgentId> {
        let now = self.bus.clock().now();
        let timeout = self.config.eviction_timeout.as_secs_f64();
        let mut state = self.state.lock();

        let stale: Vec<AgentId> = state
            .providers
            .values()
            .filter(|info| now - info.last_seen > timeout)
            .map(|info| info.agent_id.clone())
            .collect();
        for id in &stale {
            state.providers.remove(id);
            info!("Broker removed inactive provider {}", id);
        }
        stale
    }

    /// Drops allocations that never got an answer and tells their buyers.
    pub fn expire_pending(&self) -> Vec<Outgoing> {
        let now = self.bus.clock().now();
        let timeout = self.config.pending_timeout.as_secs_f64();
        let mut state = self.state.lock();

        let expired: Vec<RequestId> = state
            .pending
            .iter()
            .filter(|(_, p)| now - p.created_at > timeout)
            .map(|(id, _)| *id)
            .collect();

        let mut out = Vec::with_capacity(expired.len());
        for request_id in expired {
            if let Some(pending) = state.pending.remove(&request_id) {
                state.timed_out_allocations += 1;
                state.failed_allocations += 1;
                warn!(
                    "Broker timed out request {} waiting on {}",
                    request_id, pending.provider_id
                );
                let response = StorageResponse::failure(request_id, FailureReason::Timeout);
                out.push((pending.buyer_id, Message::StorageResponse(response)));
            }
        }
        out
    }

    async fn housekeeping_loop(self: Arc<Self>) {
        let mut tick = interval(self.config.eviction_interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            self.evict_stale();
            for (to, message) in self.expire_pending() {
                self.dispatch(to, message);
            }
        }
    }

    pub fn provider_info(&self, provider_id: &str) -> Option<ProviderInfo> {
        self.state.lock().providers.get(provider_id).cloned()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn stats(&self) -> BrokerStats {
        let state = self.state.lock();
        BrokerStats {
            requests_processed: state.requests_processed,
            successful_allocations: state.successful_allocations,
            failed_allocations: state.failed_allocations,
            corrupted_contracts: state.corrupted_contracts,
            timed_out_allocations: state.timed_out_allocations,
            active_providers: state.providers.len(),
            total_providers_registered: state.ever_registered.len(),
            pending_allocations: state.pending.len(),
            avg_response_time: if state.responses == 0 {
                0.0
            } else {
                state.response_time_total / state.responses as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use crate::metrics::MetricsCollector;
    use crate::network::{NetworkConfig, StorageOutcome};

    fn info(id: &str, available: u64, reputation: f64, price: f64) -> ProviderInfo {
        ProviderInfo {
            agent_id: id.to_string(),
            total_space_gb: 100,
            available_space_gb: available,
            reputation,
            price_per_gb_hour: price,
            last_seen: 0.0,
            success_count: 0,
            failure_count: 0,
        }
    }

    fn broker(config: BrokerConfig) -> Broker {
        let bus = MessageBus::new(NetworkConfig::instant(), SimClock::default(), MetricsCollector::new());
        Broker::new("broker", bus, config).unwrap()
    }

    fn request(space_gb: u64, max_price: f64) -> StorageRequest {
        StorageRequest::new("buyer0", space_gb, 2.0, max_price, 0.0)
    }

    #[test]
    fn filter_excludes_each_constraint() {
        let config = BrokerConfig::default();
        let req = request(50, 1.0);

        assert!(is_eligible(&info("ok", 60, 5.0, 0.5), &req, 1.0, &config));
        assert!(!is_eligible(&info("small", 40, 5.0, 0.5), &req, 1.0, &config));
        assert!(!is_eligible(&info("pricey", 60, 5.0, 1.5), &req, 1.0, &config));
        assert!(!is_eligible(&info("shady", 60, 0.5, 0.5), &req, 1.0, &config));
        assert!(!is_eligible(&info("stale", 60, 5.0, 0.5), &req, 31.0, &config));
    }

    #[test]
    fn score_combines_weighted_factors() {
        let mut p = info("p", 50, 10.0, 0.5);
        p.success_count = 3;
        p.failure_count = 1;
        let score = score_provider(
            &p,
            &request(10, 1.0),
            &SelectionWeights::default(),
            &ReputationPolicy::PROVISIONAL,
        );
        // 0.4*1.0 + 0.3*0.5 + 0.2*0.5 + 0.1*0.75
        assert!((score - 0.725).abs() < 1e-9);
    }

    #[test]
    fn selection_prefers_better_provider() {
        let providers = vec![info("a", 60, 3.0, 0.9), info("b", 90, 8.0, 0.3), info("c", 70, 5.0, 0.6)];
        let chosen = select_provider(&providers, &request(50, 1.0), 1.0, &BrokerConfig::default()).unwrap();
        assert_eq!(chosen.agent_id, "b");
    }

    #[test]
    fn ties_go_to_smallest_id_regardless_of_order() {
        let config = BrokerConfig::default();
        let req = request(10, 1.0);
        let forward = vec![info("p1", 80, 5.0, 0.5), info("p0", 80, 5.0, 0.5), info("p2", 80, 5.0, 0.5)];
        let mut reversed = forward.clone();
        reversed.reverse();

        for _ in 0..10 {
            assert_eq!(select_provider(&forward, &req, 1.0, &config).unwrap().agent_id, "p0");
            assert_eq!(select_provider(&reversed, &req, 1.0, &config).unwrap().agent_id, "p0");
        }
    }

    #[test]
    fn zero_max_price_only_matches_free_providers() {
        let providers = vec![info("free", 80, 5.0, 0.0), info("paid", 80, 9.0, 0.1)];
        let chosen = select_provider(&providers, &request(10, 0.0), 1.0, &BrokerConfig::default()).unwrap();
        assert_eq!(chosen.agent_id, "free");
    }

    #[test]
    fn routes_to_provider_with_pending_contract() {
        let broker = broker(BrokerConfig::default());
        broker.register_provider(info("provider0", 100, 5.0, 0.5));

        let req = request(50, 1.0);
        let (to, message) = broker.route_request("buyer0", req.clone());
        assert_eq!(to, "provider0");
        match message {
            Message::AllocationRequest { request_id, contract } => {
                assert_eq!(request_id, req.request_id);
                assert_eq!(contract.status, ContractStatus::Pending);
                assert_eq!(contract.total_cost, 50.0);
                assert!(contract.price_per_gb_hour <= req.max_price_per_gb_hour);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(broker.pending_len(), 1);
    }

    #[test]
    fn no_provider_fails_immediately() {
        let broker = broker(BrokerConfig::default());
        broker.register_provider(info("provider0", 100, 5.0, 0.5));

        let req = request(500, 1.0);
        let (to, message) = broker.route_request("buyer0", req.clone());
        assert_eq!(to, "buyer0");
        assert_eq!(
            message,
            Message::StorageResponse(StorageResponse::failure(req.request_id, FailureReason::NoSuitableProvider))
        );
        assert_eq!(broker.pending_len(), 0);
        assert_eq!(broker.stats().failed_allocations, 1);
    }

    fn accept(broker: &Broker, provider: &str, req: &StorageRequest) -> Option<Outgoing> {
        broker.resolve_allocation(
            provider,
            AllocationResponse {
                request_id: req.request_id,
                provider_id: provider.to_string(),
                decision: AllocationDecision::Accepted { contract_id: RequestId::nil() },
            },
        )
    }

    #[test]
    fn accepted_response_is_relayed_once() {
        let broker = broker(BrokerConfig::default().with_corruption_probability(0.0));
        broker.register_provider(info("provider0", 100, 5.0, 0.5));
        let req = request(50, 1.0);
        broker.route_request("buyer0", req.clone());

        let (to, message) = accept(&broker, "provider0", &req).unwrap();
        assert_eq!(to, "buyer0");
        match message {
            Message::StorageResponse(StorageResponse {
                outcome: StorageOutcome::Success { contract },
                ..
            }) => {
                assert_eq!(contract.status, ContractStatus::Active);
                assert_eq!(contract.total_cost, contract.space_gb as f64 * contract.duration_hours * contract.price_per_gb_hour);
            }
            other => panic!("unexpected {other:?}"),
        }

        // duplicate response is dropped
        assert!(accept(&broker, "provider0", &req).is_none());
        assert_eq!(broker.pending_len(), 0);

        let cached = broker.provider_info("provider0").unwrap();
        assert_eq!(cached.success_count, 1);
        assert!((cached.reputation - 5.05).abs() < 1e-9);
    }

    #[test]
    fn response_from_wrong_provider_is_ignored() {
        let broker = broker(BrokerConfig::default());
        broker.register_provider(info("provider0", 100, 5.0, 0.5));
        let req = request(50, 1.0);
        broker.route_request("buyer0", req.clone());

        assert!(accept(&broker, "provider9", &req).is_none());
        assert_eq!(broker.pending_len(), 1);
    }

    #[test]
    fn certain_corruption_turns_acceptance_into_failure() {
        let broker = broker(BrokerConfig::default().with_corruption_probability(1.0));
        broker.register_provider(info("provider0", 100, 5.0, 0.5));
        let req = request(50, 1.0);
        broker.route_request("buyer0", req.clone());

        let (_, message) = accept(&broker, "provider0", &req).unwrap();
        assert_eq!(
            message,
            Message::StorageResponse(StorageResponse::failure(req.request_id, FailureReason::NetworkCorruption))
        );
        assert_eq!(broker.stats().corrupted_contracts, 1);
        assert_eq!(broker.bus.metrics().summary().network.corruptions, 1);
    }

    #[test]
    fn status_push_overrides_provisional_nudge() {
        let broker = broker(BrokerConfig::default());
        broker.register_provider(info("provider0", 100, 5.0, 0.5));
        let req = request(50, 1.0);
        broker.route_request("buyer0", req.clone());
        broker.resolve_allocation(
            "provider0",
            AllocationResponse {
                request_id: req.request_id,
                provider_id: "provider0".into(),
                decision: AllocationDecision::Rejected { reason: FailureReason::ProviderFailure },
            },
        );
        assert!((broker.provider_info("provider0").unwrap().reputation - 4.95).abs() < 1e-9);

        assert!(broker.apply_status(StatusUpdate {
            provider_id: "provider0".into(),
            available_space_gb: 100,
            utilization: 0.0,
            reputation: 4.9,
            price_per_gb_hour: 0.4,
            active_contracts: 0,
        }));
        let cached = broker.provider_info("provider0").unwrap();
        assert_eq!(cached.reputation, 4.9);
        assert_eq!(cached.price_per_gb_hour, 0.4);
        assert_eq!(cached.failure_count, 1);
    }

    #[test]
    fn status_from_unknown_provider_is_ignored() {
        let broker = broker(BrokerConfig::default());
        assert!(!broker.apply_status(StatusUpdate {
            provider_id: "ghost".into(),
            available_space_gb: 1,
            utilization: 0.0,
            reputation: 5.0,
            price_per_gb_hour: 0.1,
            active_contracts: 0,
        }));
        assert!(broker.provider_info("ghost").is_none());
    }

    #[test]
    fn rejects_bad_weights() {
        let bus = MessageBus::new(NetworkConfig::instant(), SimClock::default(), MetricsCollector::new());
        let config = BrokerConfig {
            weights: SelectionWeights { reputation: 1.0, price: 1.0, availability: 0.0, success_rate: 0.0 },
            ..BrokerConfig::default()
        };
        assert!(matches!(Broker::new("broker", bus, config), Err(MarketError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn accept_after_timeout_is_not_relayed() {
        let broker = broker(BrokerConfig::default().with_corruption_probability(0.0));
        broker.register_provider(info("provider0", 100, 5.0, 0.5));
        let req = request(50, 1.0);
        broker.route_request("buyer0", req.clone());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(broker.expire_pending().len(), 1);

        // the buyer already has its timeout, so the provider's reservation stays unreconciled
        assert!(accept(&broker, "provider0", &req).is_none());
        let stats = broker.stats();
        assert_eq!(stats.successful_allocations, 0);
        assert_eq!(stats.timed_out_allocations, 1);
        assert_eq!(stats.failed_allocations, 1);
        assert_eq!(broker.provider_info("provider0").unwrap().success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_providers_and_pending_allocations_expire() {
        let broker = broker(BrokerConfig::default());
        broker.register_provider(info("provider0", 100, 5.0, 0.5));
        broker.register_provider(info("provider1", 100, 5.0, 0.5));
        let req = request(50, 1.0);
        broker.route_request("buyer0", req.clone());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(broker.select(&request(10, 1.0)).is_none());

        let timed_out = broker.expire_pending();
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].0, "buyer0");
        assert_eq!(
            timed_out[0].1,
            Message::StorageResponse(StorageResponse::failure(req.request_id, FailureReason::Timeout))
        );
        assert!(broker.expire_pending().is_empty());

        broker.apply_status(StatusUpdate {
            provider_id: "provider1".into(),
            available_space_gb: 100,
            utilization: 0.0,
            reputation: 5.0,
            price_per_gb_hour: 0.5,
            active_contracts: 0,
        });
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(broker.evict_stale(), vec!["provider0".to_string()]);
        assert!(broker.provider_info("provider1").is_some());
        assert_eq!(broker.stats().total_providers_registered, 2);
        assert_eq!(broker.stats().active_providers, 1);
    }
}
