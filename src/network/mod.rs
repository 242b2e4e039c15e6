pub mod message;

pub use message::{
    AllocationDecision, AllocationResponse, Envelope, Message, MessageId, StorageOutcome,
    StorageResponse,
};

use crate::clock::SimClock;
use crate::error::{MarketError, Result};
use crate::metrics::{MetricsCollector, NetworkEvent};
use dashmap::DashMap;
use rand::{Rng, thread_rng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub latency_min: Duration,
    pub latency_max: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency_min: Duration::from_millis(50),
            latency_max: Duration::from_millis(500),
        }
    }
}

impl NetworkConfig {
    pub fn instant() -> Self {
        Self {
            latency_min: Duration::ZERO,
            latency_max: Duration::ZERO,
        }
    }

    fn draw_latency(&self) -> Duration {
        if self.latency_max <= self.latency_min {
            return self.latency_min;
        }
        thread_rng().gen_range(self.latency_min..=self.latency_max)
    }
}

struct Mailbox {
    tx: mpsc::UnboundedSender<Envelope>,
    // receive() may be called from several tasks of one agent
    rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    depth: AtomicUsize,
}

/// In-process message bus with one unbounded FIFO inbox per agent.
///
/// Cloning is cheap, every clone talks to the same set of inboxes.
#[derive(Clone)]
pub struct MessageBus {
    mailboxes: Arc<DashMap<String, Arc<Mailbox>>>,
    next_id: Arc<AtomicU64>,
    config: NetworkConfig,
    clock: SimClock,
    metrics: MetricsCollector,
}

impl MessageBus {
    pub fn new(config: NetworkConfig, clock: SimClock, metrics: MetricsCollector) -> Self {
        Self {
            mailboxes: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
            config,
            clock,
            metrics,
        }
    }

    /// Registering an id twice is an error, the first inbox is kept.
    pub fn register(&self, agent_id: &str) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.mailboxes.entry(agent_id.to_string()) {
            Entry::Occupied(_) => Err(MarketError::DuplicateAgent(agent_id.to_string())),
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::unbounded_channel();
                slot.insert(Arc::new(Mailbox {
                    tx,
                    rx: Mutex::new(rx),
                    depth: AtomicUsize::new(0),
                }));
                debug!("Registered agent {}", agent_id);
                Ok(())
            }
        }
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.mailboxes.contains_key(agent_id)
    }

    pub async fn send(&self, from: &str, to: &str, message: Message) -> Result<MessageId> {
        self.deliver(from, to, message, true).await
    }

    pub async fn send_immediate(&self, from: &str, to: &str, message: Message) -> Result<MessageId> {
        self.deliver(from, to, message, false).await
    }

    /// Decodes `raw` at the boundary and sends the typed message.
    pub async fn send_json(&self, from: &str, to: &str, raw: &str) -> Result<MessageId> {
        let message = Message::from_json(raw)?;
        self.send(from, to, message).await
    }

    async fn deliver(
        &self,
        from: &str,
        to: &str,
        message: Message,
        simulate_latency: bool,
    ) -> Result<MessageId> {
        if !self.is_registered(to) {
            warn!("Agent {} not registered, dropping {} from {}", to, message.kind(), from);
            return Err(MarketError::UnknownRecipient(to.to_string()));
        }

        let sent_at = self.clock.now();
        let latency = if simulate_latency {
            let latency = self.config.draw_latency();
            tokio::time::sleep(latency).await;
            self.metrics
                .record_network_event(NetworkEvent::Latency(latency.as_secs_f64()));
            latency
        } else {
            Duration::ZERO
        };

        // Arc clone so no map guard is held while the channel is touched
        let mailbox = self
            .mailboxes
            .get(to)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MarketError::UnknownRecipient(to.to_string()))?;

        let id = MessageId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let kind = message.kind();
        let envelope = Envelope {
            id,
            from: from.to_string(),
            to: to.to_string(),
            body: message,
            sent_at,
            latency,
        };

        mailbox.depth.fetch_add(1, Ordering::Relaxed);
        if mailbox.tx.send(envelope).is_err() {
            mailbox.depth.fetch_sub(1, Ordering::Relaxed);
            return Err(MarketError::UnknownRecipient(to.to_string()));
        }

        debug!("{} -> {}: {} #{} ({:?})", from, to, kind, id.value(), latency);
        Ok(id)
    }

    /// Waits up to `timeout` for the next envelope, `None` when it expires.
    pub async fn receive(&self, agent_id: &str, timeout: Duration) -> Result<Option<Envelope>> {
        let mailbox = self
            .mailboxes
            .get(agent_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MarketError::UnknownRecipient(agent_id.to_string()))?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut rx = match tokio::time::timeout_at(deadline, mailbox.rx.lock()).await {
            Ok(rx) => rx,
            Err(_) => return Ok(None),
        };

        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(envelope)) => {
                mailbox.depth.fetch_sub(1, Ordering::Relaxed);
                Ok(Some(envelope))
            }
            Ok(None) | Err(_) => Ok(None),
        }
    }

    pub fn pending(&self, agent_id: &str) -> usize {
        self.mailboxes
            .get(agent_id)
            .map(|entry| entry.depth.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::StatusUpdate;

    fn bus(config: NetworkConfig) -> MessageBus {
        MessageBus::new(config, SimClock::default(), MetricsCollector::new())
    }

    fn status(provider: &str, available: u64) -> Message {
        Message::StatusUpdate(StatusUpdate {
            provider_id: provider.to_string(),
            available_space_gb: available,
            utilization: 0.0,
            reputation: 5.0,
            price_per_gb_hour: 0.5,
            active_contracts: 0,
        })
    }

    #[tokio::test]
    async fn register_twice_fails() {
        let bus = bus(NetworkConfig::instant());
        bus.register("broker").unwrap();
        assert_eq!(
            bus.register("broker"),
            Err(MarketError::DuplicateAgent("broker".into()))
        );
    }

    #[tokio::test]
    async fn send_to_unknown_recipient_fails_without_enqueue() {
        let bus = bus(NetworkConfig::instant());
        bus.register("provider0").unwrap();

        let err = bus.send("provider0", "broker", status("provider0", 1)).await.unwrap_err();
        assert_eq!(err, MarketError::UnknownRecipient("broker".into()));
        assert_eq!(bus.pending("provider0"), 0);
    }

    #[tokio::test]
    async fn inbox_is_fifo_with_increasing_ids() {
        let bus = bus(NetworkConfig::instant());
        bus.register("broker").unwrap();

        for available in 0..5 {
            bus.send_immediate("provider0", "broker", status("provider0", available))
                .await
                .unwrap();
        }
        assert_eq!(bus.pending("broker"), 5);

        let mut last_id = None;
        for expected in 0..5 {
            let envelope = bus
                .receive("broker", Duration::from_millis(10))
                .await
                .unwrap()
                .unwrap();
            match envelope.body {
                Message::StatusUpdate(update) => assert_eq!(update.available_space_gb, expected),
                other => panic!("unexpected {other:?}"),
            }
            assert!(last_id.is_none_or(|id| envelope.id > id));
            last_id = Some(envelope.id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn receive_times_out_with_none() {
        let bus = bus(NetworkConfig::instant());
        bus.register("buyer0").unwrap();

        let start = tokio::time::Instant::now();
        let got = bus.receive("buyer0", Duration::from_secs(1)).await.unwrap();
        assert!(got.is_none());
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_drawn_from_range_and_recorded() {
        let metrics = MetricsCollector::new();
        let bus = MessageBus::new(NetworkConfig::default(), SimClock::default(), metrics.clone());
        bus.register("broker").unwrap();

        let start = tokio::time::Instant::now();
        bus.send("provider0", "broker", status("provider0", 1)).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(50) && waited <= Duration::from_millis(501));

        let envelope = bus.receive("broker", Duration::from_secs(1)).await.unwrap().unwrap();
        assert!(envelope.latency >= Duration::from_millis(50));
        assert!(metrics.summary().network.avg_latency > 0.0);
    }

    #[tokio::test]
    async fn send_json_decodes_at_the_boundary() {
        let bus = bus(NetworkConfig::instant());
        bus.register("broker").unwrap();

        let err = bus
            .send_json("buyer0", "broker", r#"{"type":"bogus"}"#)
            .await
            .unwrap_err();
        assert_eq!(err, MarketError::UnknownMessageType("bogus".into()));
        assert_eq!(bus.pending("broker"), 0);

        let raw = status("provider0", 7).to_json().unwrap();
        bus.send_json("provider0", "broker", &raw).await.unwrap();
        assert_eq!(bus.pending("broker"), 1);
    }
}
