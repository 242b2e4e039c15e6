pub mod broker;
pub mod buyer;
pub mod clock;
pub mod contract;
pub mod error;
pub mod metrics;
pub mod network;
pub mod pricing;
pub mod provider;
pub mod reputation;
pub mod simulation;

pub use broker::Broker;
pub use buyer::Buyer;
pub use error::MarketError;
pub use metrics::MetricsCollector;
pub use network::MessageBus;
pub use provider::Provider;
pub use simulation::{SimConfig, Simulation};

pub mod prelude {
    pub use crate::broker::{Broker, BrokerConfig};
    pub use crate::buyer::{Buyer, BuyerConfig, RequestPattern};
    pub use crate::clock::SimClock;
    pub use crate::contract::{FailureReason, StorageContract, StorageRequest};
    pub use crate::error::{MarketError, Result};
    pub use crate::metrics::{MetricsCollector, MetricsSummary};
    pub use crate::network::{Message, MessageBus, NetworkConfig};
    pub use crate::pricing::{PricingConfig, PricingStrategy};
    pub use crate::provider::{Provider, ProviderConfig};
    pub use crate::simulation::{SimConfig, Simulation};
}
