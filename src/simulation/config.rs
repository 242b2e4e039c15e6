use crate::broker::BrokerConfig;
use crate::buyer::BuyerConfig;
use crate::error::{MarketError, Result};
use crate::network::NetworkConfig;
use crate::provider::ProviderConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ranges each agent's parameters are drawn from, so no two agents of a run
/// behave quite the same.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationConfig {
    pub provider_capacity_gb: (u64, u64),
    pub provider_base_price: (f64, f64),
    pub provider_failure_probability: (f64, f64),
    pub buyer_budget_per_hour: (f64, f64),
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            provider_capacity_gb: (100, 300),
            provider_base_price: (0.3, 0.9),
            provider_failure_probability: (0.02, 0.12),
            buyer_budget_per_hour: (15.0, 40.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub name: String,
    pub duration: Duration,
    pub num_buyers: u32,
    pub num_providers: u32,
    /// Wall time of one contract hour.
    pub contract_hour: Duration,
    pub network: NetworkConfig,
    pub broker: BrokerConfig,
    pub buyer: BuyerConfig,
    pub provider: ProviderConfig,
    // None runs every agent on the templates above unchanged
    pub population: Option<PopulationConfig>,
    pub startup_stagger: Duration,
    pub drain: Duration,
    pub show_progress: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            name: "storenet".to_string(),
            duration: Duration::from_secs(60),
            num_buyers: 5,
            num_providers: 3,
            contract_hour: Duration::from_secs(10),
            network: NetworkConfig::default(),
            broker: BrokerConfig::default(),
            buyer: BuyerConfig::default(),
            provider: ProviderConfig::default(),
            population: Some(PopulationConfig::default()),
            startup_stagger: Duration::from_millis(500),
            drain: Duration::from_secs(2),
            show_progress: false,
        }
    }
}

impl SimConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_agents(mut self, num_buyers: u32, num_providers: u32) -> Self {
        self.num_buyers = num_buyers;
        self.num_providers = num_providers;
        self
    }

    pub fn with_contract_hour(mut self, hour: Duration) -> Self {
        self.contract_hour = hour;
        self
    }

    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    pub fn with_broker(mut self, broker: BrokerConfig) -> Self {
        self.broker = broker;
        self
    }

    pub fn with_buyer(mut self, buyer: BuyerConfig) -> Self {
        self.buyer = buyer;
        self
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_population(mut self, population: Option<PopulationConfig>) -> Self {
        self.population = population;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.duration.is_zero() {
            return Err(MarketError::InvalidConfig("duration must be positive".into()));
        }
        if self.contract_hour.is_zero() {
            return Err(MarketError::InvalidConfig("contract hour must be positive".into()));
        }
        if self.network.latency_min > self.network.latency_max {
            return Err(MarketError::InvalidConfig(format!(
                "latency range {:?}..{:?} is empty",
                self.network.latency_min, self.network.latency_max
            )));
        }
        self.broker.validate()?;
        self.buyer.validate()?;
        self.provider.validate()?;
        if self.provider.status_interval >= self.broker.freshness_window {
            return Err(MarketError::InvalidConfig(format!(
                "provider status interval {:?} must be shorter than the broker freshness window {:?}",
                self.provider.status_interval, self.broker.freshness_window
            )));
        }

        if let Some(population) = &self.population {
            let (cap_min, cap_max) = population.provider_capacity_gb;
            let (price_min, price_max) = population.provider_base_price;
            let (fail_min, fail_max) = population.provider_failure_probability;
            let (budget_min, budget_max) = population.buyer_budget_per_hour;

            if cap_min == 0 || cap_min > cap_max {
                return Err(MarketError::InvalidConfig(format!("bad capacity range {cap_min}..={cap_max}")));
            }
            if !(price_min > 0.0) || price_min > price_max {
                return Err(MarketError::InvalidConfig(format!("bad price range {price_min}..={price_max}")));
            }
            if !(fail_min >= 0.0) || fail_min > fail_max || fail_max > 1.0 {
                return Err(MarketError::InvalidConfig(format!("bad failure range {fail_min}..={fail_max}")));
            }
            if !(budget_min > 0.0) || budget_min > budget_max {
                return Err(MarketError::InvalidConfig(format!("bad budget range {budget_min}..={budget_max}")));
            }
        }
        Ok(())
    }
}
