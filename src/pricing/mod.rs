pub mod static_strategies;
pub mod step;

use serde::{Deserialize, Serialize};
use std::fmt;

pub trait PricingStrategy: Send + Sync + fmt::Debug {
    /// Price per GB-hour for a provider with `base` price at `utilization` in [0, 1].
    fn quote(&self, base: f64, utilization: f64) -> f64;
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    pub strategy: String,
    pub high_utilization: f64,
    pub low_utilization: f64,
    pub high_multiplier: f64,
    pub low_multiplier: f64,
    // hard limits on the multipliers above
    pub ceiling: f64,
    pub floor: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            strategy: "utilization-step".to_string(),
            high_utilization: 0.8,
            low_utilization: 0.3,
            high_multiplier: 1.5,
            low_multiplier: 0.8,
            ceiling: 2.0,
            floor: 0.5,
        }
    }
}

impl PricingConfig {
    pub fn fixed() -> Self {
        Self {
            strategy: "fixed".to_string(),
            ..Self::default()
        }
    }

    pub fn build(&self) -> Option<Box<dyn PricingStrategy>> {
        create(&self.strategy, self)
    }
}

fn fixed(_: &PricingConfig) -> Box<dyn PricingStrategy> {
    Box::new(static_strategies::Fixed)
}

fn utilization_step(config: &PricingConfig) -> Box<dyn PricingStrategy> {
    Box::new(step::UtilizationStep::from_config(config))
}

// Kept sorted by name
const STRATEGIES: &[(&str, fn(&PricingConfig) -> Box<dyn PricingStrategy>)] =
    &[("fixed", fixed), ("utilization-step", utilization_step)];

/// Builds the strategy registered under `name`, ignoring case.
pub fn create(name: &str, config: &PricingConfig) -> Option<Box<dyn PricingStrategy>> {
    STRATEGIES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
        .map(|(_, build)| build(config))
}

pub fn strategy_names() -> impl Iterator<Item = &'static str> {
    STRATEGIES.iter().map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_known_strategies_case_insensitively() {
        let config = PricingConfig::default();
        assert_eq!(create("Utilization-Step", &config).unwrap().name(), "utilization-step");
        assert_eq!(create("FIXED", &config).unwrap().name(), "fixed");
        assert!(create("auction", &config).is_none());
        assert!(create("static", &config).is_none());
    }

    #[test]
    fn every_listed_name_builds() {
        let names: Vec<&str> = strategy_names().collect();
        assert_eq!(names, ["fixed", "utilization-step"]);
        for name in names {
            assert!(create(name, &PricingConfig::default()).is_some());
        }
    }

    #[test]
    fn config_builds_its_strategy() {
        let strategy = PricingConfig::fixed().build().unwrap();
        assert_eq!(strategy.quote(0.5, 0.95), 0.5);

        let unknown = PricingConfig {
            strategy: "surge".into(),
            ..PricingConfig::default()
        };
        assert!(unknown.build().is_none());
    }
}
