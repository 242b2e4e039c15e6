use super::{PricingConfig, PricingStrategy};

// Three-tier price: surcharge when nearly full, discount when mostly empty
#[derive(Debug, Clone)]
pub struct UtilizationStep {
    high_utilization: f64,
    low_utilization: f64,
    high_multiplier: f64,
    low_multiplier: f64,
}

impl UtilizationStep {
    pub fn from_config(config: &PricingConfig) -> Self {
        Self {
            high_utilization: config.high_utilization,
            low_utilization: config.low_utilization,
            high_multiplier: config.high_multiplier.min(config.ceiling),
            low_multiplier: config.low_multiplier.max(config.floor),
        }
    }
}

impl Default for UtilizationStep {
    fn default() -> Self {
        Self::from_config(&PricingConfig::default())
    }
}

impl PricingStrategy for UtilizationStep {
    fn quote(&self, base: f64, utilization: f64) -> f64 {
        if utilization > self.high_utilization {
            base * self.high_multiplier
        } else if utilization < self.low_utilization {
            base * self.low_multiplier
        } else {
            base
        }
    }

    fn name(&self) -> &str {
        "utilization-step"
    }
}
