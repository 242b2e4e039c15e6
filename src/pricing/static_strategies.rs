use super::PricingStrategy;

#[derive(Debug, Clone, Default)]
pub struct Fixed;

impl PricingStrategy for Fixed {
    fn quote(&self, base: f64, _utilization: f64) -> f64 {
        base
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_utilization() {
        assert_eq!(Fixed.quote(0.5, 0.0), 0.5);
        assert_eq!(Fixed.quote(0.5, 1.0), 0.5);
    }
}
