use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};

pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    Statistics::mean(samples.iter())
}

// Sample standard deviation, 0 below two samples
pub fn stdev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    Statistics::std_dev(samples.iter())
}

pub fn median(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut data = Data::new(samples.to_vec());
    data.median()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Descriptive {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

impl Descriptive {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        Self {
            mean: mean(samples),
            std: stdev(samples),
            min: Statistics::min(samples.iter()),
            max: Statistics::max(samples.iter()),
            median: median(samples),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_samples_are_zero() {
        assert_eq!(Descriptive::from_samples(&[]), Descriptive::default());
        assert_eq!(stdev(&[4.0]), 0.0);
    }

    #[test]
    fn describes_odd_and_even_samples() {
        let odd = Descriptive::from_samples(&[3.0, 1.0, 2.0]);
        assert_eq!(odd.mean, 2.0);
        assert_eq!(odd.std, 1.0);
        assert_eq!(odd.min, 1.0);
        assert_eq!(odd.max, 3.0);
        assert_eq!(odd.median, 2.0);

        let even = Descriptive::from_samples(&[4.0, 1.0, 3.0, 2.0]);
        assert_eq!(even.median, 2.5);
        assert!((even.std - 1.2909944487358056).abs() < 1e-12);
    }
}
