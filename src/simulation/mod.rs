pub mod config;
pub use config::{PopulationConfig, SimConfig};

use crate::broker::{Broker, BrokerStats};
use crate::buyer::{Buyer, BuyerConfig, BuyerStats};
use crate::clock::SimClock;
use crate::metrics::analyzer::Descriptive;
use crate::metrics::{MetricsCollector, MetricsSummary};
use crate::network::MessageBus;
use crate::provider::{Provider, ProviderConfig, ProviderStats};
use anyhow::Result;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{Rng, thread_rng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{error, info, warn};

pub const BROKER_ID: &str = "broker";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Economics {
    pub total_provider_earnings: f64,
    pub total_buyer_spending: f64,
    /// Earnings over spending, 0 when nothing was spent.
    pub economic_efficiency: f64,
}

impl Economics {
    pub fn from_stats(providers: &[ProviderStats], buyers: &[BuyerStats]) -> Self {
        let earnings: f64 = providers.iter().map(|p| p.total_earnings).sum();
        let spending: f64 = buyers.iter().map(|b| b.total_spent).sum();
        Self {
            total_provider_earnings: earnings,
            total_buyer_spending: spending,
            economic_efficiency: if spending > 0.0 { earnings / spending } else { 0.0 },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub summary: MetricsSummary,
    pub broker: BrokerStats,
    pub providers: Vec<ProviderStats>,
    pub buyers: Vec<BuyerStats>,
    pub economics: Economics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloReport {
    pub iterations: usize,
    pub success_rate: Descriptive,
    pub response_time: Descriptive,
    pub utilization: Descriptive,
    pub economic_efficiency: Descriptive,
    pub total_corruptions: u64,
    pub runs: Vec<RunReport>,
}

impl MonteCarloReport {
    pub fn from_runs(runs: Vec<RunReport>) -> Self {
        let collect = |f: fn(&RunReport) -> f64| runs.iter().map(f).collect::<Vec<f64>>();

        Self {
            iterations: runs.len(),
            success_rate: Descriptive::from_samples(&collect(|r| r.summary.requests.success_rate)),
            response_time: Descriptive::from_samples(&collect(|r| r.summary.requests.avg_response_time)),
            utilization: Descriptive::from_samples(&collect(|r| r.summary.providers.avg_utilization)),
            economic_efficiency: Descriptive::from_samples(&collect(|r| r.economics.economic_efficiency)),
            total_corruptions: runs.iter().map(|r| r.summary.network.corruptions).sum(),
            runs,
        }
    }
}

pub struct Simulation {
    config: SimConfig,
    metrics: MetricsCollector,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    fn provider_config(&self) -> ProviderConfig {
        let mut config = self.config.provider.clone();
        if let Some(population) = &self.config.population {
            let mut rng = thread_rng();
            let (cap_min, cap_max) = population.provider_capacity_gb;
            let (price_min, price_max) = population.provider_base_price;
            let (fail_min, fail_max) = population.provider_failure_probability;
            config.total_space_gb = rng.gen_range(cap_min..=cap_max);
            config.base_price_per_gb_hour = rng.gen_range(price_min..=price_max);
            config.failure_probability = rng.gen_range(fail_min..=fail_max);
        }
        config
    }

    fn buyer_config(&self) -> BuyerConfig {
        let mut config = self.config.buyer.clone();
        if let Some(population) = &self.config.population {
            let (budget_min, budget_max) = population.buyer_budget_per_hour;
            config.budget_per_hour = thread_rng().gen_range(budget_min..=budget_max);
        }
        config
    }

    pub async fn run(&self) -> Result<RunReport> {
        self.config.validate()?;
        let started_at = Utc::now();

        info!("Starting simulation: {}", self.config.name);
        info!(
            "Duration: {:?}, Buyers: {}, Providers: {}, contract hour: {:?}",
            self.config.duration, self.config.num_buyers, self.config.num_providers, self.config.contract_hour
        );

        let clock = SimClock::new(self.config.contract_hour);
        let bus = MessageBus::new(self.config.network.clone(), clock, self.metrics.clone());
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        let broker = Arc::new(Broker::new(BROKER_ID, bus.clone(), self.config.broker.clone())?);
        handles.extend(broker.start());

        let mut providers = Vec::with_capacity(self.config.num_providers as usize);
        for i in 0..self.config.num_providers {
            let provider = Arc::new(Provider::new(
                format!("provider{i}"),
                BROKER_ID,
                bus.clone(),
                self.provider_config(),
            )?);
            handles.extend(provider.start().await);
            providers.push(provider);
            sleep(self.config.startup_stagger).await;
        }

        let mut buyers = Vec::with_capacity(self.config.num_buyers as usize);
        for i in 0..self.config.num_buyers {
            let buyer = Arc::new(Buyer::new(format!("buyer{i}"), BROKER_ID, bus.clone(), self.buyer_config())?);
            handles.extend(buyer.start());
            buyers.push(buyer);
            sleep(self.config.startup_stagger).await;
        }

        let secs = self.config.duration.as_secs().max(1);
        let pb = if self.config.show_progress {
            ProgressBar::new(secs)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}s {msg}")?
                .progress_chars("█▓░"),
        );

        let step = self.config.duration / secs as u32;
        let mut tick = interval(step);
        tick.tick().await;
        for _ in 0..secs {
            tick.tick().await;
            pb.inc(1);

            let summary = self.metrics.summary();
            pb.set_message(format!(
                "Success: {:.1}% | Contracts: {}",
                summary.requests.success_rate * 100.0,
                summary.contracts.created
            ));
        }
        pb.finish_with_message("Simulation complete");

        info!("Shutting down simulation..");
        for buyer in &buyers {
            buyer.stop();
        }
        // let in-flight allocations land before the other side goes away
        sleep(self.config.drain).await;
        for provider in &providers {
            provider.stop();
        }
        broker.stop();

        for handle in handles {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Agent task failed: {}", e),
                Err(_) => warn!("Agent task did not stop within 2s"),
            }
        }

        let provider_stats: Vec<ProviderStats> = providers.iter().map(|p| p.stats()).collect();
        let buyer_stats: Vec<BuyerStats> = buyers.iter().map(|b| b.stats()).collect();
        let report = RunReport {
            name: self.config.name.clone(),
            started_at,
            summary: self.metrics.summary(),
            broker: broker.stats(),
            economics: Economics::from_stats(&provider_stats, &buyer_stats),
            providers: provider_stats,
            buyers: buyer_stats,
        };

        info!(
            "Requests: {} ({:.1}% ok), contracts: {}, corruptions: {}",
            report.summary.requests.total,
            report.summary.requests.success_rate * 100.0,
            report.summary.contracts.created,
            report.summary.network.corruptions
        );
        Ok(report)
    }
}

pub async fn run_single_simulation(duration: Duration, num_buyers: u32, num_providers: u32) -> Result<RunReport> {
    let config = SimConfig::default()
        .with_duration(duration)
        .with_agents(num_buyers, num_providers);
    Simulation::new(config).run().await
}

pub async fn run_monte_carlo(
    iterations: u32,
    duration_per_iteration: Duration,
    num_buyers: u32,
    num_providers: u32,
) -> Result<MonteCarloReport> {
    let base = SimConfig::default()
        .with_duration(duration_per_iteration)
        .with_agents(num_buyers, num_providers);
    run_monte_carlo_with(base, iterations).await
}

/// Runs `iterations` independent simulations of `base`. Iterations that fail are
/// logged and left out of the statistics.
pub async fn run_monte_carlo_with(base: SimConfig, iterations: u32) -> Result<MonteCarloReport> {
    base.validate()?;
    info!("Starting Monte Carlo analysis: {} iterations", iterations);

    let pb = if base.show_progress {
        ProgressBar::new(iterations as u64)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} runs {msg}")?
            .progress_chars("█▓░"),
    );

    let mut runs = Vec::with_capacity(iterations as usize);
    for i in 0..iterations {
        let config = base
            .clone()
            .with_name(format!("{}_{}", base.name, i + 1))
            .with_progress(false);

        match Simulation::new(config).run().await {
            Ok(report) => runs.push(report),
            Err(e) => error!("Iteration {} failed: {:#}", i + 1, e),
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");

    let report = MonteCarloReport::from_runs(runs);
    info!(
        "Monte Carlo: {}/{} runs, success rate {:.3} ± {:.3}",
        report.iterations, iterations, report.success_rate.mean, report.success_rate.std
    );
    Ok(report)
}
