// Copyright 2025 Servus Altissimi (Pseudonym)

// Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the "Software"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use storenet::pricing;
use storenet::simulation::{MonteCarloReport, RunReport, SimConfig, Simulation, run_monte_carlo_with};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::{Duration, Instant};
use tracing::{Level, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    Run {
        #[arg(short, long, default_value_t = 60)]
        duration: u64,
        #[arg(short, long, default_value_t = 5)]
        buyers: u32,
        #[arg(short, long, default_value_t = 3)]
        providers: u32,
        /// Seconds of wall time per contract hour
        #[arg(long, default_value_t = 10.0)]
        contract_hour: f64,
    },

    MonteCarlo {
        #[arg(short, long, default_value_t = 10)]
        iterations: u32,
        #[arg(short, long, default_value_t = 30)]
        duration: u64,
        #[arg(short, long, default_value_t = 5)]
        buyers: u32,
        #[arg(short, long, default_value_t = 3)]
        providers: u32,
    },

    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let program_start = Instant::now();

    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            duration,
            buyers,
            providers,
            contract_hour,
        } => {
            let contract_hour = Duration::try_from_secs_f64(contract_hour)
                .map_err(|e| anyhow::anyhow!("bad --contract-hour: {e}"))?;
            let config = SimConfig::default()
                .with_name(format!("run_{}b_{}p", buyers, providers))
                .with_duration(Duration::from_secs(duration))
                .with_agents(buyers, providers)
                .with_contract_hour(contract_hour)
                .with_progress(true);

            info!("Storenet: Single Run");
            let report = Simulation::new(config).run().await?;
            run_table(&report);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::MonteCarlo {
            iterations,
            duration,
            buyers,
            providers,
        } => {
            let base = SimConfig::default()
                .with_name("monte_carlo")
                .with_duration(Duration::from_secs(duration))
                .with_agents(buyers, providers)
                .with_progress(true);

            info!("Storenet: Monte Carlo");
            let report = run_monte_carlo_with(base, iterations).await?;
            monte_carlo_table(&report);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::List => {
            println!("\nAvailable Pricing Strategies");

            for strategy in pricing::strategy_names() {
                println!("  - {}", strategy);
            }
            println!();
        }
    }

    info!("Total runtime: {:.2}s", program_start.elapsed().as_secs_f64());
    Ok(())
}

fn run_table(report: &RunReport) {
    let s = &report.summary;
    eprintln!("\n╔══════════════════════════════╦══════════════╗");
    eprintln!("║ {:<28} ║ {:>12} ║", "Metric", "Value");
    eprintln!("╠══════════════════════════════╬══════════════╣");
    eprintln!("║ {:<28} ║ {:>12} ║", "Requests", s.requests.total);
    eprintln!("║ {:<28} ║ {:>11.2}% ║", "Success rate", s.requests.success_rate * 100.0);
    eprintln!("║ {:<28} ║ {:>11.3}s ║", "Avg response time", s.requests.avg_response_time);
    eprintln!("║ {:<28} ║ {:>12} ║", "Contracts created", s.contracts.created);
    eprintln!("║ {:<28} ║ {:>12} ║", "Contracts completed", s.contracts.completed);
    eprintln!("║ {:<28} ║ {:>11.2}% ║", "Avg utilization", s.providers.avg_utilization * 100.0);
    eprintln!("║ {:<28} ║ {:>12.2} ║", "Avg reputation", s.providers.avg_reputation);
    eprintln!("║ {:<28} ║ {:>12} ║", "Corruptions", s.network.corruptions);
    eprintln!("║ {:<28} ║ {:>12} ║", "Provider failures", s.network.provider_failures);
    eprintln!("║ {:<28} ║ {:>12.2} ║", "Provider earnings", report.economics.total_provider_earnings);
    eprintln!("║ {:<28} ║ {:>12.2} ║", "Buyer spending", report.economics.total_buyer_spending);
    eprintln!("║ {:<28} ║ {:>12.3} ║", "Economic efficiency", report.economics.economic_efficiency);
    eprintln!("╚══════════════════════════════╩══════════════╝\n");
}

fn monte_carlo_table(report: &MonteCarloReport) {
    eprintln!("\n╔═════════════════════╦══════════╦══════════╦══════════╦══════════╦══════════╗");
    eprintln!("║ Metric              ║ Mean     ║ Std      ║ Min      ║ Max      ║ Median   ║");
    eprintln!("╠═════════════════════╬══════════╬══════════╬══════════╬══════════╬══════════╣");

    for (name, d) in [
        ("Success rate", &report.success_rate),
        ("Response time (s)", &report.response_time),
        ("Utilization", &report.utilization),
        ("Efficiency", &report.economic_efficiency),
    ] {
        eprintln!(
            "║ {:<19} ║ {:>8.3} ║ {:>8.3} ║ {:>8.3} ║ {:>8.3} ║ {:>8.3} ║",
            name, d.mean, d.std, d.min, d.max, d.median
        );
    }

    eprintln!("╚═════════════════════╩══════════╩══════════╩══════════╩══════════╩══════════╝");
    eprintln!(
        "{} runs, {} corruptions in total\n",
        report.iterations, report.total_corruptions
    );
}
