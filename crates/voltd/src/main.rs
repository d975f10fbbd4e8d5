//! voltd — the voltgrid daemon.
//!
//! Runs the scheduling and power-management engine against the
//! reference discrete-event simulator, driven by a declarative
//! `voltgrid.toml` describing the fleet and the workload.
//!
//! # Usage
//!
//! ```text
//! voltd run --config voltgrid.toml
//! voltd run --config voltgrid.toml --duration-us 120000000 --json
//! voltd check --config voltgrid.toml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use volt_core::VoltConfig;
use voltgrid_control::Scheduler;
use voltgrid_sim::Simulation;

#[derive(Parser)]
#[command(name = "voltd", about = "voltgrid datacenter scheduling simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full simulation and print the final report.
    Run {
        /// Path to the declarative configuration.
        #[arg(long, default_value = "voltgrid.toml")]
        config: PathBuf,

        /// Override the configured virtual duration, in µs.
        #[arg(long)]
        duration_us: Option<u64>,

        /// Emit the final report as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Parse and validate a configuration, then print a summary.
    Check {
        /// Path to the declarative configuration.
        #[arg(long, default_value = "voltgrid.toml")]
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            duration_us,
            json,
        } => run(config, duration_us, json),
        Command::Check { config } => check(config),
    }
}

fn run(config_path: PathBuf, duration_us: Option<u64>, json: bool) -> anyhow::Result<()> {
    let mut config = VoltConfig::from_file(&config_path)?;
    if let Some(duration) = duration_us {
        config.sim.duration_us = duration;
    }

    info!(config = %config_path.display(), "voltd starting");
    let mut simulation = Simulation::from_config(&config);
    let mut scheduler = Scheduler::new(config.scheduler.clone());

    let report = simulation.run(&mut scheduler);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("SLA violation report");
        println!("SLA0: {:.2}%", report.sla_violations_pct[0]);
        println!("SLA1: {:.2}%", report.sla_violations_pct[1]);
        println!("SLA2: {:.2}%", report.sla_violations_pct[2]);
        println!("SLA3: {:.2}%", report.sla_violations_pct[3]);
        println!("Total Energy {:.4} kWh", report.total_energy_kwh);
        println!(
            "Simulation run finished in {:.3} seconds",
            report.simulated_seconds
        );
    }
    Ok(())
}

fn check(config_path: PathBuf) -> anyhow::Result<()> {
    let config = VoltConfig::from_file(&config_path)?;
    println!(
        "{}: ok ({} machine classes, {} machines, {} task classes)",
        config_path.display(),
        config.machine_class.len(),
        config.machine_count(),
        config.task_class.len()
    );
    for (i, class) in config.machine_class.iter().enumerate() {
        println!(
            "  machine_class[{i}]: {} x {} / {} cores / {} mem{}",
            class.count,
            class.cpu,
            class.cores,
            class.memory,
            if class.gpu { " / gpu" } else { "" }
        );
    }
    for (i, class) in config.task_class.iter().enumerate() {
        println!(
            "  task_class[{i}]: {} on {} ({}), every ~{}us in [{}, {})",
            class.sla,
            class.cpu,
            class.vm_kind,
            class.inter_arrival_us,
            class.start_time,
            class.end_time
        );
    }
    Ok(())
}
