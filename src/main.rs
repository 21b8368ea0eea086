//! shipwright — multi-phase build-and-verification orchestrator for
//! AI-generated microservice fleets.

use clap::{Parser, Subcommand};
use console::style;
use shipwright::config::ShipwrightConfig;
use shipwright::pipeline::{Phase, Pipeline, PipelineState};
use shipwright::report::generate_audit_report;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shipwright", version, about = "Drive a microservice fleet from PRD to audit verdict")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "shipwright.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline from the beginning (or resume a checkpoint).
    Run {
        /// Override the PRD path from the config file.
        #[arg(long)]
        prd: Option<PathBuf>,
    },
    /// Re-render the audit report from the persisted state.
    Report,
    /// Show the current phase and score of the persisted run.
    Status,
}

fn load_config(cli: &Cli) -> anyhow::Result<ShipwrightConfig> {
    if cli.config.exists() {
        Ok(ShipwrightConfig::from_yaml(&cli.config)?)
    } else {
        tracing::warn!(path = %cli.config.display(), "config file not found, using defaults");
        Ok(ShipwrightConfig::default())
    }
}

async fn cmd_run(mut config: ShipwrightConfig, prd: Option<PathBuf>) -> anyhow::Result<()> {
    if let Some(prd) = prd {
        config.prd_path = Some(prd);
    }
    let output_dir = config.output_dir.clone();

    let mut pipeline = Pipeline::new(config)?;
    let cancel = pipeline.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} interrupt received, shutting down", style("!").red());
            cancel.cancel();
        }
    });

    let final_phase = pipeline.run().await;
    let state = pipeline.state();
    match final_phase {
        Ok(Phase::Complete) => {
            println!(
                "{} run {} complete — aggregate {:.1} ({})",
                style("✓").green(),
                state.run_id,
                state.aggregate_score,
                state.traffic_light,
            );
        }
        Ok(phase) => {
            println!(
                "{} run {} stopped at {}",
                style("✗").red(),
                state.run_id,
                phase
            );
        }
        Err(e) => {
            println!("{} run {} failed: {}", style("✗").red(), state.run_id, e);
        }
    }
    println!(
        "report: {}",
        output_dir.join("SUPER_TEAM_AUDIT_REPORT.md").display()
    );
    Ok(())
}

fn cmd_report(config: &ShipwrightConfig) -> anyhow::Result<()> {
    match PipelineState::load(&config.state_path()) {
        Some(state) => {
            println!("{}", generate_audit_report(&state));
            Ok(())
        }
        None => anyhow::bail!("no persisted run found at {}", config.state_path().display()),
    }
}

fn cmd_status(config: &ShipwrightConfig) -> anyhow::Result<()> {
    match PipelineState::load(&config.state_path()) {
        Some(state) => {
            println!("run:       {}", state.run_id);
            println!("phase:     {}", state.current_phase);
            println!(
                "completed: {}",
                state
                    .completed_phases
                    .iter()
                    .map(|p| p.name())
                    .collect::<Vec<_>>()
                    .join(" → ")
            );
            println!(
                "score:     {:.1} ({})",
                state.aggregate_score, state.traffic_light
            );
            println!("findings:  {} total", state.findings.len());
            println!("cost:      ${:.2}", state.total_cost);
            Ok(())
        }
        None => anyhow::bail!("no persisted run found at {}", config.state_path().display()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run { prd } => cmd_run(config, prd).await,
        Commands::Report => cmd_report(&config),
        Commands::Status => cmd_status(&config),
    }
}
