use anyhow::{Context, anyhow};
use asmsim::{AsmSimulator, Position, SimulatorConfig};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const APP_NAME: &str = "asmsim";

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct AsmSimParams {
    #[command(subcommand)]
    pub command: Commands,
    /// Simulate in 32-bit mode and remember the choice
    #[arg(long)]
    pub bits32: bool,
    /// Lookback bound used when computing a state on request
    #[arg(long)]
    pub steps: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Prints the register and flag summary of every line
    States {
        file: PathBuf,
        #[arg(long)]
        before: bool,
    },
    /// Prints syntax errors and undefined-usage warnings of every line
    Warnings { file: PathBuf },
    /// Prints the value of one register after one line
    Register {
        file: PathBuf,
        line: usize,
        register: String,
    },
    /// Prints the active configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let params = AsmSimParams::parse();
    let config = update_config(&params)?;
    match params.command {
        Commands::States { file, before } => states(config, &file, before),
        Commands::Warnings { file } => warnings(config, &file),
        Commands::Register {
            file,
            line,
            register,
        } => register(config, &file, line, &register),
        Commands::Config => {
            println!("{config:#?}");
            Ok(())
        }
    }
}

fn update_config(params: &AsmSimParams) -> anyhow::Result<SimulatorConfig> {
    let stored: SimulatorConfig =
        confy::load(APP_NAME, None).context("could not load the configuration")?;
    let mut config = stored.clone();
    if params.bits32 {
        config.mode_64bit = false;
    }
    if let Some(steps) = params.steps {
        config.sync_steps = steps;
    }
    if stored != config {
        confy::store(APP_NAME, None, config.clone()).context("could not store the configuration")?;
    }
    Ok(config)
}

fn load(config: SimulatorConfig, file: &Path) -> anyhow::Result<(AsmSimulator, String)> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("could not read {}", file.display()))?;
    if !config.enabled {
        return Err(anyhow!("the simulator is disabled in the configuration"));
    }
    Ok((AsmSimulator::with_source(config, &text), text))
}

fn states(config: SimulatorConfig, file: &Path, before: bool) -> anyhow::Result<()> {
    let (sim, text) = load(config, file)?;
    for (i, line) in text.lines().enumerate() {
        println!("{i:>4}: {line}");
        let state = if before {
            sim.create_state_before(i)
        } else {
            sim.create_state_after(i)
        };
        match state {
            Some(state) => print!("{state}"),
            None => {
                let position = if before { Position::Before } else { Position::After };
                println!("      no state {position} this line");
            }
        }
    }
    Ok(())
}

fn warnings(config: SimulatorConfig, file: &Path) -> anyhow::Result<()> {
    let (sim, text) = load(config, file)?;
    for (i, line) in text.lines().enumerate() {
        if let Some(info) = sim.syntax_errors(line) {
            if let Some(message) = info.message {
                println!("{i}: error: {message}");
            } else if !info.is_implemented && !info.mnemonic.is_none() {
                println!("{i}: note: {} is not simulated", info.mnemonic);
            }
        }
        let undefined = sim.undefined_usage_warnings(line, i);
        if !undefined.is_empty() {
            println!("{i}: warning: {undefined}");
        }
        let redundant = sim.redundant_instruction_warnings(line, i);
        if !redundant.is_empty() {
            println!("{i}: warning: {redundant}");
        }
    }
    Ok(())
}

fn register(
    config: SimulatorConfig,
    file: &Path,
    line: usize,
    name: &str,
) -> anyhow::Result<()> {
    let (sim, _) = load(config, file)?;
    let state = sim
        .create_state_after(line)
        .ok_or_else(|| anyhow!("no state available after line {line}"))?;
    let rendered = sim.format_register(name, Some(&state));
    if rendered.is_empty() {
        return Err(anyhow!("{name} is not a general purpose register"));
    }
    println!("{name} = {rendered}");
    Ok(())
}
