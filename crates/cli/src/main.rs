// LabWired Mimic - Recorded-Hardware Peripheral Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

use mimic_config::BoardDescriptor;
use mimic_core::MimicModel;

const EXIT_OK: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "LabWired Mimic - train and inspect recorded-hardware peripheral models",
    long_about = None
)]
struct Cli {
    /// Enable debug-level logging
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a peripheral model from a recorded trace log.
    Train(TrainArgs),

    /// Summarize a trained model file.
    Inspect(InspectArgs),

    /// Merge two trained models into one.
    Merge(MergeArgs),
}

#[derive(Parser, Debug)]
struct TrainArgs {
    /// Path to the recorded trace log (TSV)
    #[arg(short = 'r', long)]
    recording: PathBuf,

    /// Path to write the trained model (JSON)
    #[arg(short, long)]
    output: PathBuf,

    /// Board descriptor (YAML); supplies the replay seed when present
    #[arg(short, long)]
    board: Option<PathBuf>,

    /// Replay seed (takes precedence over the board descriptor)
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Path to a trained model file (JSON)
    #[arg(short, long)]
    model: PathBuf,
}

#[derive(Parser, Debug)]
struct MergeArgs {
    /// First trained model
    #[arg(long)]
    model_a: PathBuf,

    /// Second trained model
    #[arg(long)]
    model_b: PathBuf,

    /// Path to write the merged model
    #[arg(short, long)]
    output: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match cli.command {
        Commands::Train(args) => run_train(args),
        Commands::Inspect(args) => run_inspect(args),
        Commands::Merge(args) => run_merge(args),
    }
}

fn resolve_seed(args: &TrainArgs) -> anyhow::Result<u64> {
    if let Some(seed) = args.seed {
        return Ok(seed);
    }
    if let Some(board_path) = &args.board {
        let board = BoardDescriptor::from_file(board_path)
            .with_context(|| format!("Failed to load board descriptor {:?}", board_path))?;
        return Ok(board.seed.unwrap_or(0));
    }
    Ok(0)
}

fn run_train(args: TrainArgs) -> ExitCode {
    let seed = match resolve_seed(&args) {
        Ok(seed) => seed,
        Err(e) => {
            tracing::error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    info!("Training hardware model ({:?})", args.recording);
    let mut model = MimicModel::new(seed);
    if let Err(e) = model.train(&args.recording) {
        tracing::error!("Training failed: {}", e);
        return ExitCode::from(EXIT_RUNTIME_ERROR);
    }

    if let Err(e) = model.save(&args.output) {
        tracing::error!("Failed to save model: {}", e);
        return ExitCode::from(EXIT_RUNTIME_ERROR);
    }

    info!(
        "Trained {} peripherals over {} addresses",
        model.peripherals().len(),
        model.accessed_addresses().len()
    );
    ExitCode::from(EXIT_OK)
}

fn run_inspect(args: InspectArgs) -> ExitCode {
    let model = match MimicModel::load(&args.model) {
        Ok(model) => model,
        Err(e) => {
            tracing::error!("Failed to load model: {}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    println!("model: {:?}", args.model);
    println!("seed: {}", model.seed());
    println!("addresses: {}", model.accessed_addresses().len());
    println!("peripherals: {}", model.peripherals().len());
    for (i, cell) in model.peripherals().iter().enumerate() {
        let p = cell.lock().unwrap();
        let low = p.addresses.iter().next().copied().unwrap_or(0);
        let high = p.addresses.iter().next_back().copied().unwrap_or(0);
        println!(
            "  [{}] {:#010x}..={:#010x} ({} registers, {} states)",
            i,
            low,
            high,
            p.addresses.len(),
            p.states().len()
        );
        if let Some(irq) = p.irq_num {
            let trigger = p
                .trigger
                .map(|t| format!("{:#010x} mask {:#x}", t.addr, t.mask))
                .unwrap_or_else(|| "none".to_string());
            println!(
                "      irq {} trigger {} timings {}{}",
                irq,
                trigger,
                p.timings.len(),
                if p.oneshot { " (one-shot)" } else { "" }
            );
        }
        for state in p.states() {
            println!("      {}", state.describe());
        }
    }
    ExitCode::from(EXIT_OK)
}

fn run_merge(args: MergeArgs) -> ExitCode {
    let a = match MimicModel::load(&args.model_a) {
        Ok(model) => model,
        Err(e) => {
            tracing::error!("Failed to load {:?}: {}", args.model_a, e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let b = match MimicModel::load(&args.model_b) {
        Ok(model) => model,
        Err(e) => {
            tracing::error!("Failed to load {:?}: {}", args.model_b, e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let merged = a.merge(&b);
    if let Err(e) = merged.save(&args.output) {
        tracing::error!("Failed to save merged model: {}", e);
        return ExitCode::from(EXIT_RUNTIME_ERROR);
    }
    info!(
        "Merged {} + {} peripherals into {}",
        a.peripherals().len(),
        b.peripherals().len(),
        merged.peripherals().len()
    );
    ExitCode::from(EXIT_OK)
}
