//! Headless simulation runner.
//!
//! Steps a network for a fixed number of steps and writes one JSON object per
//! line: a `run_start` event, a `step` event per step and a `run_complete`
//! event. Progress logging goes to stderr (`RUST_LOG=local_learn=debug` for
//! per-step logs).

use clap::Parser;
use local_learn::{Params, Schedule, Simulation, Variant};
use std::error::Error;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "simulate",
    about = "Step a local-learning network and stream per-step metrics as JSONL"
)]
struct Args {
    /// Layer widths, input first
    #[arg(long, default_value = "16,32,16,4")]
    layers: Schedule,

    /// Learning rule variant: pc, ep-fa or ep-fa-ff
    #[arg(long, default_value = "ep-fa-ff")]
    variant: Variant,

    /// Number of steps to run
    #[arg(long, default_value_t = 200)]
    steps: usize,

    /// Seed for weight initialization and negative sampling
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// JSON file with knob values (camelCase keys); flags below override it
    #[arg(long)]
    params: Option<PathBuf>,

    /// Relaxation rate
    #[arg(long)]
    eta_infer: Option<f32>,

    /// Weight learning rate
    #[arg(long)]
    alpha_learn: Option<f32>,

    /// Nudging strength
    #[arg(long)]
    beta_ep: Option<f32>,

    /// Forward-Forward goodness threshold
    #[arg(long)]
    theta_ff: Option<f32>,

    /// Predictive-coding relaxation iterations per step
    #[arg(long)]
    t_steps: Option<usize>,

    /// Let the deepest layer relax too
    #[arg(long, default_value_t = false)]
    relax_top: bool,

    /// Output metrics file (JSONL); stdout if omitted
    #[arg(long)]
    metrics_file: Option<PathBuf>,
}

impl Args {
    fn resolve_params(&self) -> Result<Params, Box<dyn Error>> {
        let mut params = match &self.params {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
                Params::from_json(&text)?
            }
            None => Params::default(),
        };

        if let Some(v) = self.eta_infer {
            params.eta_infer = v;
        }
        if let Some(v) = self.alpha_learn {
            params.alpha_learn = v;
        }
        if let Some(v) = self.beta_ep {
            params.beta_ep = v;
        }
        if let Some(v) = self.theta_ff {
            params.theta_ff = v;
        }
        if let Some(v) = self.t_steps {
            params.t_steps = v;
        }
        params.relax_top |= self.relax_top;
        Ok(params)
    }
}

fn open_output(path: Option<&PathBuf>) -> Result<Box<dyn Write>, Box<dyn Error>> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            Ok(Box::new(BufWriter::new(File::create(path)?)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout().lock()))),
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let params = args.resolve_params()?;
    let mut out = open_output(args.metrics_file.as_ref())?;

    let mut sim = Simulation::new(args.layers.clone(), args.variant, args.seed, params);

    info!(
        layers = ?args.layers.dims(),
        variant = %args.variant,
        steps = args.steps,
        "starting run"
    );

    let run_start = serde_json::json!({
        "type": "run_start",
        "layers": args.layers.dims(),
        "variant": args.variant,
        "seed": args.seed,
        "steps": args.steps,
        "params": params,
    });
    writeln!(out, "{}", run_start)?;

    let started = Instant::now();
    let mut last_energy = 0.0f32;
    let mut min_energy = f32::INFINITY;

    for _ in 0..args.steps {
        let report = sim.advance().report();
        last_energy = report.energy;
        min_energy = min_energy.min(report.energy);

        let mut event = serde_json::to_value(&report)?;
        if let Some(obj) = event.as_object_mut() {
            obj.insert("type".into(), "step".into());
        }
        writeln!(out, "{}", event)?;
    }

    let elapsed = started.elapsed().as_secs_f64();
    let min_energy = min_energy.is_finite().then_some(min_energy);
    let run_complete = serde_json::json!({
        "type": "run_complete",
        "steps": sim.snapshot().step,
        "final_energy": last_energy,
        "min_energy": min_energy,
        "elapsed_secs": elapsed,
    });
    writeln!(out, "{}", run_complete)?;
    out.flush()?;

    info!(
        steps = sim.snapshot().step,
        final_energy = last_energy,
        elapsed_secs = elapsed,
        "run complete"
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
