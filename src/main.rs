use anyhow::Result;
use clap::Parser;
use log::{debug, info};
use rand::Rng;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

mod image_stack;
mod noise;
mod render;
mod simulation;
mod spot_check;
mod trajectories;

use render::{FrameRenderer, RenderMode};
use simulation::SpotSimulation;
use trajectories::Trajectory;
use spotsim_common::{BleachModel, SimulationConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Simulates fluorescent spot movies with ground truth", long_about = None)]
struct Args {
    /// Path to the simulation config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// RNG seed; overrides `[run] seed` (0 draws a random seed)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Base filename for every output; overrides `[output] base_filename`
    #[arg(short, long)]
    output: Option<String>,

    /// Stop the run at the next frame boundary after this many seconds
    #[arg(long)]
    time_limit: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Starting spot simulator...");
    let mut config = SimulationConfig::load(&args.config)?;
    if let Some(seed) = args.seed {
        config.run.seed = seed;
    }
    if let Some(base) = args.output {
        config.output.base_filename = base;
    }

    let seed = match config.run.seed {
        0 => rand::rng().random(),
        s => s,
    };
    info!("Using seed {} and {} Rayon threads.", seed, rayon::current_num_threads());

    let cancel = match args.time_limit {
        Some(limit) => simulation::cancel_after(Duration::from_secs(limit)),
        None => Arc::new(AtomicBool::new(false)),
    };

    // --- Trajectories ---
    let start_time = Instant::now();
    let mut sim = SpotSimulation::new(config.get_sim_params(), seed)?.with_cancel_flag(Arc::clone(&cancel));
    let params = sim.params().clone();
    debug!("Simulation Parameters: {:#?}", params);
    let (mut frames, ground_truth, mode) = match params.bleach_model {
        BleachModel::Continuous => (sim.simulate()?, None, RenderMode::Continuous),
        BleachModel::Stepwise => {
            let run = sim.simulate_stepwise_bleaching()?;
            let remaining: u32 = run.molecule_counts.last().map_or(0, |c| c.iter().sum());
            info!("{} molecules still fluorescing in the last frame", remaining);
            (run.frames, Some(run.ground_truth), RenderMode::Stepwise)
        }
    };
    info!("Trajectories simulated in {:.3} s", start_time.elapsed().as_secs_f64());

    // --- Rendering ---
    let render_start = Instant::now();
    // Frame RNGs are seeded apart from the trajectory stream
    let renderer = FrameRenderer::new(&params, mode, seed.wrapping_add(1))?;
    let stack = renderer.render_stack(&mut frames, Some(cancel.as_ref()))?;
    info!(
        "Rendered {} frames of {}x{} px in {:.3} s",
        stack.num_frames(),
        stack.width(),
        stack.height(),
        render_start.elapsed().as_secs_f64()
    );

    // --- Output ---
    stack.write(&config.output)?;
    if config.output.save_trajectories {
        let tracks = trajectories::build_trajectories(&frames);
        let last_frame = frames.len().saturating_sub(1);
        let spanning = tracks
            .iter()
            .filter(|t| t.start_frame() == Some(0) && t.end_frame() == Some(last_frame))
            .count();
        let points: usize = tracks.iter().map(Trajectory::len).sum();
        info!(
            "{} trajectories (mean length {:.1} frames), {} span the whole run",
            tracks.len(),
            points as f64 / tracks.len().max(1) as f64,
            spanning
        );
        trajectories::write_trajectories(&tracks, &config.output, true)?;
        if let Some(molecules) = &ground_truth {
            trajectories::write_ground_truth(molecules, &config.output)?;
        }
    } else {
        info!("Skipping saving trajectories as per config.");
    }

    // --- Detection ---
    if config.detection.enabled {
        let checks = spot_check::run_spot_check(&stack, &config.detection);
        for check in &checks {
            match (&check.candidates, check.mean_fwhm) {
                (Some(candidates), Some(width)) => {
                    debug!("Frame {}: {} spots, FWHM {:.2} px", check.frame, candidates.len(), width)
                }
                (Some(candidates), None) => debug!("Frame {}: {} spots", check.frame, candidates.len()),
                (None, _) => debug!("Frame {}: inconclusive", check.frame),
            }
        }
    }

    let total_duration = start_time.elapsed();
    info!("Simulation Complete in {:.3} seconds.", total_duration.as_secs_f64());
    Ok(())
}
