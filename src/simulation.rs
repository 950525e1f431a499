use anyhow::Result;
use log::{debug, info, trace, warn};
use rand::prelude::*;
use rand_distr::StandardNormal;
use spotsim_common::{SimParams, SpotFrame, Vec2};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Output of a stepwise-bleaching run.
#[derive(Debug, Clone)]
pub struct StepwiseRun {
    pub frames: Vec<SpotFrame>,
    /// Molecules still fluorescing in each spot, per frame.
    pub molecule_counts: Vec<Vec<u32>>,
    /// Molecule count each spot started with.
    pub ground_truth: Vec<u32>,
}

/// Generates ground-truth spot trajectories frame by frame.
pub struct SpotSimulation {
    params: SimParams,
    /// Sequential RNG for every draw the simulator makes.
    rng: StdRng,
    cancel: Option<Arc<AtomicBool>>,
}

/// Returns an error if the shared cancel flag has been raised.
pub fn check_cancelled(cancel: Option<&AtomicBool>, frame: usize) -> Result<()> {
    if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
        anyhow::bail!("Run cancelled at frame {}.", frame);
    }
    Ok(())
}

/// Cancel flag that a background thread raises once `limit` has elapsed.
pub fn cancel_after(limit: Duration) -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let raised = Arc::clone(&flag);
    thread::spawn(move || {
        thread::sleep(limit);
        warn!("Time limit of {:.1} s reached, stopping at the next frame.", limit.as_secs_f64());
        raised.store(true, Ordering::Relaxed);
    });
    flag
}

impl SpotSimulation {
    pub fn new(params: SimParams, seed: u64) -> Result<Self> {
        if params.frame_width == 0 || params.frame_height == 0 {
            anyhow::bail!(
                "Frame dimensions must be positive (got {}x{}).",
                params.frame_width,
                params.frame_height
            );
        }
        if params.num_frames == 0 {
            anyhow::bail!("num_frames must be greater than 0.");
        }
        if !(params.diffusion_step_px >= 0.0) || !params.diffusion_step_px.is_finite() {
            anyhow::bail!("Diffusion step must be finite and non-negative.");
        }
        if !(0.0..=1.0).contains(&params.p_bleach_per_frame) {
            anyhow::bail!("p_bleach_per_frame must lie in [0, 1].");
        }

        Ok(Self {
            params,
            rng: StdRng::seed_from_u64(seed),
            cancel: None,
        })
    }

    /// Stops the run at the next frame boundary once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    /// Brownian diffusion with whole-spot photobleaching.
    ///
    /// Each frame every spot takes a Gaussian step. With probability `1 / bleach_time`
    /// a spot bleaches and is replaced by a new fluorophore at a random position with a
    /// fresh trajectory id. Intensities are left at zero for the renderer to fill.
    pub fn simulate(&mut self) -> Result<Vec<SpotFrame>> {
        let num_frames = self.params.num_frames;
        let step = self.params.diffusion_step_px;
        info!(
            "Simulating {} spots over {} frames (step {:.3} px, bleach time {:.1} frames)",
            self.params.num_spots, num_frames, step, self.params.bleach_time
        );

        let mut frames = Vec::with_capacity(num_frames);
        frames.push(self.initial_frame());

        let mut total_bleached = 0;
        for frame in 1..num_frames {
            check_cancelled(self.cancel.as_deref(), frame)?;

            let mut next = self.diffuse(&frames[frame - 1], frame, step);
            if self.params.bleach_time > 0.0 {
                total_bleached += self.bleach_spots(&mut next);
            }
            frames.push(next);
        }

        debug!("{} spots bleached and replaced during the run", total_bleached);
        Ok(frames)
    }

    /// Spots made of several molecules that bleach one at a time.
    ///
    /// Intensity is `single_emitter_intensity * molecules`. Bleaching drawn during frame
    /// `k` shows up from frame `k + 1`. Spots stay put unless `stepwise_diffusion` is set.
    pub fn simulate_stepwise_bleaching(&mut self) -> Result<StepwiseRun> {
        let num_frames = self.params.num_frames;
        let num_spots = self.params.num_spots;
        let i_single = self.params.single_emitter_intensity;
        let step = if self.params.stepwise_diffusion {
            self.params.diffusion_step_px
        } else {
            0.0
        };

        let mut counts: Vec<u32> = match self.params.num_spot_molecules {
            Some(n) => vec![n; num_spots],
            None => {
                let max = self.params.max_spot_molecules;
                if max == 0 {
                    anyhow::bail!("max_spot_molecules must be at least 1.");
                }
                (0..num_spots).map(|_| self.rng.random_range(1..=max)).collect()
            }
        };
        let ground_truth = counts.clone();
        info!(
            "Simulating stepwise bleaching of {} spots over {} frames (p = {})",
            num_spots, num_frames, self.params.p_bleach_per_frame
        );
        debug!("Ground-truth molecule counts: {:?}", ground_truth);

        let mut first = self.initial_frame();
        first.spot_intensity = intensities(&counts, i_single);

        let mut frames = Vec::with_capacity(num_frames);
        let mut molecule_counts = Vec::with_capacity(num_frames);
        frames.push(first);
        molecule_counts.push(counts.clone());

        for frame in 1..num_frames {
            check_cancelled(self.cancel.as_deref(), frame)?;

            let mut next = self.diffuse(&frames[frame - 1], frame, step);
            next.spot_intensity = intensities(&counts, i_single);
            frames.push(next);
            molecule_counts.push(counts.clone());

            let bleached = self.bleach_molecules(&mut counts);
            if bleached > 0 {
                trace!("Frame {}: {} molecules bleached", frame, bleached);
            }
        }

        Ok(StepwiseRun {
            frames,
            molecule_counts,
            ground_truth,
        })
    }

    /// Frame 0: uniform random positions, trajectory ids `0..num_spots`.
    fn initial_frame(&mut self) -> SpotFrame {
        let mut frame = SpotFrame::new(0, self.params.num_spots);
        for pos in frame.positions.iter_mut() {
            *pos = self.random_position();
        }
        frame
    }

    fn random_position(&mut self) -> Vec2 {
        Vec2::new(
            self.rng.random::<f64>() * self.params.frame_width as f64,
            self.rng.random::<f64>() * self.params.frame_height as f64,
        )
    }

    /// Copies `prev` into a new frame and applies one Gaussian step per axis.
    fn diffuse(&mut self, prev: &SpotFrame, frame: usize, step: f64) -> SpotFrame {
        let mut next = prev.clone();
        next.frame = frame;
        next.spot_intensity.iter_mut().for_each(|i| *i = 0.0);

        if step > 0.0 {
            for pos in next.positions.iter_mut() {
                let dx: f64 = self.rng.sample(StandardNormal);
                let dy: f64 = self.rng.sample(StandardNormal);
                *pos = *pos + Vec2::new(dx * step, dy * step);
            }
        }
        next
    }

    /// Independent Bernoulli trial per spot. Returns how many bleached.
    fn bleach_spots(&mut self, frame: &mut SpotFrame) -> usize {
        let p = 1.0 / self.params.bleach_time;
        let mut bleached = 0;

        for spot in 0..frame.num_spots() {
            if self.rng.random::<f64>() < p {
                let new_id = frame.next_traj_num();
                trace!(
                    "Frame {}: spot {} bleached, trajectory {} -> {}",
                    frame.frame, spot, frame.traj_num[spot], new_id
                );
                frame.positions[spot] = self.random_position();
                frame.traj_num[spot] = new_id;
                bleached += 1;
            }
        }
        bleached
    }

    /// One trial per fluorescing molecule. Counts never go below zero.
    fn bleach_molecules(&mut self, counts: &mut [u32]) -> u32 {
        let p = self.params.p_bleach_per_frame;
        let mut bleached = 0;

        for count in counts.iter_mut() {
            let trials = *count;
            for _ in 0..trials {
                if self.rng.random::<f64>() < p {
                    *count -= 1;
                    bleached += 1;
                }
            }
        }
        bleached
    }
}

fn intensities(counts: &[u32], i_single: f64) -> Vec<f64> {
    counts.iter().map(|&n| i_single * n as f64).collect()
}

#[cfg(test)]
pub(crate) fn test_params() -> SimParams {
    use spotsim_common::BleachModel;

    SimParams {
        num_frames: 20,
        num_spots: 6,
        frame_width: 32,
        frame_height: 24,
        pixel_size: 0.1,
        diffusion_coeff: 0.0,
        frame_time: 0.01,
        diffusion_step_px: 0.0,
        single_emitter_intensity: 10_000.0,
        psf_width: 1.5,
        bg_mean: 0.0,
        bg_std: 0.0,
        bleach_model: BleachModel::Continuous,
        bleach_time: 0.0,
        p_bleach_per_frame: 0.0,
        num_spot_molecules: None,
        max_spot_molecules: 4,
        stepwise_diffusion: false,
    }
}
