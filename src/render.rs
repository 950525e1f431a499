use crate::image_stack::ImageStack;
use crate::noise::{apply_shot_noise, background_noise};
use crate::simulation::check_cancelled;
use anyhow::Result;
use log::{debug, info};
use ndarray::{Array2, Zip};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use spotsim_common::{SimParams, SpotFrame, Vec2};
use std::f64::consts::PI;
use std::sync::atomic::AtomicBool;

/// How spot amplitudes are derived, one per simulator variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Amplitude `I_single / (2π w²)`; each spot's footprint sum is written back
    /// into `SpotFrame::spot_intensity`.
    Continuous,
    /// Amplitude `spot_intensity / (2π w)` from the simulator's per-spot intensity.
    Stepwise,
}

/// Turns spot records into noisy 16-bit frames.
#[derive(Debug, Clone)]
pub struct FrameRenderer {
    width: usize,
    height: usize,
    psf_width: f64,
    single_emitter_intensity: f64,
    bg_mean: f64,
    bg_std: f64,
    mode: RenderMode,
    seed: u64,
}

impl FrameRenderer {
    pub fn new(params: &SimParams, mode: RenderMode, seed: u64) -> Result<Self> {
        if params.frame_width == 0 || params.frame_height == 0 {
            anyhow::bail!(
                "Frame dimensions must be positive (got {}x{}).",
                params.frame_width,
                params.frame_height
            );
        }
        if !(params.psf_width > 0.0) {
            anyhow::bail!("PSF width must be positive (got {}).", params.psf_width);
        }
        if !(params.bg_std >= 0.0) || !params.bg_mean.is_finite() {
            anyhow::bail!(
                "Background noise needs a finite mean and a non-negative std (got {}, {}).",
                params.bg_mean,
                params.bg_std
            );
        }
        Ok(Self {
            width: params.frame_width,
            height: params.frame_height,
            psf_width: params.psf_width,
            single_emitter_intensity: params.single_emitter_intensity,
            bg_mean: params.bg_mean,
            bg_std: params.bg_std,
            mode,
            seed,
        })
    }

    fn amplitude(&self, spot_intensity: f64) -> f64 {
        match self.mode {
            RenderMode::Continuous => self.single_emitter_intensity / (2.0 * PI * self.psf_width.powi(2)),
            RenderMode::Stepwise => spot_intensity / (2.0 * PI * self.psf_width),
        }
    }

    /// Gaussian footprint of one spot over the whole frame, truncated to whole counts.
    pub fn footprint(&self, centre: Vec2, amplitude: f64) -> Array2<u16> {
        let two_var = 2.0 * self.psf_width * self.psf_width;
        Array2::from_shape_fn((self.height, self.width), |(y, x)| {
            let dx = x as f64 - centre.x;
            let dy = y as f64 - centre.y;
            // `as` truncates toward zero and saturates at u16::MAX
            (amplitude * (-(dx * dx + dy * dy) / two_var).exp()) as u16
        })
    }

    /// Noise-free superposition of every spot in `spots`.
    pub fn compose(&self, spots: &mut SpotFrame) -> Array2<u32> {
        let mut composite = Array2::<u32>::zeros((self.height, self.width));

        for spot in 0..spots.num_spots() {
            let amplitude = self.amplitude(spots.spot_intensity[spot]);
            let footprint = self.footprint(spots.positions[spot], amplitude);
            Zip::from(&mut composite)
                .and(&footprint)
                .for_each(|acc, &v| *acc += v as u32);
            if self.mode == RenderMode::Continuous {
                spots.spot_intensity[spot] = footprint.iter().map(|&v| v as f64).sum();
            }
        }

        composite
    }

    /// Composites, then adds shot and background noise with this frame's own RNG.
    pub fn render_frame(&self, spots: &mut SpotFrame) -> Result<Array2<u16>> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(spots.frame as u64));

        let composite = self.compose(spots);
        let shot = apply_shot_noise(&composite, &mut rng)?;
        let background = background_noise((self.height, self.width), self.bg_mean, self.bg_std, &mut rng)?;

        let frame = Zip::from(&shot)
            .and(&background)
            .map_collect(|&s, &b| s.saturating_add(b).min(u16::MAX as u64) as u16);
        Ok(frame)
    }

    /// Renders every frame in parallel into a new stack.
    pub fn render_stack(&self, frames: &mut [SpotFrame], cancel: Option<&AtomicBool>) -> Result<ImageStack> {
        info!(
            "Rendering {} frames of {}x{} px ({:?} mode)",
            frames.len(),
            self.width,
            self.height,
            self.mode
        );
        let mut stack = ImageStack::initialise(frames.len(), self.width, self.height)?;

        let rendered: Vec<Array2<u16>> = frames
            .par_iter_mut()
            .map(|spots| {
                check_cancelled(cancel, spots.frame)?;
                self.render_frame(spots)
            })
            .collect::<Result<_>>()?;

        for (index, frame) in rendered.into_iter().enumerate() {
            stack.set_frame(index, frame)?;
        }
        debug!("Rendered {} frames", stack.num_frames());
        Ok(stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{test_params, SpotSimulation};
    use approx::assert_relative_eq;

    fn centred_frame(frame: usize, intensity: f64) -> SpotFrame {
        let mut spots = SpotFrame::new(frame, 1);
        spots.positions[0] = Vec2::new(16.0, 16.0);
        spots.spot_intensity[0] = intensity;
        spots
    }

    fn square_params() -> SimParams {
        let mut params = test_params();
        params.frame_width = 32;
        params.frame_height = 32;
        params.psf_width = 2.0;
        params
    }

    #[test]
    fn test_footprint_peak_and_truncation() {
        let renderer = FrameRenderer::new(&square_params(), RenderMode::Continuous, 0).unwrap();
        let fp = renderer.footprint(Vec2::new(10.0, 5.0), 100.7);
        assert_eq!(fp.dim(), (32, 32));
        // Peak is at row y = 5, column x = 10
        assert_eq!(fp[[5, 10]], 100);
        assert_eq!(fp[[10, 5]], 0);
        assert!(fp[[5, 11]] < 100 && fp[[5, 11]] > 0);
    }

    #[test]
    fn test_continuous_composite_sum_and_record() {
        let params = square_params();
        let renderer = FrameRenderer::new(&params, RenderMode::Continuous, 0).unwrap();
        let mut spots = centred_frame(0, 0.0);

        let composite = renderer.compose(&mut spots);
        let total: f64 = composite.iter().map(|&v| v as f64).sum();
        // Truncation drops under one count per lit pixel
        assert!(total <= params.single_emitter_intensity);
        assert!(total > params.single_emitter_intensity - 150.0);
        assert_relative_eq!(spots.spot_intensity[0], total);
    }

    #[test]
    fn test_stepwise_amplitude_divides_by_width() {
        let params = square_params();
        let renderer = FrameRenderer::new(&params, RenderMode::Stepwise, 0).unwrap();
        let mut spots = centred_frame(0, 3000.0);

        let composite = renderer.compose(&mut spots);
        let total: f64 = composite.iter().map(|&v| v as f64).sum();
        // intensity / (2π w) over a Gaussian of area 2π w² sums to intensity * w
        assert_relative_eq!(total, 3000.0 * params.psf_width, max_relative = 0.03);
        // Stepwise intensities are owned by the simulator
        assert_eq!(spots.spot_intensity[0], 3000.0);
    }

    #[test]
    fn test_superposition() {
        let renderer = FrameRenderer::new(&square_params(), RenderMode::Continuous, 0).unwrap();
        let mut pair = SpotFrame::new(0, 2);
        pair.positions = vec![Vec2::new(8.0, 8.0), Vec2::new(20.0, 22.0)];
        let together = renderer.compose(&mut pair);

        let mut first = SpotFrame::new(0, 1);
        first.positions[0] = pair.positions[0];
        let mut second = SpotFrame::new(0, 1);
        second.positions[0] = pair.positions[1];
        let apart = renderer.compose(&mut first) + renderer.compose(&mut second);
        assert_eq!(together, apart);
    }

    #[test]
    fn test_rendered_sum_matches_emitter_intensity() {
        let params = square_params();
        let renderer = FrameRenderer::new(&params, RenderMode::Continuous, 17).unwrap();
        let mut frames = vec![centred_frame(0, 0.0), centred_frame(1, 0.0)];

        let stack = renderer.render_stack(&mut frames, None).unwrap();
        assert_eq!(stack.num_frames(), 2);
        for index in 0..2 {
            // Poisson std of the total is about 100 counts
            let sum = stack.frame_sum(index).unwrap() as f64;
            assert_relative_eq!(sum, params.single_emitter_intensity, max_relative = 0.05);
        }
    }

    #[test]
    fn test_background_only_frame() {
        let mut params = square_params();
        params.bg_mean = 50.0;
        params.bg_std = 2.0;
        params.single_emitter_intensity = 0.0;
        let renderer = FrameRenderer::new(&params, RenderMode::Continuous, 5).unwrap();
        let mut spots = centred_frame(0, 0.0);

        let frame = renderer.render_frame(&mut spots).unwrap();
        let mean = frame.iter().map(|&v| v as f64).sum::<f64>() / frame.len() as f64;
        assert_relative_eq!(mean, 49.5, epsilon = 0.5);
    }

    #[test]
    fn test_render_is_reproducible_per_frame() {
        let params = square_params();
        let renderer = FrameRenderer::new(&params, RenderMode::Continuous, 99).unwrap();

        let a = renderer.render_frame(&mut centred_frame(3, 0.0)).unwrap();
        let b = renderer.render_frame(&mut centred_frame(3, 0.0)).unwrap();
        let c = renderer.render_frame(&mut centred_frame(4, 0.0)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_render_stack_honours_cancel() {
        let renderer = FrameRenderer::new(&square_params(), RenderMode::Continuous, 1).unwrap();
        let mut frames = vec![centred_frame(0, 0.0)];
        let cancel = AtomicBool::new(true);
        assert!(renderer.render_stack(&mut frames, Some(&cancel)).is_err());
    }

    #[test]
    fn test_rejects_zero_psf() {
        let mut params = square_params();
        params.psf_width = 0.0;
        assert!(FrameRenderer::new(&params, RenderMode::Stepwise, 0).is_err());
    }

    #[test]
    fn test_rejects_negative_background_std() {
        let mut params = square_params();
        params.bg_std = -1.0;
        assert!(FrameRenderer::new(&params, RenderMode::Continuous, 0).is_err());
        params.bg_std = f64::NAN;
        assert!(FrameRenderer::new(&params, RenderMode::Stepwise, 0).is_err());
    }

    #[test]
    fn test_render_empty_sequence() {
        log::set_max_level(log::LevelFilter::Debug);
        let renderer = FrameRenderer::new(&square_params(), RenderMode::Continuous, 0).unwrap();
        let stack = renderer.render_stack(&mut Vec::<SpotFrame>::new(), None).unwrap();
        assert_eq!(stack.num_frames(), 0);
        assert_eq!(stack.frame_sum(0), None);
    }

    #[test]
    fn test_end_to_end_static_spot() {
        let mut params = square_params();
        params.num_frames = 2;
        params.num_spots = 1;
        let mut frames = SpotSimulation::new(params.clone(), 2024).unwrap().simulate().unwrap();
        let position = frames[0].positions[0];
        assert_eq!(frames[1].positions[0], position);

        let renderer = FrameRenderer::new(&params, RenderMode::Continuous, 2024).unwrap();
        let stack = renderer.render_stack(&mut frames, None).unwrap();

        assert_eq!(frames[0].traj_num, frames[1].traj_num);
        let w = params.psf_width;
        let well_inside = position.x >= 4.0 * w
            && position.y >= 4.0 * w
            && position.x <= params.frame_width as f64 - 1.0 - 4.0 * w
            && position.y <= params.frame_height as f64 - 1.0 - 4.0 * w;
        for (index, spots) in frames.iter().enumerate() {
            // The recorded intensity is the part of the footprint that landed on the frame
            let recorded = spots.spot_intensity[0];
            assert!(recorded > 0.2 * params.single_emitter_intensity);
            assert!(recorded <= params.single_emitter_intensity);
            let sum = stack.frame_sum(index).unwrap() as f64;
            assert_relative_eq!(sum, recorded, max_relative = 0.08);
            if well_inside {
                assert_relative_eq!(sum, params.single_emitter_intensity, max_relative = 0.05);
            }

            // Brightest pixel sits on the simulated position, (row, col) = (y, x)
            let (peak, _) = stack[index]
                .indexed_iter()
                .max_by_key(|&(_, &v)| v)
                .unwrap();
            assert!((peak.0 as f64 - position.y).abs() <= 2.0);
            assert!((peak.1 as f64 - position.x).abs() <= 2.0);
        }
    }
}
