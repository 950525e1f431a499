use serde::{Deserialize, Serialize};
use crate::config::BleachModel;

/// Simulation parameters derived from the configuration, read throughout a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // Acquisition
    pub num_frames: usize,
    pub num_spots: usize,
    pub frame_width: usize,
    pub frame_height: usize,

    // Dynamics
    pub pixel_size: f64, // um per pixel
    pub diffusion_coeff: f64, // um^2/s
    pub frame_time: f64, // s
    pub diffusion_step_px: f64, // per-axis std of one frame's Brownian step

    // Optics
    pub single_emitter_intensity: f64,
    pub psf_width: f64, // px
    pub bg_mean: f64,
    pub bg_std: f64,

    // Photobleaching
    pub bleach_model: BleachModel,
    pub bleach_time: f64, // frames
    pub p_bleach_per_frame: f64,
    pub num_spot_molecules: Option<u32>,
    pub max_spot_molecules: u32,
    pub stepwise_diffusion: bool,
}
