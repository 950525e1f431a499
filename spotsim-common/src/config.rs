use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::sim_params::SimParams;
use std::path::Path;

// Frame geometry and length of the simulated acquisition
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FramesConfig {
    pub num_frames: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SpotsConfig {
    pub num_spots: u32,
}

// Microscope optics and camera background
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OpticsConfig {
    pub pixel_size_um: f64,
    pub psf_width_px: f64,
    pub single_emitter_intensity: f64,
    #[serde(default)]
    pub bg_mean: f64,
    #[serde(default)]
    pub bg_std: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DynamicsConfig {
    pub diffusion_coeff_um2_per_s: f64,
    pub frame_time_s: f64,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BleachModel {
    /// Whole spots bleach and are replaced by a fresh fluorophore elsewhere.
    Continuous,
    /// Spots hold several molecules that bleach one at a time.
    Stepwise,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BleachingConfig {
    #[serde(default = "default_bleach_model")]
    pub model: BleachModel,
    /// Mean number of frames before a spot bleaches (continuous model). Zero or less disables bleaching.
    #[serde(default)]
    pub bleach_time_frames: f64,
    /// Per-molecule, per-frame bleach probability (stepwise model).
    #[serde(default)]
    pub p_bleach_per_frame: f64,
    /// Fixed molecule count per spot. When absent, counts are drawn from [1, max_spot_molecules].
    #[serde(default)]
    pub num_spot_molecules: Option<u32>,
    #[serde(default = "default_max_spot_molecules")]
    pub max_spot_molecules: u32,
    #[serde(default)]
    pub stepwise_diffusion: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct RunConfig {
    /// 0 means "pick a seed from entropy".
    #[serde(default)]
    pub seed: u64,
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    #[serde(default = "default_stack_format")]
    pub stack_format: String, // "png", "bincode", "messagepack", "json"
    #[serde(default = "default_save_trajectories")]
    pub save_trajectories: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DetectionConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Pixels strictly above this value are treated as foreground.
    #[serde(default)]
    pub threshold: f64,
    #[serde(default = "default_erode_radius")]
    pub erode_radius: usize,
}

fn default_bleach_model() -> BleachModel {
    BleachModel::Continuous
}

fn default_max_spot_molecules() -> u32 {
    1
}

fn default_stack_format() -> String {
    "png".to_string()
}

fn default_save_trajectories() -> bool {
    true
}

fn default_erode_radius() -> usize {
    16
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            enabled: false,
            threshold: 0.0,
            erode_radius: default_erode_radius(),
        }
    }
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub frames: FramesConfig,
    pub spots: SpotsConfig,
    pub optics: OpticsConfig,
    pub dynamics: DynamicsConfig,
    pub bleaching: BleachingConfig,
    #[serde(default)]
    pub run: RunConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;
        Ok(config)
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects geometry and rates the simulator cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.frames.num_frames == 0 {
            anyhow::bail!("num_frames must be greater than 0.");
        }
        if self.frames.width == 0 || self.frames.height == 0 {
            anyhow::bail!(
                "Frame dimensions must be positive (got {}x{}).",
                self.frames.width,
                self.frames.height
            );
        }
        if self.spots.num_spots == 0 {
            anyhow::bail!("num_spots must be greater than 0.");
        }
        if !(self.optics.pixel_size_um > 0.0) {
            anyhow::bail!("pixel_size_um must be positive.");
        }
        if !(self.optics.psf_width_px > 0.0) {
            anyhow::bail!("psf_width_px must be positive.");
        }
        if !(self.optics.single_emitter_intensity >= 0.0) {
            anyhow::bail!("single_emitter_intensity must be non-negative.");
        }
        if !(self.optics.bg_std >= 0.0) || !self.optics.bg_mean.is_finite() {
            anyhow::bail!("Background noise needs a finite mean and a non-negative std.");
        }
        if !(self.dynamics.diffusion_coeff_um2_per_s >= 0.0) {
            anyhow::bail!("diffusion_coeff_um2_per_s must be non-negative.");
        }
        if !(self.dynamics.frame_time_s >= 0.0) {
            anyhow::bail!("frame_time_s must be non-negative.");
        }
        if !(0.0..=1.0).contains(&self.bleaching.p_bleach_per_frame) {
            anyhow::bail!(
                "p_bleach_per_frame must lie in [0, 1] (got {}).",
                self.bleaching.p_bleach_per_frame
            );
        }
        if self.bleaching.model == BleachModel::Stepwise {
            match self.bleaching.num_spot_molecules {
                Some(0) => anyhow::bail!("num_spot_molecules must be at least 1."),
                Some(_) => {}
                None if self.bleaching.max_spot_molecules == 0 => {
                    anyhow::bail!("max_spot_molecules must be at least 1.")
                }
                None => {}
            }
        }
        if self.detection.enabled && self.detection.erode_radius == 0 {
            anyhow::bail!("erode_radius must be at least 1 when detection is enabled.");
        }
        Ok(())
    }

    /// Converts the configuration into simulation parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        let pixel_size = self.optics.pixel_size_um;
        let diffusion_coeff = self.dynamics.diffusion_coeff_um2_per_s;
        let frame_time = self.dynamics.frame_time_s;

        // Per-axis Brownian step in pixels
        let diffusion_step_px = (2.0 * diffusion_coeff * frame_time).sqrt() / pixel_size;

        SimParams {
            num_frames: self.frames.num_frames as usize,
            num_spots: self.spots.num_spots as usize,
            frame_width: self.frames.width as usize,
            frame_height: self.frames.height as usize,
            pixel_size,
            diffusion_coeff,
            frame_time,
            diffusion_step_px,
            single_emitter_intensity: self.optics.single_emitter_intensity,
            psf_width: self.optics.psf_width_px,
            bg_mean: self.optics.bg_mean,
            bg_std: self.optics.bg_std,
            bleach_model: self.bleaching.model,
            bleach_time: self.bleaching.bleach_time_frames,
            p_bleach_per_frame: self.bleaching.p_bleach_per_frame,
            num_spot_molecules: self.bleaching.num_spot_molecules,
            max_spot_molecules: self.bleaching.max_spot_molecules,
            stepwise_diffusion: self.bleaching.stepwise_diffusion,
        }
    }
}
