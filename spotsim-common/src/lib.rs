pub mod config;
pub mod detection;
pub mod sim_params;
pub mod spot_frame;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{SimulationConfig, FramesConfig, SpotsConfig, OpticsConfig, DynamicsConfig, BleachingConfig, BleachModel, RunConfig, OutputConfig, DetectionConfig};
pub use detection::{fwhm, find_local_maxima, ultimate_erode, DetectionError, DistanceList, PeakWidth, UltimateEroder};
pub use sim_params::SimParams;
pub use spot_frame::SpotFrame;
pub use vecmath::Vec2;
