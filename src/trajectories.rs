use anyhow::{Context, Result};
use log::info;
use serde::Serialize;
use spotsim_common::{OutputConfig, SpotFrame, Vec2};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One observation of a trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryPoint {
    pub frame: usize,
    pub position: Vec2,
    pub intensity: f64,
}

/// All records sharing a trajectory id, in frame order.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub id: u32,
    pub points: Vec<TrajectoryPoint>,
}

impl Trajectory {
    pub fn start_frame(&self) -> Option<usize> {
        self.points.first().map(|p| p.frame)
    }

    pub fn end_frame(&self) -> Option<usize> {
        self.points.last().map(|p| p.frame)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }
}

#[derive(Serialize)]
struct TrajectoryRow {
    trajectory: u32,
    frame: usize,
    x: f64,
    y: f64,
    intensity: f64,
}

#[derive(Serialize)]
struct GroundTruthRow {
    spot: usize,
    molecules: u32,
}

/// Links per-frame spot records into trajectories by id, ordered by id.
pub fn build_trajectories(frames: &[SpotFrame]) -> Vec<Trajectory> {
    let mut by_id: BTreeMap<u32, Vec<TrajectoryPoint>> = BTreeMap::new();

    for spots in frames {
        for ((&id, &position), &intensity) in spots
            .traj_num
            .iter()
            .zip(&spots.positions)
            .zip(&spots.spot_intensity)
        {
            by_id.entry(id).or_default().push(TrajectoryPoint {
                frame: spots.frame,
                position,
                intensity,
            });
        }
    }

    by_id
        .into_iter()
        .map(|(id, mut points)| {
            points.sort_by_key(|p| p.frame);
            Trajectory { id, points }
        })
        .collect()
}

/// Writes trajectories as CSV. Simulated ground truth goes to a separately named file.
pub fn write_trajectories(trajectories: &[Trajectory], output: &OutputConfig, simulated: bool) -> Result<PathBuf> {
    let suffix = if simulated { "simulated_trajectories" } else { "trajectories" };
    let filename = PathBuf::from(format!("{}_{}.csv", output.base_filename, suffix));

    let mut writer = csv::Writer::from_path(&filename)
        .with_context(|| format!("Error creating trajectory file '{}'", filename.display()))?;
    for trajectory in trajectories {
        for point in &trajectory.points {
            writer.serialize(TrajectoryRow {
                trajectory: trajectory.id,
                frame: point.frame,
                x: point.position.x,
                y: point.position.y,
                intensity: point.intensity,
            })?;
        }
    }
    writer.flush()?;

    info!("{} trajectories saved to {}", trajectories.len(), filename.display());
    Ok(filename)
}

/// Writes the initial molecule count of every spot of a stepwise run.
pub fn write_ground_truth(molecules: &[u32], output: &OutputConfig) -> Result<PathBuf> {
    let filename = PathBuf::from(format!("{}_ground_truth.csv", output.base_filename));

    let mut writer = csv::Writer::from_path(&filename)
        .with_context(|| format!("Error creating ground truth file '{}'", filename.display()))?;
    for (spot, &count) in molecules.iter().enumerate() {
        writer.serialize(GroundTruthRow { spot, molecules: count })?;
    }
    writer.flush()?;

    info!("Ground-truth molecule counts saved to {}", filename.display());
    Ok(filename)
}
