use serde::{Deserialize, Serialize};
use crate::vecmath::Vec2;

/// Ground-truth spot records for one simulated frame.
///
/// The three per-spot vectors are parallel and always `num_spots` long. A slot keeps
/// its index for the whole run; when its fluorophore is replaced the slot gets a new
/// trajectory id instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotFrame {
    /// Index of this frame in the sequence.
    pub frame: usize,
    /// Sub-pixel spot centres.
    pub positions: Vec<Vec2>,
    /// Trajectory each slot belongs to in this frame.
    pub traj_num: Vec<u32>,
    /// Emitted-intensity proxy per spot. For continuous bleaching the renderer fills this
    /// with the summed footprint; for stepwise bleaching it is set by the simulator.
    pub spot_intensity: Vec<f64>,
}

impl SpotFrame {
    /// An empty frame with `num_spots` slots, ids `0..num_spots`.
    pub fn new(frame: usize, num_spots: usize) -> Self {
        SpotFrame {
            frame,
            positions: vec![Vec2::zero(); num_spots],
            traj_num: (0..num_spots as u32).collect(),
            spot_intensity: vec![0.0; num_spots],
        }
    }

    pub fn num_spots(&self) -> usize {
        self.positions.len()
    }

    /// Next unused trajectory id among this frame's slots.
    pub fn next_traj_num(&self) -> u32 {
        self.traj_num.iter().copied().max().map_or(0, |max| max + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_frame_ids() {
        let frame = SpotFrame::new(3, 4);
        assert_eq!(frame.frame, 3);
        assert_eq!(frame.traj_num, vec![0, 1, 2, 3]);
        assert_eq!(frame.num_spots(), 4);
        assert_eq!(frame.next_traj_num(), 4);
    }

    #[test]
    fn test_next_traj_num_after_replacement() {
        let mut frame = SpotFrame::new(0, 3);
        frame.traj_num[1] = 7;
        assert_eq!(frame.next_traj_num(), 8);
        assert_eq!(SpotFrame::new(0, 0).next_traj_num(), 0);
    }
}
