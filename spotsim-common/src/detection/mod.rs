//! Spot-detection primitives.
//!
//! Stateless helpers used to locate and characterise bright spots in frames:
//! a half-maximum peak width estimator for 1D profiles, and an "ultimate erode"
//! detector that takes local maxima of a bounded Euclidean distance transform to
//! split touching blobs into separate candidate centres.

mod distance_list;
mod fwhm;
mod local_maxima;
mod ultimate_erode;

pub use distance_list::{DistanceList, Offset};
pub use fwhm::{fwhm, PeakWidth};
pub use local_maxima::find_local_maxima;
pub use ultimate_erode::{ultimate_erode, UltimateEroder, DEFAULT_ERODE_RADIUS};

use thiserror::Error;

/// Errors reported by the detection primitives.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("Profile is empty")]
    EmptyProfile,
    #[error("Profile has no positive maximum to normalise by")]
    FlatProfile,
    #[error("Profile never crosses half maximum")]
    NoPeakFound,
    /// A foreground pixel had no background within the search radius, so the distance
    /// transform is undefined there. Frame-local and recoverable.
    #[error("No background within radius {radius} of foreground pixel ({row}, {col})")]
    Inconclusive { row: usize, col: usize, radius: usize },
}
