use crate::image_stack::ImageStack;
use log::{debug, info, warn};
use ndarray::{s, Array2};
use spotsim_common::{fwhm, DetectionConfig, DetectionError, UltimateEroder};

/// Detection summary for one rendered frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSpotCheck {
    pub frame: usize,
    /// Candidate centres as `(row, col)`. `None` when the frame was inconclusive.
    pub candidates: Option<Vec<(usize, usize)>>,
    /// Mean half-maximum width of the row profiles through the candidates.
    pub mean_fwhm: Option<f64>,
}

/// Thresholds each frame, runs ultimate erosion on the mask and measures the width of
/// every candidate along its row.
pub fn run_spot_check(stack: &ImageStack, config: &DetectionConfig) -> Vec<FrameSpotCheck> {
    let eroder = UltimateEroder::new(config.erode_radius);
    info!(
        "Spot check on {} frames (threshold {}, erode radius {})",
        stack.num_frames(),
        config.threshold,
        eroder.radius()
    );

    let checks: Vec<FrameSpotCheck> = stack
        .frames()
        .iter()
        .enumerate()
        .map(|(index, frame)| check_frame(index, frame, config.threshold, &eroder))
        .collect();

    let inconclusive = checks.iter().filter(|c| c.candidates.is_none()).count();
    let found: usize = checks.iter().filter_map(|c| c.candidates.as_ref()).map(Vec::len).sum();
    info!("Spot check found {} candidates; {} frames inconclusive", found, inconclusive);
    checks
}

fn check_frame(index: usize, frame: &Array2<u16>, threshold: f64, eroder: &UltimateEroder) -> FrameSpotCheck {
    let mask = frame.mapv(|v| v as f64 > threshold);

    let candidates = match eroder.erode(mask.view()) {
        Ok(candidates) => candidates,
        Err(e @ DetectionError::Inconclusive { .. }) => {
            warn!("Frame {}: unable to find any spots ({})", index, e);
            return FrameSpotCheck { frame: index, candidates: None, mean_fwhm: None };
        }
        Err(e) => {
            warn!("Frame {}: detection failed ({})", index, e);
            return FrameSpotCheck { frame: index, candidates: None, mean_fwhm: None };
        }
    };

    let widths: Vec<f64> = candidates
        .iter()
        .filter_map(|&(row, col)| row_width(frame, row, col, eroder.radius()))
        .collect();
    let mean_fwhm = (!widths.is_empty()).then(|| widths.iter().sum::<f64>() / widths.len() as f64);

    debug!(
        "Frame {}: {} candidates, mean FWHM {:?}",
        index,
        candidates.len(),
        mean_fwhm
    );
    FrameSpotCheck { frame: index, candidates: Some(candidates), mean_fwhm }
}

/// FWHM of the background-subtracted row profile within `half_window` of `col`.
fn row_width(frame: &Array2<u16>, row: usize, col: usize, half_window: usize) -> Option<f64> {
    let start = col.saturating_sub(half_window);
    let end = (col + half_window + 1).min(frame.ncols());
    let window = frame.slice(s![row, start..end]);

    let floor = window.iter().copied().min()? as f64;
    let profile: Vec<f64> = window.iter().map(|&v| v as f64 - floor).collect();
    match fwhm(&profile) {
        Ok(peak) if !peak.is_truncated() => Some(peak.width),
        _ => None,
    }
}
