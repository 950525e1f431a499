use super::DetectionError;

const HALF_MAX: f64 = 0.5;

/// Width and location of the dominant peak in a 1D profile, in index units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakWidth {
    /// Distance between the leading and trailing half-maximum crossings.
    /// Zero when the peak runs off the end of the profile.
    pub width: f64,
    /// Index of the extremum the width was measured around.
    pub peak_index: usize,
}

impl PeakWidth {
    /// True when the trailing edge was never found before the end of the profile.
    pub fn is_truncated(&self) -> bool {
        self.width == 0.0
    }
}

/// Which side of half maximum a sample sits on: -1, 0 (exactly on it) or +1.
fn side(value: f64) -> i8 {
    let d = value - HALF_MAX;
    if d > 0.0 {
        1
    } else if d < 0.0 {
        -1
    } else {
        0
    }
}

/// Position between `i - 1` and `i` where the profile crosses half maximum.
fn crossing(data: &[f64], i: usize) -> f64 {
    let (lo, hi) = (data[i - 1], data[i]);
    (i - 1) as f64 + (HALF_MAX - lo) / (hi - lo)
}

/// Full width at half maximum of the dominant peak of `profile`.
///
/// The profile is normalised by its maximum. If the first sample is below half
/// maximum the peak is taken to be bright (global maximum), otherwise a dark dip
/// (global minimum). The leading crossing is the first half-maximum crossing from
/// the start; the trailing crossing is searched from the peak towards the
/// second-to-last sample. Both crossings are linearly interpolated.
pub fn fwhm(profile: &[f64]) -> Result<PeakWidth, DetectionError> {
    if profile.is_empty() {
        return Err(DetectionError::EmptyProfile);
    }
    let max = profile.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max > 0.0) || !max.is_finite() {
        return Err(DetectionError::FlatProfile);
    }
    let data: Vec<f64> = profile.iter().map(|&v| v / max).collect();
    let last = data.len() - 1;

    let peak_index = if data[0] < HALF_MAX {
        argmax(&data)
    } else {
        argmin(&data)
    };

    let leading = (1..data.len())
        .find(|&i| side(data[i]) != side(data[i - 1]))
        .map(|i| crossing(&data, i))
        .ok_or(DetectionError::NoPeakFound)?;

    let mut i = peak_index + 1;
    if i > last {
        return Ok(PeakWidth { width: 0.0, peak_index });
    }
    while i < last && side(data[i]) == side(data[i - 1]) {
        i += 1;
    }
    if i == last {
        return Ok(PeakWidth { width: 0.0, peak_index });
    }

    Ok(PeakWidth {
        width: crossing(&data, i) - leading,
        peak_index,
    })
}

// First index of the largest sample
fn argmax(data: &[f64]) -> usize {
    data.iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

fn argmin(data: &[f64]) -> usize {
    data.iter()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, &v)| if v < best.1 { (i, v) } else { best })
        .0
}
