//! Camera noise for rendered frames.
//!
//! Shot noise treats each composited pixel as the mean of a Poisson draw. Background
//! noise is an independent Gaussian per pixel, clamped at zero and truncated to whole
//! counts before it is added.

use anyhow::Result;
use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Normal, Poisson};

/// Replaces every pixel with a Poisson draw whose mean is the pixel value.
pub fn apply_shot_noise<R: Rng + ?Sized>(mean_image: &Array2<u32>, rng: &mut R) -> Result<Array2<u64>> {
    let mut noisy = Array2::<u64>::zeros(mean_image.dim());

    for (out, &mean) in noisy.iter_mut().zip(mean_image.iter()) {
        // Zero mean means zero photons
        if mean > 0 {
            let poisson = Poisson::new(mean as f64)
                .map_err(|e| anyhow::anyhow!("Invalid Poisson mean {}: {}", mean, e))?;
            *out = poisson.sample(rng) as u64;
        }
    }

    Ok(noisy)
}

/// Gaussian background counts with negative draws clamped to zero.
pub fn background_noise<R: Rng + ?Sized>(
    shape: (usize, usize),
    mean: f64,
    std_dev: f64,
    rng: &mut R,
) -> Result<Array2<u64>> {
    if !(std_dev >= 0.0) || !mean.is_finite() {
        anyhow::bail!("Background noise needs a finite mean and a non-negative std (got {}, {}).", mean, std_dev);
    }
    let normal = Normal::new(mean, std_dev)
        .map_err(|e| anyhow::anyhow!("Invalid background noise (mean {}, std {}): {}", mean, std_dev, e))?;

    Ok(Array2::from_shape_simple_fn(shape, || {
        let value = normal.sample(rng);
        if value > 0.0 {
            value as u64
        } else {
            0
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_zero_mean_stays_dark() {
        let mut rng = StdRng::seed_from_u64(1);
        let noisy = apply_shot_noise(&Array2::zeros((8, 8)), &mut rng).unwrap();
        assert!(noisy.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_shot_noise_statistics() {
        let mut rng = StdRng::seed_from_u64(2);
        let mean_image = Array2::<u32>::from_elem((100, 100), 50);
        let noisy = apply_shot_noise(&mean_image, &mut rng).unwrap();

        let n = noisy.len() as f64;
        let mean = noisy.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = noisy.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
        assert_relative_eq!(mean, 50.0, epsilon = 0.5);
        assert_relative_eq!(var, 50.0, epsilon = 3.0);
    }

    #[test]
    fn test_background_non_negative() {
        let mut rng = StdRng::seed_from_u64(3);
        // Mean at zero, so roughly half the draws are clamped
        let bg = background_noise((50, 50), 0.0, 10.0, &mut rng).unwrap();
        let zeros = bg.iter().filter(|&&v| v == 0).count();
        assert!(zeros > 1000 && zeros < 1600);
    }

    #[test]
    fn test_background_statistics() {
        let mut rng = StdRng::seed_from_u64(4);
        let bg = background_noise((100, 100), 200.0, 5.0, &mut rng).unwrap();
        let mean = bg.iter().map(|&v| v as f64).sum::<f64>() / bg.len() as f64;
        // Truncation to whole counts shifts the mean down by about half a count
        assert_relative_eq!(mean, 199.5, epsilon = 0.3);
    }

    #[test]
    fn test_zero_std_background() {
        let mut rng = StdRng::seed_from_u64(5);
        let bg = background_noise((4, 4), 0.0, 0.0, &mut rng).unwrap();
        assert!(bg.iter().all(|&v| v == 0));
        let bg = background_noise((4, 4), 7.9, 0.0, &mut rng).unwrap();
        assert!(bg.iter().all(|&v| v == 7));
    }

    #[test]
    fn test_invalid_background() {
        let mut rng = StdRng::seed_from_u64(6);
        assert!(background_noise((4, 4), 0.0, -1.0, &mut rng).is_err());
        assert!(background_noise((4, 4), 0.0, f64::NAN, &mut rng).is_err());
        assert!(background_noise((4, 4), f64::INFINITY, 1.0, &mut rng).is_err());
    }

    #[test]
    fn test_seeded_noise_repeats() {
        let mean_image = Array2::<u32>::from_elem((16, 16), 20);
        let a = apply_shot_noise(&mean_image, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = apply_shot_noise(&mean_image, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
    }
}
