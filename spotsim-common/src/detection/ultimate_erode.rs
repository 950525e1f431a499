use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;

use super::distance_list::DistanceList;
use super::local_maxima::find_local_maxima;
use super::DetectionError;

pub const DEFAULT_ERODE_RADIUS: usize = 16;

/// Finds spot centres in a mask as local maxima of its distance-to-background map.
///
/// Holds the `DistanceList` for its radius so repeated frames reuse it.
#[derive(Debug, Clone)]
pub struct UltimateEroder {
    distances: DistanceList,
}

impl Default for UltimateEroder {
    fn default() -> Self {
        Self::new(DEFAULT_ERODE_RADIUS)
    }
}

impl UltimateEroder {
    pub fn new(radius: usize) -> Self {
        UltimateEroder {
            distances: DistanceList::build(radius),
        }
    }

    pub fn radius(&self) -> usize {
        self.distances.radius()
    }

    /// Distance from each non-zero pixel to the nearest zero pixel or the image edge.
    ///
    /// Background pixels get 0. Foreground pixels with no background inside the search
    /// radius also get 0; `erode` treats that as an inconclusive frame.
    pub fn distance_transform<T>(&self, mask: ArrayView2<'_, T>) -> Array2<f64>
    where
        T: Copy + PartialEq + Default + Sync,
    {
        let (rows, cols) = mask.dim();
        let mut field = Array2::<f64>::zeros((rows, cols));
        let zero = T::default();

        field
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut row)| {
                for j in 0..cols {
                    if mask[[i, j]] != zero {
                        row[j] = self.nearest_background(&mask, i, j).unwrap_or(0.0);
                    }
                }
            });

        field
    }

    /// Candidate spot centres as `(row, col)` in row-major order.
    ///
    /// Fails with `DetectionError::Inconclusive` naming the first foreground pixel
    /// (row-major) whose nearest background lies beyond the radius. Callers that just
    /// want "no spots" for such frames can use `unwrap_or_default()`.
    pub fn erode<T>(&self, mask: ArrayView2<'_, T>) -> Result<Vec<(usize, usize)>, DetectionError>
    where
        T: Copy + PartialEq + Default + Sync,
    {
        let field = self.distance_transform(mask.view());
        let zero = T::default();

        if let Some(((row, col), _)) = field
            .indexed_iter()
            .find(|&((i, j), &d)| d == 0.0 && mask[[i, j]] != zero)
        {
            return Err(DetectionError::Inconclusive {
                row,
                col,
                radius: self.radius(),
            });
        }

        Ok(find_local_maxima(field.view()))
    }

    fn nearest_background<T>(&self, mask: &ArrayView2<'_, T>, i: usize, j: usize) -> Option<f64>
    where
        T: Copy + PartialEq + Default,
    {
        let (rows, cols) = mask.dim();
        let zero = T::default();

        self.distances.iter().find_map(|offset| {
            let r = i as isize + offset.drow;
            let c = j as isize + offset.dcol;
            if r < 0 || c < 0 || r >= rows as isize || c >= cols as isize {
                return Some(offset.distance);
            }
            (mask[[r as usize, c as usize]] == zero).then_some(offset.distance)
        })
    }
}

/// One-shot ultimate erosion with a freshly built distance list.
pub fn ultimate_erode<T>(mask: ArrayView2<'_, T>, radius: usize) -> Result<Vec<(usize, usize)>, DetectionError>
where
    T: Copy + PartialEq + Default + Sync,
{
    UltimateEroder::new(radius).erode(mask)
}
