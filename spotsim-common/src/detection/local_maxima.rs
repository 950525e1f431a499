use ndarray::{s, ArrayView2};

/// Interior pixels that are non-zero and at least as large as every pixel in their 3x3
/// neighbourhood, in row-major order.
///
/// The outermost row and column on each side are never reported. Plateaus report every
/// pixel on them.
pub fn find_local_maxima<T>(field: ArrayView2<'_, T>) -> Vec<(usize, usize)>
where
    T: Copy + PartialOrd + Default,
{
    let (rows, cols) = field.dim();
    let zero = T::default();
    let mut maxima = Vec::new();

    for i in 1..rows.saturating_sub(1) {
        for j in 1..cols.saturating_sub(1) {
            let value = field[[i, j]];
            if value == zero {
                continue;
            }
            let window = field.slice(s![i - 1..i + 2, j - 1..j + 2]);
            if window.iter().all(|&n| n <= value) {
                maxima.push((i, j));
            }
        }
    }

    maxima
}
