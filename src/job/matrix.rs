//! Matrix generation and partial sums
//!
//! Cells are sampled independently and uniformly from `[min, max)` using the
//! xoshiro256++ PRNG. A seed makes a run reproducible; without one the
//! generator is seeded from OS entropy.
//!
//! Partial sums are computed row-parallel with rayon. Floating-point addition
//! is not associative, so a partial sum may differ from a sequential sum in
//! the last few ulps.

use super::{MatrixSize, Partition, ValueRange};
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

/// Dense row-major matrix.
pub type Matrix = Vec<Vec<f64>>;

/// Generate a `size.rows × size.cols` matrix with cells in `[range.min, range.max)`.
///
/// A degenerate range (`min == max`) produces a constant matrix. Callers
/// reject `min > max` before getting here.
pub fn generate_matrix(size: MatrixSize, range: ValueRange, seed: Option<u64>) -> Matrix {
    let mut rng = match seed {
        Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
        None => Xoshiro256PlusPlus::from_entropy(),
    };
    let (min, max) = (range.min as f64, range.max as f64);

    (0..size.rows)
        .map(|_| {
            (0..size.cols)
                .map(|_| if min < max { rng.gen_range(min..max) } else { min })
                .collect()
        })
        .collect()
}

/// Sum of every element whose row falls inside `partition`.
///
/// Rows past the end of the matrix are ignored, so a stale or short matrix
/// never causes an out-of-bounds access.
pub fn partial_sum(matrix: &[Vec<f64>], partition: &Partition) -> f64 {
    let rows = partition.clamped(matrix.len());
    matrix[rows].par_iter().map(|row| row.iter().sum::<f64>()).sum()
}

/// Sum of all elements.
pub fn matrix_sum(matrix: &[Vec<f64>]) -> f64 {
    matrix.par_iter().map(|row| row.iter().sum::<f64>()).sum()
}
