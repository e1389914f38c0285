//! # Parallelism Utilities (CPU Threading)
//!
//! Patch-level data parallelism on top of `rayon`. Both helpers gather results
//! in index order, so the parallel and sequential paths produce bit-identical
//! output regardless of how rayon schedules the work.

use crate::matrix::Scalar;
use ndarray::Array2;
use rayon::prelude::*;
use std::ops::Range;

/// Patches per work item in chunked reductions.
pub const REDUCTION_CHUNK: usize = 256;

/// Evaluates `f(i)` for every `i in 0..len`, on the rayon pool when `parallel`.
pub fn map_indices<T, F>(len: usize, parallel: bool, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    if parallel {
        (0..len).into_par_iter().map(f).collect()
    } else {
        (0..len).map(f).collect()
    }
}

/// Splits `0..len` into [`REDUCTION_CHUNK`]-sized ranges.
pub fn chunk_ranges(len: usize) -> Vec<Range<usize>> {
    (0..len)
        .step_by(REDUCTION_CHUNK)
        .map(|start| start..(start + REDUCTION_CHUNK).min(len))
        .collect()
}

/// Sum-reduction of per-chunk partial matrices over `0..len`.
///
/// Partials are summed in chunk order after the (possibly parallel) map.
pub fn chunked_sum<F>(len: usize, shape: (usize, usize), parallel: bool, partial: F) -> Array2<Scalar>
where
    F: Fn(Range<usize>) -> Array2<Scalar> + Sync + Send,
{
    let ranges = chunk_ranges(len);
    let partials = map_indices(ranges.len(), parallel, |c| partial(ranges[c].clone()));
    partials
        .into_iter()
        .fold(Array2::zeros(shape), |mut acc, part| {
            acc += &part;
            acc
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_preserves_order() {
        let seq = map_indices(1000, false, |i| i * i);
        let par = map_indices(1000, true, |i| i * i);
        assert_eq!(seq, par);
        assert_eq!(par[31], 961);
    }

    #[test]
    fn chunk_ranges_cover_everything() {
        let ranges = chunk_ranges(REDUCTION_CHUNK * 2 + 5);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[2], REDUCTION_CHUNK * 2..REDUCTION_CHUNK * 2 + 5);
        assert!(chunk_ranges(0).is_empty());
    }

    #[test]
    fn chunked_sum_matches_direct_sum() {
        let len = 700;
        let total = chunked_sum(len, (1, 1), true, |range| {
            Array2::from_elem((1, 1), range.map(|i| i as Scalar).sum::<Scalar>())
        });
        assert_eq!(total[[0, 0]], (len * (len - 1) / 2) as Scalar);
    }
}
