// SPDX-License-Identifier: AGPL-3.0-only

//! Row-major matrix-vector products over batches.
//!
//! `w` is `[out_size × in_size]`. Every output element is an independent dot
//! product, so both directions parallelise over `(sample, row)` pairs.

use rayon::prelude::*;

/// `y[b, i] = Σ_j w[i, j] · x[b, j]` for `batch` samples.
pub(crate) fn matvec(
    w: &[f32],
    out_size: usize,
    in_size: usize,
    x: &[f32],
    batch: usize,
) -> Vec<f32> {
    debug_assert_eq!(w.len(), out_size * in_size);
    debug_assert_eq!(x.len(), batch * in_size);
    let mut y = vec![0.0f32; batch * out_size];
    y.par_iter_mut().enumerate().for_each(|(k, out)| {
        let (b, i) = (k / out_size, k % out_size);
        let row = &w[i * in_size..(i + 1) * in_size];
        let sample = &x[b * in_size..(b + 1) * in_size];
        *out = row.iter().zip(sample).map(|(w, x)| w * x).sum();
    });
    y
}

/// `y[b, j] = Σ_i w[i, j] · d[b, i]` for `batch` samples.
pub(crate) fn matvec_transposed(
    w: &[f32],
    out_size: usize,
    in_size: usize,
    d: &[f32],
    batch: usize,
) -> Vec<f32> {
    debug_assert_eq!(w.len(), out_size * in_size);
    debug_assert_eq!(d.len(), batch * out_size);
    let mut y = vec![0.0f32; batch * in_size];
    y.par_iter_mut().enumerate().for_each(|(k, out)| {
        let (b, j) = (k / in_size, k % in_size);
        let sample = &d[b * out_size..(b + 1) * out_size];
        *out = sample
            .iter()
            .enumerate()
            .map(|(i, d)| w[i * in_size + j] * d)
            .sum();
    });
    y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_and_transpose_agree() {
        let w = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(matvec(&w, 2, 3, &[1.0, 0.0, -1.0], 1), vec![-2.0, -2.0]);
        assert_eq!(matvec_transposed(&w, 2, 3, &[1.0, 1.0], 1), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn batches_are_independent() {
        let w = [2.0, 0.0, 0.0, 3.0];
        let y = matvec(&w, 2, 2, &[1.0, 1.0, -1.0, 2.0], 2);
        assert_eq!(y, vec![2.0, 3.0, -2.0, 6.0]);
    }
}
