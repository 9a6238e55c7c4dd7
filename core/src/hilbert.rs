//! Hilbert curve ordering of points in $\mathbb{R}^d$.
//!
//! SQMC needs the particles in an order that preserves locality so that the
//! inverse-CDF step maps close uniforms to close particles. Points are
//! (a) standardised column by column, (b) mapped to $(0,1)^d$ by a logistic
//! transform, (c) quantised on a grid of $2^b$ cells per axis and (d) sorted
//! by the index of their cell along the Hilbert curve.
//!
//! The cell index is computed with Skilling's transpose algorithm
//! (J. Skilling, *Programming the Hilbert curve*, AIP Conf. Proc. 707, 2004).
use nalgebra::DMatrix;

use crate::error::SmcError;

/// Largest dimension whose Hilbert index fits in a `u64` (one bit per axis).
pub const MAX_DIM: usize = 64;

fn invlogit(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Convert grid coordinates (each `bits` wide) in place to the "transposed"
/// Hilbert index.
fn axes_to_transpose(x: &mut [u64], bits: u32) {
    let n = x.len();
    let m = 1u64 << (bits - 1);
    // inverse undo
    let mut q = m;
    while q > 1 {
        let p = q - 1;
        for i in 0..n {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q >>= 1;
    }
    // Gray encode
    for i in 1..n {
        x[i] ^= x[i - 1];
    }
    let mut t = 0;
    let mut q = m;
    while q > 1 {
        if x[n - 1] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for xi in x.iter_mut() {
        *xi ^= t;
    }
}

/// Hilbert index of a point of the grid $\{0, \dots, 2^{bits}-1\}^d$.
///
/// `coords.len() * bits` must not exceed 64, otherwise the leading bits of
/// the index are lost.
pub fn hilbert_index(coords: &[u64], bits: u32) -> u64 {
    let mut x = coords.to_vec();
    axes_to_transpose(&mut x, bits);
    let mut h = 0u64;
    for b in (0..bits).rev() {
        for xi in &x {
            h = (h << 1) | ((xi >> b) & 1);
        }
    }
    h
}

/// Argsort of the rows of `x` along the Hilbert curve.
///
/// In dimension one this is a plain argsort. Fails beyond [`MAX_DIM`]
/// columns, where a single bit per axis no longer fits in the index.
pub fn hilbert_sort(x: &DMatrix<f64>) -> Result<Vec<usize>, SmcError> {
    let (n, d) = x.shape();
    if d > MAX_DIM {
        return Err(SmcError::InvalidModel(format!(
            "Hilbert sort supports at most {MAX_DIM} dimensions, got {d}"
        )));
    }
    let mut order: Vec<usize> = (0..n).collect();
    if d == 1 {
        order.sort_by(|&a, &b| x[(a, 0)].total_cmp(&x[(b, 0)]));
        return Ok(order);
    }
    let bits = (62 / d as u32).max(1);
    let maxint = ((1u64 << bits) - 1) as f64;
    let means = x.row_mean();
    let mut stds: Vec<f64> = (0..d)
        .map(|j| {
            let c = x.column(j);
            let m = means[j];
            (c.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / n as f64).sqrt()
        })
        .collect();
    stds.iter_mut().filter(|s| **s <= 0.0).for_each(|s| *s = 1.0);
    let keys: Vec<u64> = (0..n)
        .map(|i| {
            let cell: Vec<u64> = (0..d)
                .map(|j| (invlogit((x[(i, j)] - means[j]) / stds[j]) * maxint).floor() as u64)
                .collect();
            hilbert_index(&cell, bits)
        })
        .collect();
    order.sort_by_key(|&i| keys[i]);
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_dimensional_curve_order() {
        // first-order Hilbert curve: (0,0) -> (0,1) -> (1,1) -> (1,0)
        // up to orientation; consecutive cells must be adjacent
        let cells = [[0u64, 0], [0, 1], [1, 0], [1, 1]];
        let mut by_index: Vec<(u64, [u64; 2])> =
            cells.iter().map(|c| (hilbert_index(c, 1), *c)).collect();
        by_index.sort();
        let indices: Vec<u64> = by_index.iter().map(|(h, _)| *h).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        for pair in by_index.windows(2) {
            let (a, b) = (pair[0].1, pair[1].1);
            let dist = a[0].abs_diff(b[0]) + a[1].abs_diff(b[1]);
            assert_eq!(dist, 1);
        }
    }

    #[test]
    fn indices_are_a_bijection_with_adjacent_steps() {
        let bits = 3;
        let side = 1u64 << bits;
        let mut cells = Vec::new();
        for a in 0..side {
            for b in 0..side {
                cells.push((hilbert_index(&[a, b], bits), [a, b]));
            }
        }
        cells.sort();
        for (k, (h, _)) in cells.iter().enumerate() {
            assert_eq!(*h, k as u64);
        }
        for pair in cells.windows(2) {
            let (a, b) = (pair[0].1, pair[1].1);
            assert_eq!(a[0].abs_diff(b[0]) + a[1].abs_diff(b[1]), 1);
        }
    }

    #[test]
    fn sort_is_a_permutation() {
        let x = DMatrix::from_row_slice(5, 2, &[0.1, 2.0, -1.0, 0.5, 3.0, 3.0, 0.0, 0.0, 1.5, -2.0]);
        let mut order = hilbert_sort(&x).unwrap();
        order.sort();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn one_dimensional_is_argsort() {
        let x = DMatrix::from_column_slice(4, 1, &[3.0, -1.0, 2.0, 0.0]);
        assert_eq!(hilbert_sort(&x).unwrap(), vec![1, 3, 2, 0]);
    }

    #[test]
    fn dimension_limit() {
        let x = DMatrix::from_fn(8, MAX_DIM, |i, j| ((i * 7 + j * 3) % 11) as f64);
        let mut order = hilbert_sort(&x).unwrap();
        order.sort();
        assert_eq!(order, (0..8).collect::<Vec<_>>());
        let wide = DMatrix::from_fn(8, MAX_DIM + 1, |i, j| (i + j) as f64);
        assert!(matches!(hilbert_sort(&wide), Err(SmcError::InvalidModel(_))));
    }
}
