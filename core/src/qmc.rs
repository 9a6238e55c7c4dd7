//! Randomised low-discrepancy point sets for SQMC.
//!
//! Component j of a Halton sequence is the van der Corput sequence in base
//! $b_j$, the j-th prime. The points are randomised by a uniform shift
//! modulo one (Cranley-Patterson rotation), which keeps the low discrepancy
//! of the set while making every point marginally uniform.
use nalgebra::DMatrix;
use rand::Rng;

/// The first `k` prime numbers.
pub fn primes(k: usize) -> Vec<u64> {
    let mut out: Vec<u64> = Vec::with_capacity(k);
    let mut candidate = 2u64;
    while out.len() < k {
        if out
            .iter()
            .take_while(|&&p| p * p <= candidate)
            .all(|&p| candidate % p != 0)
        {
            out.push(candidate);
        }
        candidate += 1;
    }
    out
}

/// Radical inverse of `i` in base `b`.
pub fn radical_inverse(mut i: u64, b: u64) -> f64 {
    let inv = 1.0 / b as f64;
    let mut f = inv;
    let mut r = 0.0;
    while i > 0 {
        r += (i % b) as f64 * f;
        i /= b;
        f *= inv;
    }
    r
}

/// `n` points of the (unrandomised) Halton sequence in dimension `dim`,
/// skipping the origin. One point per row.
pub fn halton(n: usize, dim: usize) -> DMatrix<f64> {
    halton_from(1, n, dim)
}

fn halton_from(start: u64, n: usize, dim: usize) -> DMatrix<f64> {
    let bases = primes(dim);
    DMatrix::from_fn(n, dim, |i, j| radical_inverse(start + i as u64, bases[j]))
}

/// `n` points of a randomly shifted Halton sequence, strictly inside
/// $(0,1)^{dim}$. The origin is kept: after the shift it is an ordinary
/// point of the set.
pub fn randomized_halton<R: Rng + ?Sized>(n: usize, dim: usize, rng: &mut R) -> DMatrix<f64> {
    let shift: Vec<f64> = (0..dim).map(|_| rng.random::<f64>()).collect();
    let mut u = halton_from(0, n, dim);
    for j in 0..dim {
        for i in 0..n {
            let mut v = u[(i, j)] + shift[j];
            if v >= 1.0 {
                v -= 1.0;
            }
            u[(i, j)] = v.clamp(f64::EPSILON, 1.0 - f64::EPSILON);
        }
    }
    u
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn first_primes() {
        assert_eq!(primes(6), vec![2, 3, 5, 7, 11, 13]);
    }

    #[test]
    fn van_der_corput_base_two() {
        assert_approx_eq!(radical_inverse(1, 2), 0.5);
        assert_approx_eq!(radical_inverse(2, 2), 0.25);
        assert_approx_eq!(radical_inverse(3, 2), 0.75);
        assert_approx_eq!(radical_inverse(5, 3), 7.0 / 9.0);
    }

    #[test]
    fn randomized_points_cover_strata() {
        let mut rng = StdRng::seed_from_u64(11);
        let n = 64;
        let u = randomized_halton(n, 2, &mut rng);
        assert_eq!(u.shape(), (n, 2));
        // a shifted van der Corput set in base 2 puts exactly one point in
        // each interval [k/64, (k+1)/64)
        let mut hits = vec![0; n];
        for i in 0..n {
            let v = u[(i, 0)];
            assert!(v > 0.0 && v < 1.0);
            hits[((v * n as f64) as usize).min(n - 1)] += 1;
        }
        assert!(hits.iter().all(|&h| h == 1));
    }
}
