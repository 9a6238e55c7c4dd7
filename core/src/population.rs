//! Particle containers.
//!
//! The engine never looks inside a particle: it only needs to count,
//! select (with repetitions) and join collections of particles. Any type
//! implementing [`Population`] can therefore be used as the state of a
//! Feynman-Kac model; `Vec<T>` is the usual choice.

/// An indexable, homogeneous collection of N particles.
pub trait Population: Clone {
    /// Number of particles.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// New collection made of the particles at `indices`, in that order
    /// (indices may repeat).
    fn gather(&self, indices: &[usize]) -> Self;

    /// Concatenation of several collections.
    fn concat(parts: &[Self]) -> Self;
}

impl<T: Clone> Population for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn gather(&self, indices: &[usize]) -> Self {
        indices.iter().map(|&i| self[i].clone()).collect()
    }

    fn concat(parts: &[Self]) -> Self {
        parts.iter().flat_map(|p| p.iter().cloned()).collect()
    }
}

/// Pair up two slices element by element, repeating a length-one side.
///
/// Model callables such as a transition density receive either two
/// collections of the same length or one collection and a single particle;
/// this helper covers both cases.
pub fn broadcast<'a, A, B>(a: &'a [A], b: &'a [B]) -> impl Iterator<Item = (&'a A, &'a B)> + 'a {
    let len = if a.len() == 1 { b.len() } else { a.len() };
    assert!(
        a.len() == b.len() || a.len() == 1 || b.len() == 1,
        "cannot broadcast collections of length {} and {}",
        a.len(),
        b.len()
    );
    (0..len).map(move |i| {
        let ia = if a.len() == 1 { 0 } else { i };
        let ib = if b.len() == 1 { 0 } else { i };
        (&a[ia], &b[ib])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_with_repeats() {
        let x = vec![10, 20, 30];
        assert_eq!(x.gather(&[2, 0, 2]), vec![30, 10, 30]);
    }

    #[test]
    fn concat_parts() {
        let parts = vec![vec![1.0], vec![2.0, 3.0]];
        assert_eq!(<Vec<f64> as Population>::concat(&parts), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn broadcast_single_side() {
        let a = [1, 2, 3];
        let b = [10];
        let pairs: Vec<(i32, i32)> = broadcast(&a, &b).map(|(x, y)| (*x, *y)).collect();
        assert_eq!(pairs, vec![(1, 10), (2, 10), (3, 10)]);
        let pairs: Vec<(i32, i32)> = broadcast(&b, &a).map(|(x, y)| (*x, *y)).collect();
        assert_eq!(pairs, vec![(10, 1), (10, 2), (10, 3)]);
    }
}
