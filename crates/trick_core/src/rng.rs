use rand::Rng;
use rand_distr::{Distribution, Uniform};

/// `length` values drawn uniformly from `[-bound, bound]`.
pub fn uniform_f32(rng: &mut impl Rng, length: usize, bound: f32) -> Vec<f32> {
    let dist = Uniform::new_inclusive(-bound, bound);
    (0..length).map(|_| dist.sample(rng)).collect()
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn uniform_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let vals = uniform_f32(&mut rng, 1000, 0.25);

        assert_eq!(vals.len(), 1000);
        assert!(vals.iter().all(|x| (-0.25..=0.25).contains(x)));
    }

    #[test]
    fn seeded_generation_is_reproducible() {
        let a = uniform_f32(&mut StdRng::seed_from_u64(3), 16, 1.0);
        let b = uniform_f32(&mut StdRng::seed_from_u64(3), 16, 1.0);
        assert_eq!(a, b);
    }
}
