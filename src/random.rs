/*!
Seeded random numbers for the samplers.

Every sampler owns exactly one [`RandomSource`]. The generator is ChaCha8, whose output
stream is fixed by the seed alone, so a chain run on one machine can be replayed bit for
bit on another.
*/

use ndarray::Array1;
use rand::{thread_rng, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

/// A seeded pseudo-random generator producing uniform and standard-normal draws.
///
/// Cloning a `RandomSource` snapshots its state: the clone continues with exactly the
/// same sequence as the generator it was cloned from.
///
/// # Examples
///
/// ```rust
/// use metropolis_mcmc::random::RandomSource;
///
/// let mut a = RandomSource::new(7);
/// let mut b = RandomSource::new(7);
/// assert_eq!(a.uniform(), b.uniform());
/// assert_eq!(a.standard_normal(3), b.standard_normal(3));
/// ```
#[derive(Debug, Clone)]
pub struct RandomSource {
    seed: u64,
    rng: ChaCha8Rng,
}

impl RandomSource {
    /// Creates a generator whose stream is fully determined by `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Creates a generator from a seed drawn from the thread-local entropy source.
    pub fn from_entropy() -> Self {
        Self::new(thread_rng().gen::<u64>())
    }

    /// The seed this generator was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// A uniform draw in `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// `n` independent standard-normal draws.
    pub fn standard_normal(&mut self, n: usize) -> Array1<f64> {
        Array1::from_iter((0..n).map(|_| self.rng.sample::<f64, _>(StandardNormal)))
    }

    /// A uniform integer in `[0, n)`. `n` must be positive.
    pub fn index(&mut self, n: usize) -> usize {
        // Sampled as u64 so the stream does not depend on the platform's usize width.
        self.rng.gen_range(0..n as u64) as usize
    }

    /// A stretch factor drawn from `g(z) ∝ 1/√z` on `[1/a, a]`.
    pub fn stretch(&mut self, a: f64) -> f64 {
        let u = self.uniform();
        let root = (a - 1.0) * u + 1.0;
        root * root / a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn same_seed_same_stream() {
        let mut a = RandomSource::new(42);
        let mut b = RandomSource::new(42);
        for _ in 0..100 {
            assert_eq!(a.uniform().to_bits(), b.uniform().to_bits());
        }
        assert_eq!(a.standard_normal(50), b.standard_normal(50));
        assert_eq!(a.index(17), b.index(17));
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = RandomSource::new(1);
        let mut b = RandomSource::new(2);
        assert_ne!(a.standard_normal(8), b.standard_normal(8));
    }

    #[test]
    fn clone_is_a_snapshot() {
        let mut a = RandomSource::new(3);
        a.uniform();
        let mut snapshot = a.clone();
        assert_eq!(a.standard_normal(4), snapshot.standard_normal(4));
        assert_eq!(snapshot.seed(), 3);
    }

    #[test]
    fn uniform_in_unit_interval() {
        let mut rng = RandomSource::new(9);
        for _ in 0..10_000 {
            let u = rng.uniform();
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn standard_normal_moments() {
        let mut rng = RandomSource::new(11);
        let z = rng.standard_normal(200_000);
        let mean = z.mean().unwrap();
        let var = z.var(1.0);
        assert_abs_diff_eq!(mean, 0.0, epsilon = 0.01);
        assert_abs_diff_eq!(var, 1.0, epsilon = 0.02);
    }

    #[test]
    fn index_covers_range() {
        let mut rng = RandomSource::new(5);
        let mut seen = [false; 6];
        for _ in 0..1_000 {
            let i = rng.index(6);
            assert!(i < 6);
            seen[i] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn stretch_within_bounds_with_expected_mean() {
        // For a = 2, E[z] = 7/6.
        let a = 2.0;
        let mut rng = RandomSource::new(21);
        let n = 200_000;
        let mut sum = 0.0;
        for _ in 0..n {
            let z = rng.stretch(a);
            assert!(z >= 1.0 / a && z <= a, "z = {z} out of range");
            sum += z;
        }
        assert_abs_diff_eq!(sum / n as f64, 7.0 / 6.0, epsilon = 0.005);
    }
}
