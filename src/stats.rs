//! Convergence diagnostics for recorded chains.
//!
//! - [`autocorr_function`] and [`integrated_time`]: normalized autocorrelation of a scalar
//!   series (via FFT) and its integrated autocorrelation time with an automatic window.
//! - [`effective_sample_size`]: per-parameter `n / τ`.
//! - [`rhat`]: the potential scale reduction factor across independent chains.

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::error::{Result, SamplerError};

/// Window constant of the automatic windowing procedure for [`integrated_time`].
pub const DEFAULT_WINDOW_CONSTANT: f64 = 5.0;

/// Normalized autocorrelation function of `x`, `ρ(0) = 1`, for every lag `0..n`.
///
/// The series is zero-padded to a power of two of at least `2n - 1` so the circular FFT
/// convolution does not wrap around.
pub fn autocorr_function(x: ArrayView1<f64>) -> Result<Array1<f64>> {
    let n = x.len();
    if n == 0 {
        return Err(SamplerError::Validation(
            "autocorrelation of an empty series".into(),
        ));
    }
    let mut n_padded = 1;
    while n_padded < 2 * n - 1 {
        n_padded <<= 1;
    }

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n_padded);
    let ffti = planner.plan_fft_inverse(n_padded);

    let mean = x.sum() / n as f64;
    let mut buf: Vec<Complex<f64>> = x
        .iter()
        .map(|&xi| Complex::new(xi - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)).take(n_padded - n))
        .collect();
    fft.process(&mut buf);
    buf.iter_mut().for_each(|xi| *xi *= xi.conj());
    ffti.process(&mut buf);

    let acov: Array1<f64> = buf.iter().take(n).map(|xi| xi.re).collect();
    let var = acov[0];
    if var.is_nan() || var <= 0.0 {
        return Err(SamplerError::Validation(
            "autocorrelation of a constant series is undefined".into(),
        ));
    }
    Ok(acov / var)
}

/**
Integrated autocorrelation time `τ = 1 + 2 Σ ρ(k)` of the series `x`.

The sum is truncated at the smallest window `M` with `M ≥ c τ(M)` (Sokal's automatic
windowing); `c = 5` ([`DEFAULT_WINDOW_CONSTANT`]) is a good default. If no window
satisfies the criterion the series is too short for a reliable estimate, and the estimate
at the last lag is returned with a warning.

# Examples

```rust
use metropolis_mcmc::random::RandomSource;
use metropolis_mcmc::stats::{integrated_time, DEFAULT_WINDOW_CONSTANT};

// Independent draws are uncorrelated: τ ≈ 1.
let x = RandomSource::new(1).standard_normal(10_000);
let tau = integrated_time(x.view(), DEFAULT_WINDOW_CONSTANT).unwrap();
assert!((tau - 1.0).abs() < 0.2);
```
*/
pub fn integrated_time(x: ArrayView1<f64>, c: f64) -> Result<f64> {
    let acf = autocorr_function(x)?;
    let mut tau = 0.0;
    for (m, rho) in acf.iter().enumerate() {
        // τ(M) = 2 Σ_{k ≤ M} ρ(k) - 1
        tau += 2.0 * rho;
        let estimate = tau - 1.0;
        if m as f64 >= c * estimate {
            return Ok(estimate);
        }
    }
    log::warn!(
        "series of length {} is too short for a reliable autocorrelation time",
        x.len()
    );
    Ok(tau - 1.0)
}

/// [`integrated_time`] of every column of `samples` (`n_steps × ndim`).
pub fn integrated_times(samples: ArrayView2<f64>, c: f64) -> Result<Array1<f64>> {
    samples
        .axis_iter(Axis(1))
        .map(|column| integrated_time(column, c))
        .collect::<Result<Vec<f64>>>()
        .map(Array1::from)
}

/// Effective number of independent samples per column of `samples`, `n / τ`.
pub fn effective_sample_size(samples: ArrayView2<f64>) -> Result<Array1<f64>> {
    let n = samples.nrows() as f64;
    let tau = integrated_times(samples, DEFAULT_WINDOW_CONSTANT)?;
    Ok(tau.mapv(|t| n / t))
}

/**
Potential scale reduction factor `R̂` of every parameter.

`sample` has shape `(chains, steps, parameters)`. With `W` the mean within-chain variance
and `B/n` the variance of the chain means,

`R̂ = sqrt(((n - 1)/n · W + B/n) / W)`.

Values close to 1 indicate that the chains sample the same distribution.
*/
pub fn rhat(sample: ArrayView3<f64>) -> Result<Array1<f64>> {
    let (n_chains, n_steps, _) = sample.dim();
    if n_chains < 2 || n_steps < 2 {
        return Err(SamplerError::Validation(format!(
            "R-hat needs at least 2 chains of at least 2 steps, got {n_chains} x {n_steps}"
        )));
    }
    let n = n_steps as f64;

    // chains x parameters
    let means = sample.mean_axis(Axis(1)).ok_or(SamplerError::DivisionUndefined)?;
    let sm2 = sample.var_axis(Axis(1), 1.0);

    let within = sm2.mean_axis(Axis(0)).ok_or(SamplerError::DivisionUndefined)?;
    let grand_mean = means.mean_axis(Axis(0)).ok_or(SamplerError::DivisionUndefined)?;
    let between = (&means - &grand_mean.insert_axis(Axis(0)))
        .pow2()
        .sum_axis(Axis(0))
        * (n / (n_chains as f64 - 1.0));

    let var = &within * ((n - 1.0) / n) + between / n;
    Ok((var / within).sqrt())
}

/// The largest [`rhat`] over all parameters, ignoring NaNs from constant parameters.
pub fn max_rhat(sample: ArrayView3<f64>) -> Result<f64> {
    let all = rhat(sample)?;
    Ok(*all.max_skipnan())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::RandomSource;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_1_SQRT_2, SQRT_2};

    fn ar1(phi: f64, n: usize, seed: u64) -> Array1<f64> {
        let noise = RandomSource::new(seed).standard_normal(n);
        let mut x = Array1::zeros(n);
        let mut prev = 0.0;
        for (xi, e) in x.iter_mut().zip(noise.iter()) {
            prev = phi * prev + e;
            *xi = prev;
        }
        x
    }

    /// Brute-force autocorrelation for comparison.
    fn autocorr_bf(x: ArrayView1<f64>) -> Array1<f64> {
        let n = x.len();
        let centered = &x - x.mean().unwrap();
        let acov: Array1<f64> = (0..n)
            .map(|lag| (0..n - lag).map(|t| centered[t] * centered[t + lag]).sum::<f64>())
            .collect();
        &acov / acov[0]
    }

    #[test]
    fn fft_matches_brute_force() {
        let x = ar1(0.5, 257, 3);
        let fast = autocorr_function(x.view()).unwrap();
        let slow = autocorr_bf(x.view());
        assert_eq!(fast[0], 1.0);
        assert_abs_diff_eq!(fast, slow, epsilon = 1e-10);
    }

    #[test]
    fn degenerate_series_are_rejected() {
        assert!(autocorr_function(Array1::<f64>::zeros(0).view()).is_err());
        assert!(autocorr_function(Array1::from_elem(10, 3.0).view()).is_err());
    }

    #[test]
    fn white_noise_has_unit_time() {
        let x = RandomSource::new(8).standard_normal(50_000);
        let tau = integrated_time(x.view(), DEFAULT_WINDOW_CONSTANT).unwrap();
        assert_abs_diff_eq!(tau, 1.0, epsilon = 0.1);
    }

    #[test]
    fn ar1_time_matches_theory() {
        // τ = (1 + φ) / (1 - φ) = 19 for φ = 0.9.
        let x = ar1(0.9, 200_000, 42);
        let tau = integrated_time(x.view(), DEFAULT_WINDOW_CONSTANT).unwrap();
        assert_abs_diff_eq!(tau, 19.0, epsilon = 2.0);
    }

    #[test]
    fn ess_divides_length_by_time() {
        let n = 100_000;
        let mut samples = Array2::zeros((n, 2));
        samples.column_mut(0).assign(&RandomSource::new(1).standard_normal(n));
        samples.column_mut(1).assign(&ar1(0.8, n, 2));
        let ess = effective_sample_size(samples.view()).unwrap();
        // τ = 1 and τ = 9.
        assert_abs_diff_eq!(ess[0] / n as f64, 1.0, epsilon = 0.1);
        assert_abs_diff_eq!(ess[1] / n as f64, 1.0 / 9.0, epsilon = 0.02);
    }

    fn sample_from_steps(step0: Array2<f64>, step1: Array2<f64>) -> Array3<f64> {
        // (chains x params) per step into (chains x steps x params)
        ndarray::stack(Axis(1), &[step0.view(), step1.view()]).unwrap()
    }

    #[test]
    fn rhat_known_values_1() {
        let sample = sample_from_steps(
            arr2(&[
                [0.0, 1.0, 0.0, 1.0], // chain 0
                [1.0, 2.0, 0.0, 2.0], // chain 1
                [0.0, 0.0, 0.0, 2.0], // chain 2
            ]),
            arr2(&[
                [1.0, 2.0, 2.0, 0.0], // chain 0
                [1.0, 1.0, 1.0, 1.0], // chain 1
                [0.0, 1.0, 0.0, 0.0], // chain 2
            ]),
        );
        let expected = array![SQRT_2, 1.08012345, 0.89442719, 0.8660254];
        assert_abs_diff_eq!(rhat(sample.view()).unwrap(), expected, epsilon = 1e-7);
    }

    #[test]
    fn rhat_known_values_2() {
        let sample = sample_from_steps(
            arr2(&[
                [1.0, 0.0, 0.0, 1.0],
                [1.0, 0.0, 0.0, 1.0],
                [0.0, 1.0, 0.0, 2.0],
            ]),
            arr2(&[
                [1.0, 2.0, 0.0, 2.0],
                [1.0, 2.0, 0.0, 0.0],
                [2.0, 0.0, 1.0, 2.0],
            ]),
        );
        let expected = array![FRAC_1_SQRT_2, 0.74535599, 1.0, 1.5];
        assert_abs_diff_eq!(rhat(sample.view()).unwrap(), expected, epsilon = 1e-7);
        assert_abs_diff_eq!(max_rhat(sample.view()).unwrap(), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn rhat_near_one_for_matching_chains() {
        let mut rng = RandomSource::new(5);
        let sample = Array3::from_shape_vec((4, 2_000, 2), rng.standard_normal(16_000).to_vec())
            .unwrap();
        let r = rhat(sample.view()).unwrap();
        assert!(r.iter().all(|&v| (v - 1.0).abs() < 0.01), "{r}");
    }

    #[test]
    fn rhat_flags_a_displaced_chain() {
        let mut rng = RandomSource::new(6);
        let mut sample =
            Array3::from_shape_vec((4, 1_000, 1), rng.standard_normal(4_000).to_vec()).unwrap();
        sample.slice_mut(s![0, .., ..]).mapv_inplace(|v| v + 3.0);
        assert!(max_rhat(sample.view()).unwrap() > 1.2);
    }

    #[test]
    fn rhat_needs_two_chains() {
        let sample = Array3::<f64>::zeros((1, 10, 2));
        assert!(matches!(
            rhat(sample.view()),
            Err(SamplerError::Validation(_))
        ));
    }
}
