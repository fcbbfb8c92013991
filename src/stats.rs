/*!
Chain statistics: integrated autocorrelation time and the Gelman–Rubin R-hat.

The autocorrelation estimator follows the walker-averaged FFT approach with
Sokal's automatic windowing, operating on chains laid out as
`[iteration, walker, dimension]`.

# Examples

```rust
use mcmc_harness::stats::integrated_time;
use ndarray::Array3;

// An AR(1) process with coefficient 0.5 has tau = (1 + 0.5) / (1 - 0.5) = 3.
let n = 20_000;
let mut chain = Array3::<f64>::zeros((n, 4, 1));
let mut state = [0.1, -0.3, 0.7, 0.2];
let mut u: u64 = 12345;
for t in 0..n {
    for w in 0..4 {
        // small LCG so the example has no extra dependencies
        u = u.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let noise = ((u >> 11) as f64 / (1u64 << 53) as f64) - 0.5;
        state[w] = 0.5 * state[w] + noise;
        chain[[t, w, 0]] = state[w];
    }
}
let tau = integrated_time(chain.view(), 5.0, 50.0).unwrap();
assert!((tau[0] - 3.0).abs() < 0.5);
```
*/

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::error::AutocorrError;

/// Normalized autocorrelation function of a 1D series, `acf[0] == 1`.
///
/// Returns `None` when the series has zero variance or contains non-finite
/// values.
pub fn autocorr_function_1d(x: ArrayView1<f64>) -> Option<Array1<f64>> {
    let n = x.len();
    if n == 0 || x.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let mean = x.sum() / n as f64;
    let nfft = 2 * n.next_power_of_two();

    let mut buffer: Vec<Complex<f64>> = x
        .iter()
        .map(|&v| Complex::new(v - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(nfft)
        .collect();

    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(nfft).process(&mut buffer);
    for c in buffer.iter_mut() {
        *c = Complex::new(c.norm_sqr(), 0.0);
    }
    planner.plan_fft_inverse(nfft).process(&mut buffer);

    let acf0 = buffer[0].re;
    if !(acf0 > 0.0) || !acf0.is_finite() {
        return None;
    }
    Some(buffer[..n].iter().map(|c| c.re / acf0).collect())
}

/// Index of the first lag `m` with `m >= c * taus[m]`, or the last index if none.
pub fn auto_window(taus: ArrayView1<f64>, c: f64) -> usize {
    taus.iter()
        .enumerate()
        .position(|(m, &tau)| !((m as f64) < c * tau))
        .unwrap_or_else(|| taus.len().saturating_sub(1))
}

/// Per-dimension integrated autocorrelation time of a `[iteration, walker, dim]` chain.
///
/// The autocorrelation function is averaged over walkers before windowing.
/// Walkers that never moved are left out of the average. If `tol > 0`, an
/// estimate longer than `n_steps / tol` is reported as
/// [`AutocorrError::Unreliable`] with the estimates attached.
pub fn integrated_time(
    chain: ArrayView3<f64>,
    c: f64,
    tol: f64,
) -> Result<Array1<f64>, AutocorrError> {
    let (n_steps, n_walkers, n_dim) = chain.dim();
    if n_steps < 2 || n_walkers == 0 {
        return Err(AutocorrError::TooShort {
            n_steps,
            required: 2,
        });
    }

    let mut tau = Array1::<f64>::zeros(n_dim);
    for d in 0..n_dim {
        let series = chain.index_axis(Axis(2), d);
        if series.iter().any(|v| !v.is_finite()) {
            return Err(AutocorrError::Degenerate { dim: d });
        }
        let mut f = Array1::<f64>::zeros(n_steps);
        let mut used = 0usize;
        for walker in series.axis_iter(Axis(1)) {
            if let Some(acf) = autocorr_function_1d(walker) {
                f += &acf;
                used += 1;
            }
        }
        if used == 0 {
            return Err(AutocorrError::Degenerate { dim: d });
        }
        f /= used as f64;

        let mut running = 0.0;
        let taus: Array1<f64> = f
            .iter()
            .map(|&v| {
                running += v;
                2.0 * running - 1.0
            })
            .collect();
        let window = auto_window(taus.view(), c);
        tau[d] = taus[window];
    }

    if tol > 0.0 {
        let n_unreliable = tau.iter().filter(|&&t| tol * t > n_steps as f64).count();
        if n_unreliable > 0 {
            return Err(AutocorrError::Unreliable {
                tau: tau.to_vec(),
                tol,
                n_unreliable,
            });
        }
    }
    Ok(tau)
}

/// Largest finite entry, or `None` for an all-NaN / empty array.
pub fn max_finite(values: ArrayView1<f64>) -> Option<f64> {
    let max = *values.max_skipnan();
    max.is_finite().then_some(max)
}

/// Running Gelman–Rubin potential scale reduction across walkers.
///
/// Each call to [`RhatMulti::step`] adds one ensemble snapshot of shape
/// `[n_walkers, n_params]`; running means and mean squares are kept per walker.
#[derive(Debug, Clone, PartialEq)]
pub struct RhatMulti {
    n: usize,
    mean: Array2<f64>,    // n_walkers x n_params
    mean_sq: Array2<f64>, // n_walkers x n_params
}

impl RhatMulti {
    pub fn new(n_walkers: usize, n_params: usize) -> Self {
        Self {
            n: 0,
            mean: Array2::zeros((n_walkers, n_params)),
            mean_sq: Array2::zeros((n_walkers, n_params)),
        }
    }

    /// Adds one snapshot. Snapshots of the wrong shape are ignored and reported
    /// as `false`.
    pub fn step(&mut self, x: ArrayView2<f64>) -> bool {
        if x.dim() != self.mean.dim() {
            return false;
        }
        self.n += 1;
        let n = self.n as f64;
        self.mean = (&self.mean * (n - 1.0) + &x) / n;
        self.mean_sq = (&self.mean_sq * (n - 1.0) + &x.mapv(|v| v * v)) / n;
        true
    }

    /// Per-parameter R-hat; `None` until two snapshots from two walkers exist.
    pub fn all(&self) -> Option<Array1<f64>> {
        let n_walkers = self.mean.nrows();
        if self.n < 2 || n_walkers < 2 {
            return None;
        }
        let n = self.n as f64;
        let grand_mean = self.mean.mean_axis(Axis(0))?;
        let between = (&self.mean - &grand_mean.insert_axis(Axis(0)))
            .mapv(|v| v * v)
            .sum_axis(Axis(0))
            * (n / (n_walkers as f64 - 1.0));
        let sm2 = (&self.mean_sq - &self.mean.mapv(|v| v * v)) * (n / (n - 1.0));
        let within = sm2.mean_axis(Axis(0))?;
        let var = &within * ((n - 1.0) / n) + &between * (1.0 / n);
        Some((var / within).mapv(f64::sqrt))
    }

    /// Largest R-hat over parameters.
    pub fn max(&self) -> Option<f64> {
        self.all().and_then(|all| max_finite(all.view()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, StandardNormal};

    fn ar1_chain(phi: f64, n_steps: usize, n_walkers: usize, seed: u64) -> Array3<f64> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut chain = Array3::<f64>::zeros((n_steps, n_walkers, 1));
        for w in 0..n_walkers {
            let mut x: f64 = StandardNormal.sample(&mut rng);
            for t in 0..n_steps {
                let z: f64 = StandardNormal.sample(&mut rng);
                x = phi * x + z;
                chain[[t, w, 0]] = x;
            }
        }
        chain
    }

    #[test]
    fn test_acf_starts_at_one() {
        let x = array![1.0, 3.0, 2.0, 5.0, 4.0];
        let acf = autocorr_function_1d(x.view()).unwrap();
        assert_eq!(acf.len(), 5);
        assert_abs_diff_eq!(acf[0], 1.0, epsilon = 1e-12);
        assert!(acf.iter().all(|v| v.abs() <= 1.0 + 1e-12));
    }

    #[test]
    fn test_acf_matches_direct_sum() {
        let x = array![0.3, -1.2, 0.8, 2.0, -0.4, 0.1, 1.5];
        let mean = x.sum() / x.len() as f64;
        let centred = x.mapv(|v| v - mean);
        let c0: f64 = centred.iter().map(|v| v * v).sum();
        let c2: f64 = (0..x.len() - 2).map(|t| centred[t] * centred[t + 2]).sum();
        let acf = autocorr_function_1d(x.view()).unwrap();
        assert_abs_diff_eq!(acf[2], c2 / c0, epsilon = 1e-10);
    }

    #[test]
    fn test_constant_series_is_degenerate() {
        let x = Array1::<f64>::from_elem(32, 2.5);
        assert!(autocorr_function_1d(x.view()).is_none());

        let chain = Array3::<f64>::from_elem((32, 3, 2), 1.0);
        assert_eq!(
            integrated_time(chain.view(), 5.0, 0.0),
            Err(AutocorrError::Degenerate { dim: 0 })
        );
    }

    #[test]
    fn test_non_finite_values_are_degenerate() {
        let mut chain = ar1_chain(0.2, 64, 2, 1);
        chain[[10, 1, 0]] = f64::NAN;
        assert_eq!(
            integrated_time(chain.view(), 5.0, 0.0),
            Err(AutocorrError::Degenerate { dim: 0 })
        );
    }

    #[test]
    fn test_auto_window() {
        let taus = array![1.0, 1.5, 1.8, 1.9, 2.0];
        // c * taus = [2, 3, 3.6, 3.8, 4]; lag 4 is the first with m >= c * tau
        assert_eq!(auto_window(taus.view(), 2.0), 4);
        assert_eq!(auto_window(taus.view(), 1.0), 2);
        // never satisfied -> last index
        assert_eq!(auto_window(taus.view(), 100.0), 4);
    }

    #[test]
    fn test_white_noise_tau_is_one() {
        let chain = ar1_chain(0.0, 4000, 8, 2);
        let tau = integrated_time(chain.view(), 5.0, 50.0).unwrap();
        assert_abs_diff_eq!(tau[0], 1.0, epsilon = 0.2);
    }

    #[test]
    fn test_ar1_tau() {
        // tau = (1 + phi) / (1 - phi) = 3
        let chain = ar1_chain(0.5, 10_000, 8, 3);
        let tau = integrated_time(chain.view(), 5.0, 50.0).unwrap();
        assert_abs_diff_eq!(tau[0], 3.0, epsilon = 0.4);
    }

    #[test]
    fn test_short_chain_is_unreliable() {
        let chain = ar1_chain(0.9, 100, 4, 4);
        match integrated_time(chain.view(), 5.0, 50.0) {
            Err(AutocorrError::Unreliable { tau, n_unreliable, .. }) => {
                assert_eq!(tau.len(), 1);
                assert_eq!(n_unreliable, 1);
            }
            other => panic!("expected an unreliable estimate, got {other:?}"),
        }
        // tol = 0 disables the check
        assert!(integrated_time(chain.view(), 5.0, 0.0).is_ok());
    }

    #[test]
    fn test_single_iteration_is_too_short() {
        let chain = Array3::<f64>::zeros((1, 4, 2));
        assert_eq!(
            integrated_time(chain.view(), 5.0, 50.0),
            Err(AutocorrError::TooShort {
                n_steps: 1,
                required: 2
            })
        );
    }

    fn run_rhat(data0: Array2<f64>, data1: Array2<f64>, expected: Array1<f64>) {
        let mut psr = RhatMulti::new(3, 4);
        assert!(psr.step(data0.view()));
        assert!(psr.step(data1.view()));
        let rhat = psr.all().unwrap();
        for (got, want) in rhat.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(got, want, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_rhat_known_values_1() {
        let data_step_0 = arr2(&[
            [0.0, 1.0, 0.0, 1.0], // walker 0
            [1.0, 2.0, 0.0, 2.0], // walker 1
            [0.0, 0.0, 0.0, 2.0], // walker 2
        ]);
        let data_step_1 = arr2(&[
            [1.0, 2.0, 2.0, 0.0],
            [1.0, 1.0, 1.0, 1.0],
            [0.0, 1.0, 0.0, 0.0],
        ]);
        let expected = array![std::f64::consts::SQRT_2, 1.08012345, 0.89442719, 0.8660254];
        run_rhat(data_step_0, data_step_1, expected);
    }

    #[test]
    fn test_rhat_known_values_2() {
        let data_step_0 = arr2(&[
            [1.0, 0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0, 1.0],
            [0.0, 1.0, 0.0, 2.0],
        ]);
        let data_step_1 = arr2(&[
            [1.0, 2.0, 0.0, 2.0],
            [1.0, 2.0, 0.0, 0.0],
            [2.0, 0.0, 1.0, 2.0],
        ]);
        let expected = array![std::f64::consts::FRAC_1_SQRT_2, 0.74535599, 1.0, 1.5];
        run_rhat(data_step_0, data_step_1, expected);
    }

    #[test]
    fn test_rhat_needs_two_snapshots() {
        let mut psr = RhatMulti::new(2, 1);
        assert!(psr.all().is_none());
        assert!(psr.step(arr2(&[[0.0], [1.0]]).view()));
        assert!(psr.max().is_none());
        assert!(!psr.step(arr2(&[[0.0, 1.0]]).view()));
    }
}
