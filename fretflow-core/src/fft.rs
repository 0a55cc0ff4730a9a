//! # Fast Fourier Transform (FFT) Module
//!
//! FFT-backed lag correlation for the pitch estimator. The YIN difference
//! function needs `sum x[j] * x[j + tau]` for every candidate lag; computing
//! it in the frequency domain turns an `O(N * L)` loop into two forward
//! transforms and one inverse per window.
//!
//! ## Features
//! - High-performance FFT using RustFFT, planned once per window size
//! - DC offset removal so a biased input does not fake low-lag similarity
//! - Reused scratch buffers; no allocation per window

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::sync::Arc;

/// Removes the DC offset from a signal by making its average value zero.
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Computes `r[tau] = sum_{j < integration} x[j] * x[j + tau]` for
/// `tau` in `0..=max_lag` on windows of a fixed length.
pub struct LagCorrelator {
    window_size: usize,
    integration: usize,
    max_lag: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    signal: Vec<Complex<f32>>,
    head: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl LagCorrelator {
    /// Plans transforms for windows of `window_size` samples and lags up to
    /// `max_lag`. The integration length is `window_size - max_lag`.
    ///
    /// # Panics
    /// If `max_lag >= window_size`.
    pub fn new(window_size: usize, max_lag: usize) -> Self {
        assert!(
            max_lag < window_size,
            "max lag {max_lag} must be below window size {window_size}"
        );
        let integration = window_size - max_lag;
        // Linear (not circular) correlation needs room for both sequences.
        let fft_size = (window_size + integration).next_power_of_two();

        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        Self {
            window_size,
            integration,
            max_lag,
            forward,
            inverse,
            signal: vec![Complex::default(); fft_size],
            head: vec![Complex::default(); fft_size],
            scratch: vec![Complex::default(); scratch_len],
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Number of products summed per lag.
    pub fn integration(&self) -> usize {
        self.integration
    }

    pub fn max_lag(&self) -> usize {
        self.max_lag
    }

    /// Fills `out[tau]` for `tau` in `0..=max_lag`.
    ///
    /// # Panics
    /// If `signal.len() != window_size`.
    pub fn correlate(&mut self, signal: &[f32], out: &mut Vec<f32>) {
        assert_eq!(
            signal.len(),
            self.window_size,
            "input frame size must equal the planned window size"
        );

        for (slot, &sample) in self.signal.iter_mut().zip(signal) {
            *slot = Complex { re: sample, im: 0.0 };
        }
        self.signal[signal.len()..].fill(Complex::default());

        for (slot, &sample) in self.head.iter_mut().zip(&signal[..self.integration]) {
            *slot = Complex { re: sample, im: 0.0 };
        }
        self.head[self.integration..].fill(Complex::default());

        self.forward
            .process_with_scratch(&mut self.signal, &mut self.scratch);
        self.forward
            .process_with_scratch(&mut self.head, &mut self.scratch);

        // Cross-correlation: X * conj(H), then back to the lag domain.
        for (x, h) in self.signal.iter_mut().zip(&self.head) {
            *x *= h.conj();
        }
        self.inverse
            .process_with_scratch(&mut self.signal, &mut self.scratch);

        let scale = 1.0 / self.signal.len() as f32;
        out.clear();
        out.extend(self.signal[..=self.max_lag].iter().map(|c| c.re * scale));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn direct(signal: &[f32], integration: usize, max_lag: usize) -> Vec<f32> {
        (0..=max_lag)
            .map(|tau| (0..integration).map(|j| signal[j] * signal[j + tau]).sum())
            .collect()
    }

    #[test]
    fn matches_direct_correlation() {
        let signal: Vec<f32> = (0..256)
            .map(|i| (i as f32 * 0.21).sin() + 0.3 * (i as f32 * 0.05).cos())
            .collect();
        let mut correlator = LagCorrelator::new(256, 96);
        let mut out = Vec::new();
        correlator.correlate(&signal, &mut out);

        let expected = direct(&signal, correlator.integration(), 96);
        assert_eq!(out.len(), expected.len());
        for (got, want) in out.iter().zip(&expected) {
            assert_relative_eq!(*got, *want, epsilon = 1e-3, max_relative = 1e-3);
        }
    }

    #[test]
    fn reuse_does_not_leak_previous_window() {
        let mut correlator = LagCorrelator::new(128, 32);
        let mut out = Vec::new();
        correlator.correlate(&[1.0; 128], &mut out);
        correlator.correlate(&[0.0; 128], &mut out);
        assert!(out.iter().all(|v| v.abs() < 1e-5));
    }

    #[test]
    fn dc_offset_removed() {
        let mut signal = vec![0.5, 1.5, 0.5, 1.5];
        remove_dc_offset(&mut signal);
        assert_eq!(signal, vec![-0.5, 0.5, -0.5, 0.5]);
    }
}
