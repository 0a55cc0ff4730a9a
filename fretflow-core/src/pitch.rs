//! # Pitch Detection Module
//!
//! Fundamental-frequency estimation for a single monophonic source using
//! the YIN cumulative-mean-normalised difference function.
//!
//! ## Features
//! - RMS noise gate: quiet windows are unvoiced whatever their periodicity
//! - FFT-backed difference function over the 70–1400 Hz lag range
//! - Octave error prevention: the lowest lag whose value is within a small
//!   tolerance of the global minimum wins
//! - Parabolic interpolation for sub-sample lag precision
//! - Confidence from dip depth below the threshold and window loudness

use crate::fft::LagCorrelator;
use crate::level::rms;
use std::time::Duration;

/// A single pitch estimate for one analysis window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    /// Estimated fundamental in Hz; `None` when the window is not reliably voiced.
    pub frequency_hz: Option<f32>,
    /// Reliability of the estimate in `[0, 1]`; zero when unvoiced.
    pub confidence: f32,
    /// Stream time at the end of the analysed window.
    pub timestamp: Duration,
}

impl PitchEstimate {
    /// An estimate that carries no pitch.
    pub const fn unvoiced(timestamp: Duration) -> Self {
        Self {
            frequency_hz: None,
            confidence: 0.0,
            timestamp,
        }
    }

    pub fn is_voiced(&self) -> bool {
        self.frequency_hz.is_some()
    }
}

/// Tuning knobs for [`PitchEstimator`].
#[derive(Debug, Clone, PartialEq)]
pub struct PitchSettings {
    /// Lowest candidate fundamental in Hz.
    pub min_freq: f32,
    /// Highest candidate fundamental in Hz.
    pub max_freq: f32,
    /// A dip must fall below this normalised difference to count as voiced.
    pub threshold: f32,
    /// Lags within this much of the global minimum compete on lag length.
    pub octave_tolerance: f32,
    /// Windows quieter than this RMS are unvoiced.
    pub min_rms: f32,
}

impl Default for PitchSettings {
    fn default() -> Self {
        Self {
            min_freq: 70.0,
            max_freq: 1400.0,
            threshold: 0.15,
            octave_tolerance: 0.05,
            min_rms: 0.01,
        }
    }
}

/// Windows at this multiple of the RMS floor and above get full loudness credit.
const FULL_CONFIDENCE_RMS_FACTOR: f32 = 4.0;

/// Lags below `min_lag` that are still scanned, as a fraction of `min_lag`.
/// A dip there belongs to a tone above `max_freq`.
const GUARD_FRACTION: usize = 4;

/// Smallest analysis window for `sample_rate` that fits two periods of `min_freq`.
pub fn min_window_size(sample_rate: u32, min_freq: f32) -> usize {
    2 * (sample_rate as f32 / min_freq).ceil() as usize
}

/// YIN pitch estimator for fixed-size windows.
pub struct PitchEstimator {
    sample_rate: u32,
    settings: PitchSettings,
    min_lag: usize,
    max_lag: usize,
    correlator: LagCorrelator,
    frame: Vec<f32>,
    correlation: Vec<f32>,
    cmnd: Vec<f32>,
}

impl PitchEstimator {
    /// Builds an estimator for windows of `window_size` samples.
    ///
    /// The window is enlarged to [`min_window_size`] when smaller.
    pub fn new(sample_rate: u32, window_size: usize, settings: PitchSettings) -> Self {
        let min_lag = ((sample_rate as f32 / settings.max_freq).floor() as usize).max(2);
        let max_lag = (sample_rate as f32 / settings.min_freq).ceil() as usize;
        let window_size = window_size.max(min_window_size(sample_rate, settings.min_freq));

        Self {
            sample_rate,
            settings,
            min_lag,
            max_lag,
            // One lag past the range shows whether the curve still falls there.
            correlator: LagCorrelator::new(window_size, max_lag + 1),
            frame: Vec::with_capacity(window_size),
            correlation: Vec::with_capacity(max_lag + 2),
            cmnd: Vec::with_capacity(max_lag + 2),
        }
    }

    /// Number of samples each call to [`estimate`](Self::estimate) expects.
    pub fn window_size(&self) -> usize {
        self.correlator.window_size()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn settings(&self) -> &PitchSettings {
        &self.settings
    }

    /// Estimates the fundamental of `window`.
    ///
    /// Windows of the wrong length are unvoiced.
    pub fn estimate(&mut self, window: &[f32], timestamp: Duration) -> PitchEstimate {
        if window.len() != self.window_size() {
            return PitchEstimate::unvoiced(timestamp);
        }

        self.frame.clear();
        self.frame.extend_from_slice(window);
        crate::fft::remove_dc_offset(&mut self.frame);

        let loudness = rms(&self.frame);
        if !loudness.is_finite() || loudness < self.settings.min_rms {
            return PitchEstimate::unvoiced(timestamp);
        }

        self.difference_function();

        let Some(lag) = self.pick_lag() else {
            return PitchEstimate::unvoiced(timestamp);
        };
        let dip = self.cmnd[lag];
        let refined = self.parabolic_interpolation(lag);
        let frequency = self.sample_rate as f32 / refined;

        // Interpolation may nudge an edge lag slightly past the search range.
        let tolerance = 1.02;
        if !frequency.is_finite()
            || frequency < self.settings.min_freq / tolerance
            || frequency > self.settings.max_freq * tolerance
        {
            return PitchEstimate::unvoiced(timestamp);
        }

        PitchEstimate {
            frequency_hz: Some(frequency),
            confidence: self.confidence(dip, loudness),
            timestamp,
        }
    }

    /// Fills `cmnd` with the cumulative mean normalised difference for
    /// lags `0..=max_lag + 1`.
    fn difference_function(&mut self) {
        self.correlator.correlate(&self.frame, &mut self.correlation);

        let integration = self.correlator.integration();
        let last_lag = self.correlator.max_lag();

        // Energy of frame[tau..tau + integration] for each lag, as a sliding sum.
        let mut energy: f32 = self.frame[..integration].iter().map(|s| s * s).sum();
        let energy_zero = energy;

        self.cmnd.clear();
        self.cmnd.push(1.0);
        let mut running_sum = 0.0f32;
        for tau in 1..=last_lag {
            let leaving = self.frame[tau - 1];
            let entering = self.frame[tau + integration - 1];
            energy += entering * entering - leaving * leaving;

            let diff = (energy_zero + energy - 2.0 * self.correlation[tau]).max(0.0);
            running_sum += diff;
            let normalised = if running_sum > 0.0 {
                diff * tau as f32 / running_sum
            } else {
                1.0
            };
            self.cmnd.push(normalised);
        }
    }

    /// Lowest lag whose dip is within the octave tolerance of the global
    /// minimum, walked down to its local minimum.
    ///
    /// The search also covers a guard band below `min_lag`. A dip that lands
    /// there, or one still falling at `max_lag`, lies outside the frequency
    /// range and the window is unvoiced rather than folded onto another lag.
    fn pick_lag(&self) -> Option<usize> {
        let max_lag = self.max_lag;
        let first_lag = (self.min_lag - self.min_lag / GUARD_FRACTION).max(2);
        let range = first_lag..=max_lag;

        let global_min = self.cmnd[range.clone()]
            .iter()
            .copied()
            .fold(f32::INFINITY, f32::min);
        if global_min >= self.settings.threshold {
            return None;
        }

        let accept = (global_min + self.settings.octave_tolerance).min(self.settings.threshold);
        let mut lag = range.clone().find(|&tau| self.cmnd[tau] <= accept)?;
        while lag < max_lag && self.cmnd[lag + 1] < self.cmnd[lag] {
            lag += 1;
        }

        if lag < self.min_lag {
            return None;
        }
        if lag == max_lag && self.cmnd[max_lag + 1] < self.cmnd[max_lag] {
            return None;
        }
        Some(lag)
    }

    /// Sub-sample vertex of the parabola through the dip and its neighbours.
    fn parabolic_interpolation(&self, lag: usize) -> f32 {
        if lag == 0 || lag + 1 >= self.cmnd.len() {
            return lag as f32;
        }
        let y1 = self.cmnd[lag - 1];
        let y2 = self.cmnd[lag];
        let y3 = self.cmnd[lag + 1];

        let denominator = y1 - 2.0 * y2 + y3;
        if denominator.abs() < f32::EPSILON {
            return lag as f32;
        }
        let shift = (y1 - y3) / (2.0 * denominator);
        lag as f32 + shift.clamp(-1.0, 1.0)
    }

    /// Blends dip depth below the threshold with loudness above the gate.
    fn confidence(&self, dip: f32, loudness: f32) -> f32 {
        let depth = (1.0 - dip / self.settings.threshold).clamp(0.0, 1.0);
        let gate = self.settings.min_rms;
        let loud = ((loudness - gate) / (gate * (FULL_CONFIDENCE_RMS_FACTOR - 1.0))).clamp(0.0, 1.0);
        ((0.5 + 0.5 * depth) * loud).clamp(0.0, 1.0)
    }
}
