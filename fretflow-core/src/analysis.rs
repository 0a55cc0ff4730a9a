//! Per-window analysis: one window in, a level reading and a pitch estimate out.

use crate::config::AnalysisSettings;
use crate::level::LevelMeter;
use crate::pitch::{PitchEstimate, PitchEstimator};
use std::time::Duration;

/// Result of analysing one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisFrame {
    pub estimate: PitchEstimate,
    /// Smoothed level in `[0, 1]` after this window.
    pub level: f32,
}

/// Runs the level meter and the pitch estimator over consecutive windows.
pub struct Analyzer {
    estimator: PitchEstimator,
    meter: LevelMeter,
    hop_size: usize,
}

impl Analyzer {
    pub fn new(sample_rate: u32, settings: &AnalysisSettings) -> Self {
        let estimator = PitchEstimator::new(sample_rate, settings.window_size, settings.pitch());
        let hop_size = settings.hop_size.clamp(1, estimator.window_size());
        Self {
            estimator,
            meter: LevelMeter::new(settings.level_attack, settings.level_release, settings.level_floor_db),
            hop_size,
        }
    }

    /// Window length the ring must deliver.
    pub fn window_size(&self) -> usize {
        self.estimator.window_size()
    }

    /// Stride between consecutive windows.
    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.estimator.sample_rate()
    }

    /// Analyses `window`, whose last sample sits just before stream
    /// position `end`.
    pub fn process(&mut self, window: &[f32], end: u64) -> AnalysisFrame {
        let timestamp = stream_time(end, self.sample_rate());
        AnalysisFrame {
            level: self.meter.process(window),
            estimate: self.estimator.estimate(window, timestamp),
        }
    }

    pub fn level(&self) -> f32 {
        self.meter.level()
    }

    pub fn reset(&mut self) {
        self.meter.reset();
    }
}

/// Stream time of sample position `position` at `sample_rate`.
pub fn stream_time(position: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let rate = sample_rate as u64;
    Duration::from_secs(position / rate)
        + Duration::from_nanos((position % rate) * 1_000_000_000 / rate)
}
