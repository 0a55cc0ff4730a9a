//! # Level Meter
//!
//! Smoothed loudness for the volume indicator. Each analysis window yields
//! its RMS, mapped from dBFS onto `[0, 1]`, then smoothed with a faster
//! attack than release so the bar rises quickly and falls without flicker.

/// Default smoothing coefficient when the level rises.
pub const DEFAULT_ATTACK: f32 = 0.3;
/// Default smoothing coefficient when the level falls.
pub const DEFAULT_RELEASE: f32 = 0.05;
/// Default level in dBFS that maps to 0.
pub const DEFAULT_FLOOR_DB: f32 = -60.0;

/// Root-mean-square amplitude of a window. Empty windows are silent.
pub fn rms(window: &[f32]) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    (window.iter().map(|&s| s * s).sum::<f32>() / window.len() as f32).sqrt()
}

/// Maps an RMS amplitude onto `[0, 1]`, linear in dB between `floor_db` and 0 dBFS.
pub fn normalize(rms: f32, floor_db: f32) -> f32 {
    if rms <= 0.0 || !rms.is_finite() {
        return 0.0;
    }
    let db = 20.0 * rms.log10();
    ((db - floor_db) / -floor_db).clamp(0.0, 1.0)
}

/// Exponentially smoothed level meter.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    attack: f32,
    release: f32,
    floor_db: f32,
    level: f32,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(DEFAULT_ATTACK, DEFAULT_RELEASE, DEFAULT_FLOOR_DB)
    }
}

impl LevelMeter {
    pub fn new(attack: f32, release: f32, floor_db: f32) -> Self {
        Self {
            attack: attack.clamp(0.0, 1.0),
            release: release.clamp(0.0, 1.0),
            floor_db: floor_db.min(-1.0),
            level: 0.0,
        }
    }

    /// Next smoothed level given the previous one and a fresh window.
    ///
    /// Pure: the meter's own state is not touched.
    pub fn smooth(&self, previous: f32, window: &[f32]) -> f32 {
        let target = normalize(rms(window), self.floor_db);
        let coeff = if target > previous {
            self.attack
        } else {
            self.release
        };
        (previous + coeff * (target - previous)).clamp(0.0, 1.0)
    }

    /// Feeds one window and returns the updated level.
    pub fn process(&mut self, window: &[f32]) -> f32 {
        self.level = self.smooth(self.level, window);
        self.level
    }

    /// Current smoothed level in `[0, 1]`.
    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
    }
}
