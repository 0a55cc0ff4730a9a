//! # Settings
//!
//! Built-in defaults, then an optional JSON file, then `FRETFLOW_*`
//! environment variables, then clamping. Out-of-range numbers are clamped
//! rather than rejected; only unreadable or malformed files are errors.
//!
//! The file may set any subset of fields:
//!
//! ```json
//! {
//!   "strings": ["E", "A", "D"],
//!   "difficulty": "all",
//!   "device": "scarlett",
//!   "analysis": { "hop_size": 256, "stable_frames": 4 }
//! }
//! ```

use crate::error::{FretflowError, Result};
use crate::fretboard::StringId;
use crate::pitch::PitchSettings;
use crate::session::{Difficulty, SessionConfig, SessionPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

/// Settings file looked up in the working directory when `FRETFLOW_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "fretflow.json";

/// Analysis pipeline tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Requested analysis window in samples; grown to fit two lowest periods.
    pub window_size: usize,
    /// Stride between consecutive windows in samples.
    pub hop_size: usize,
    /// Ring capacity in samples; at least four windows are always reserved.
    pub ring_capacity: usize,
    pub min_freq: f32,
    pub max_freq: f32,
    /// YIN dip threshold.
    pub yin_threshold: f32,
    pub octave_tolerance: f32,
    /// RMS below which a window is silence.
    pub min_rms: f32,
    /// Estimates below this confidence never change the session state.
    pub acceptance_confidence: f32,
    /// Consecutive agreeing detections required before feedback.
    pub stable_frames: u32,
    /// How long a feedback state is shown before reverting.
    pub feedback_hold_ms: u64,
    pub level_attack: f32,
    pub level_release: f32,
    pub level_floor_db: f32,
    /// Sleep between ring polls when no window is ready.
    pub poll_interval_ms: u64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        let pitch = PitchSettings::default();
        Self {
            window_size: 2048,
            hop_size: 512,
            ring_capacity: 16_384,
            min_freq: pitch.min_freq,
            max_freq: pitch.max_freq,
            yin_threshold: pitch.threshold,
            octave_tolerance: pitch.octave_tolerance,
            min_rms: pitch.min_rms,
            acceptance_confidence: 0.6,
            stable_frames: 3,
            feedback_hold_ms: 1000,
            level_attack: crate::level::DEFAULT_ATTACK,
            level_release: crate::level::DEFAULT_RELEASE,
            level_floor_db: crate::level::DEFAULT_FLOOR_DB,
            poll_interval_ms: 5,
        }
    }
}

impl AnalysisSettings {
    pub fn pitch(&self) -> PitchSettings {
        PitchSettings {
            min_freq: self.min_freq,
            max_freq: self.max_freq,
            threshold: self.yin_threshold,
            octave_tolerance: self.octave_tolerance,
            min_rms: self.min_rms,
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        SessionPolicy {
            acceptance_confidence: self.acceptance_confidence,
            stable_frames: self.stable_frames,
            feedback_hold: Duration::from_millis(self.feedback_hold_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Ring capacity that holds at least four windows of `window_size`.
    pub fn ring_capacity_for(&self, window_size: usize) -> usize {
        self.ring_capacity.max(4 * window_size)
    }

    fn sanitize(&mut self) {
        // clamp instead of failing
        self.window_size = self.window_size.clamp(512, 16_384);
        self.hop_size = self.hop_size.clamp(64, self.window_size);
        self.ring_capacity = self.ring_capacity.clamp(4 * self.window_size, 1 << 20);

        self.min_freq = self.min_freq.clamp(40.0, 200.0);
        self.max_freq = self.max_freq.clamp(500.0, 4000.0);

        self.yin_threshold = self.yin_threshold.clamp(0.05, 0.5);
        self.octave_tolerance = self.octave_tolerance.clamp(0.0, 0.2);
        self.min_rms = self.min_rms.clamp(1e-4, 0.5);

        self.acceptance_confidence = self.acceptance_confidence.clamp(0.0, 1.0);
        self.stable_frames = self.stable_frames.clamp(1, 20);
        self.feedback_hold_ms = self.feedback_hold_ms.clamp(100, 10_000);

        self.level_attack = self.level_attack.clamp(0.001, 1.0);
        self.level_release = self.level_release.clamp(0.001, 1.0);
        self.level_floor_db = self.level_floor_db.clamp(-120.0, -20.0);
        self.poll_interval_ms = self.poll_interval_ms.clamp(1, 50);
    }
}

/// Everything read once at session start.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Settings {
    pub analysis: AnalysisSettings,
    pub session: SessionConfig,
    /// Case-insensitive substring of the input device name; default device when `None`.
    pub device: Option<String>,
}

/// On-disk shape of the settings file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSettings {
    pub strings: Option<BTreeSet<StringId>>,
    pub difficulty: Option<Difficulty>,
    pub device: Option<String>,
    pub analysis: Option<AnalysisSettings>,
}

impl Settings {
    /// Defaults, then file, then environment, then clamping.
    pub fn load() -> Result<Self> {
        let mut settings = Self::default();

        // file first, env second.
        if let Some(file) = load_file_settings()? {
            settings.apply_file(file);
        }
        settings.apply_env_with(|name| env::var(name).ok());
        settings.sanitize();

        Ok(settings)
    }

    /// Reads settings from `path` only, without environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut settings = Self::default();
        settings.apply_file(read_json(path)?);
        settings.sanitize();
        Ok(settings)
    }

    pub fn apply_file(&mut self, file: FileSettings) {
        if let Some(strings) = file.strings {
            self.session.active_strings = strings;
        }
        if let Some(difficulty) = file.difficulty {
            self.session.difficulty = difficulty;
        }
        if let Some(device) = file.device {
            self.device = Some(device);
        }
        if let Some(analysis) = file.analysis {
            self.analysis = analysis;
        }
    }

    /// Applies `FRETFLOW_*` overrides read through `var`. Unparseable
    /// values are ignored.
    pub fn apply_env_with<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |name: &str| var(name).and_then(|v| v.trim().parse::<f64>().ok());

        if let Some(device) = var("FRETFLOW_DEVICE").filter(|d| !d.trim().is_empty()) {
            self.device = Some(device);
        }
        if let Some(v) = parse("FRETFLOW_WINDOW") {
            self.analysis.window_size = v as usize;
        }
        if let Some(v) = parse("FRETFLOW_HOP") {
            self.analysis.hop_size = v as usize;
        }
        if let Some(v) = parse("FRETFLOW_MIN_RMS") {
            self.analysis.min_rms = v as f32;
        }
        if let Some(difficulty) = var("FRETFLOW_DIFFICULTY").and_then(|v| v.parse().ok()) {
            self.session.difficulty = difficulty;
        }
        if let Some(strings) = var("FRETFLOW_STRINGS").and_then(|v| parse_strings(&v)) {
            self.session.active_strings = strings;
        }
    }

    pub fn sanitize(&mut self) {
        self.analysis.sanitize();
        self.device = self.device.take().filter(|d| !d.trim().is_empty());
    }
}

/// Parses a comma separated list such as `"E,A,e"`. `None` if any entry is unknown.
pub fn parse_strings(list: &str) -> Option<BTreeSet<StringId>> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.parse::<StringId>().ok())
        .collect()
}

fn load_file_settings() -> Result<Option<FileSettings>> {
    if let Ok(p) = env::var("FRETFLOW_CONFIG") {
        let path = PathBuf::from(p);
        if !path.exists() {
            return Err(FretflowError::ConfigIo {
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "FRETFLOW_CONFIG points to a missing file",
                ),
                path,
            });
        }
        return Ok(Some(read_json(&path)?));
    }

    let path = PathBuf::from(DEFAULT_CONFIG_FILE);
    if path.exists() {
        return Ok(Some(read_json(&path)?));
    }

    Ok(None)
}

fn read_json(path: &Path) -> Result<FileSettings> {
    let text = fs::read_to_string(path).map_err(|source| FretflowError::ConfigIo {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| FretflowError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.analysis.window_size, 2048);
        assert_eq!(settings.analysis.stable_frames, 3);
        assert_eq!(settings.session.difficulty, Difficulty::NaturalOnly);
        assert_eq!(
            settings.session.active_strings,
            BTreeSet::from([StringId::LowE, StringId::A])
        );
        assert!(settings.device.is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file: FileSettings = serde_json::from_str(
            r#"{ "strings": ["D", "e"], "difficulty": "all",
                 "analysis": { "hop_size": 256 } }"#,
        )
        .unwrap();
        let mut settings = Settings::default();
        settings.apply_file(file);
        settings.sanitize();

        assert_eq!(
            settings.session.active_strings,
            BTreeSet::from([StringId::D, StringId::HighE])
        );
        assert_eq!(settings.session.difficulty, Difficulty::All);
        assert_eq!(settings.analysis.hop_size, 256);
        assert_eq!(settings.analysis.window_size, 2048);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed = serde_json::from_str::<FileSettings>(r#"{ "colour": "blue" }"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn env_overrides_file() {
        let mut settings = Settings::default();
        settings.apply_env_with(env_of(&[
            ("FRETFLOW_DEVICE", "usb"),
            ("FRETFLOW_WINDOW", "4096"),
            ("FRETFLOW_DIFFICULTY", "all"),
            ("FRETFLOW_STRINGS", "G,B"),
            ("FRETFLOW_HOP", "not a number"),
        ]));
        settings.sanitize();

        assert_eq!(settings.device.as_deref(), Some("usb"));
        assert_eq!(settings.analysis.window_size, 4096);
        assert_eq!(settings.analysis.hop_size, 512);
        assert_eq!(settings.session.difficulty, Difficulty::All);
        assert_eq!(
            settings.session.active_strings,
            BTreeSet::from([StringId::G, StringId::B])
        );
    }

    #[test]
    fn bad_string_list_is_ignored() {
        let mut settings = Settings::default();
        settings.apply_env_with(env_of(&[("FRETFLOW_STRINGS", "E,X")]));
        assert_eq!(settings.session, SessionConfig::default());
    }

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let mut settings = Settings {
            analysis: AnalysisSettings {
                window_size: 10,
                hop_size: 1_000_000,
                ring_capacity: 0,
                yin_threshold: 5.0,
                stable_frames: 0,
                ..AnalysisSettings::default()
            },
            device: Some("   ".into()),
            ..Settings::default()
        };
        settings.sanitize();

        assert_eq!(settings.analysis.window_size, 512);
        assert_eq!(settings.analysis.hop_size, 512);
        assert_eq!(settings.analysis.ring_capacity, 2048);
        assert_eq!(settings.analysis.yin_threshold, 0.5);
        assert_eq!(settings.analysis.stable_frames, 1);
        assert!(settings.device.is_none());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = Settings::from_file(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, FretflowError::ConfigIo { .. }));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let path = env::temp_dir().join(format!("fretflow-bad-{}.json", std::process::id()));
        fs::write(&path, "{ not json").unwrap();
        let err = Settings::from_file(&path).unwrap_err();
        fs::remove_file(&path).ok();
        assert!(matches!(err, FretflowError::ConfigParse { .. }));
    }
}
