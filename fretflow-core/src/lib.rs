// fretflow-core/src/lib.rs

//! The core logic for the fretboard note trainer.
//! This crate captures audio, detects pitch, and runs the training
//! session: a target note is drawn, the player plays it, and the detected
//! note is classified against the target. It is completely headless and
//! contains no UI code.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod fft;
pub mod fretboard;
pub mod level;
pub mod pitch;
pub mod relationship;
pub mod ring;
pub mod session;
pub mod trainer;
pub mod tuning;

pub use config::{AnalysisSettings, Settings};
pub use error::{DeviceError, FretflowError, Result};
pub use fretboard::StringId;
pub use pitch::PitchEstimate;
pub use relationship::Relationship;
pub use session::{Difficulty, FeedbackState, SessionConfig, SessionStats, TargetSpec};
pub use trainer::{Snapshot, SourceFactory, Trainer, TrainerEvent};
pub use tuning::{Note, PitchClass};
