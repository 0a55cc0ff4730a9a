//! # Session State Machine
//!
//! Owns the current target, the difficulty and string selection, and the
//! feedback state shown to the player.
//!
//! ```text
//! Idle --start--> Listening --stable detection--> Correct | Incorrect
//!                     ^                           | RelatedThird | RelatedFifth
//!                     +------ hold expired / next detection ------+
//! ```
//!
//! The state only moves when an estimate arrives. Unvoiced or
//! low-confidence estimates leave it untouched. A confident estimate counts
//! towards stability; once `stable_frames` consecutive estimates agree on a
//! pitch class, its relationship to the target becomes the feedback.
//! `Correct` completes the round: it stays up for the hold duration and the
//! first estimate after that draws the next target.

use crate::error::{FretflowError, Result};
use crate::fretboard::StringId;
use crate::pitch::PitchEstimate;
use crate::relationship::Relationship;
use crate::tuning::{Note, PitchClass};
use rand::SeedableRng;
use rand::seq::IndexedRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Which pitch classes may be drawn as targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Only the seven natural notes.
    #[default]
    #[serde(alias = "natural")]
    NaturalOnly,
    /// All twelve pitch classes.
    All,
}

impl Difficulty {
    /// Pitch classes eligible as targets.
    pub const fn pitch_classes(self) -> &'static [PitchClass] {
        match self {
            Difficulty::NaturalOnly => &PitchClass::NATURALS,
            Difficulty::All => &PitchClass::ALL,
        }
    }

    pub const fn allows(self, pitch_class: PitchClass) -> bool {
        match self {
            Difficulty::NaturalOnly => pitch_class.is_natural(),
            Difficulty::All => true,
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "natural" | "natural_only" | "naturals" => Ok(Difficulty::NaturalOnly),
            "all" => Ok(Difficulty::All),
            other => Err(format!("unknown difficulty `{other}` (expected natural or all)")),
        }
    }
}

/// String selection and difficulty supplied by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub active_strings: BTreeSet<StringId>,
    pub difficulty: Difficulty,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            active_strings: BTreeSet::from([StringId::LowE, StringId::A]),
            difficulty: Difficulty::NaturalOnly,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.active_strings.is_empty() {
            return Err(FretflowError::NoStringsSelected);
        }
        Ok(())
    }
}

/// The note the player is asked to find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub pitch_class: PitchClass,
    /// String the prompt names; always one of `allowed_strings`.
    pub string: StringId,
    pub allowed_strings: BTreeSet<StringId>,
    pub difficulty: Difficulty,
}

impl TargetSpec {
    /// Fret (0..=11) where the target sits on the prompted string.
    pub fn fret(&self) -> u8 {
        self.string.fret_of(self.pitch_class)
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on the {} string", self.pitch_class, self.string)
    }
}

/// Feedback shown to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FeedbackState {
    /// No target.
    #[default]
    Idle,
    /// Target set, waiting for a stable detection.
    Listening,
    Correct,
    Incorrect,
    /// Heard the major third above the target.
    RelatedThird,
    /// Heard the perfect fifth above the target.
    RelatedFifth,
}

impl FeedbackState {
    pub const fn from_relationship(relationship: Relationship) -> Self {
        match relationship {
            Relationship::Unison => FeedbackState::Correct,
            Relationship::MajorThird => FeedbackState::RelatedThird,
            Relationship::PerfectFifth => FeedbackState::RelatedFifth,
            Relationship::Unrelated => FeedbackState::Incorrect,
        }
    }

    /// `true` for the four round feedback states.
    pub const fn is_feedback(self) -> bool {
        !matches!(self, FeedbackState::Idle | FeedbackState::Listening)
    }
}

/// Acceptance rules for estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPolicy {
    pub acceptance_confidence: f32,
    pub stable_frames: u32,
    pub feedback_hold: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            acceptance_confidence: 0.6,
            stable_frames: 3,
            feedback_hold: Duration::from_secs(1),
        }
    }
}

/// Per-session performance counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub rounds_completed: u32,
    pub incorrect: u32,
    pub related: u32,
    /// Time from each target draw to its `Correct`, in stream time.
    pub round_times: Vec<Duration>,
}

impl SessionStats {
    pub fn average_time(&self) -> Option<Duration> {
        if self.round_times.is_empty() {
            return None;
        }
        Some(self.round_times.iter().sum::<Duration>() / self.round_times.len() as u32)
    }
}

/// The session state machine.
pub struct Session {
    config: SessionConfig,
    policy: SessionPolicy,
    state: FeedbackState,
    target: Option<TargetSpec>,
    previous_pitch: Option<PitchClass>,
    last_note: Option<Note>,
    /// Pitch class currently accumulating agreement and its count.
    candidate: Option<(PitchClass, u32)>,
    /// Last wrong answer added to the stats this round.
    counted: Option<(FeedbackState, PitchClass)>,
    feedback_since: Duration,
    round_started: Duration,
    /// Timestamp of the latest estimate seen.
    clock: Duration,
    stats: SessionStats,
    rng: ChaCha8Rng,
}

impl Session {
    pub fn new(config: SessionConfig, policy: SessionPolicy, rng: ChaCha8Rng) -> Self {
        Self {
            config,
            policy,
            state: FeedbackState::Idle,
            target: None,
            previous_pitch: None,
            last_note: None,
            candidate: None,
            counted: None,
            feedback_since: Duration::ZERO,
            round_started: Duration::ZERO,
            clock: Duration::ZERO,
            stats: SessionStats::default(),
            rng,
        }
    }

    /// Session with a deterministic target sequence.
    pub fn with_seed(config: SessionConfig, policy: SessionPolicy, seed: u64) -> Self {
        Self::new(config, policy, ChaCha8Rng::seed_from_u64(seed))
    }

    /// Draws the first target and starts listening.
    pub fn start(&mut self) -> Result<&TargetSpec> {
        self.config.validate()?;
        self.stats = SessionStats::default();
        self.last_note = None;
        self.draw_target()
    }

    /// Clears the target and returns to `Idle`.
    pub fn stop(&mut self) {
        self.target = None;
        self.candidate = None;
        self.state = FeedbackState::Idle;
    }

    /// Replaces the configuration. A running session keeps its target when
    /// still eligible and draws a new one otherwise.
    pub fn configure(&mut self, config: SessionConfig) -> Result<()> {
        config.validate()?;
        self.config = config;

        let eligible = self
            .target
            .as_ref()
            .map(|t| self.is_eligible(t.pitch_class, t.string));
        match eligible {
            None => Ok(()),
            Some(true) => {
                if let Some(target) = self.target.as_mut() {
                    target.allowed_strings = self.config.active_strings.clone();
                    target.difficulty = self.config.difficulty;
                }
                Ok(())
            }
            Some(false) => {
                debug!("current target no longer eligible, drawing a new one");
                self.draw_target().map(|_| ())
            }
        }
    }

    /// Draws the next target uniformly among eligible pitch classes,
    /// avoiding an immediate repeat when more than one is eligible.
    pub fn draw_target(&mut self) -> Result<&TargetSpec> {
        self.config.validate()?;
        let strings: Vec<StringId> = self.config.active_strings.iter().copied().collect();
        let string = *strings
            .choose(&mut self.rng)
            .ok_or(FretflowError::NoStringsSelected)?;

        let eligible = self.config.difficulty.pitch_classes();
        let fresh: Vec<PitchClass> = eligible
            .iter()
            .copied()
            .filter(|&p| Some(p) != self.previous_pitch)
            .collect();
        let pool = if fresh.is_empty() { eligible } else { &fresh[..] };
        let pitch_class = *pool
            .choose(&mut self.rng)
            .ok_or_else(|| FretflowError::InvalidConfig("no eligible pitch classes".into()))?;

        self.previous_pitch = Some(pitch_class);
        self.candidate = None;
        self.counted = None;
        self.state = FeedbackState::Listening;
        self.round_started = self.clock;
        info!(pitch = %pitch_class, string = %string, "new target");

        Ok(self.target.insert(TargetSpec {
            pitch_class,
            string,
            allowed_strings: self.config.active_strings.clone(),
            difficulty: self.config.difficulty,
        }))
    }

    /// Feeds one estimate and returns the resulting state.
    pub fn on_estimate(&mut self, estimate: &PitchEstimate) -> FeedbackState {
        self.clock = self.clock.max(estimate.timestamp);
        let Some(target) = self.target.as_ref().map(|t| t.pitch_class) else {
            return self.state;
        };

        if self.state.is_feedback()
            && self.clock.saturating_sub(self.feedback_since) >= self.policy.feedback_hold
        {
            if self.state == FeedbackState::Correct {
                // Round complete; draw_target only fails on an empty config,
                // which configure() and start() both reject.
                if self.draw_target().is_err() {
                    self.stop();
                }
                return self.state;
            }
            self.state = FeedbackState::Listening;
        }

        if self.state == FeedbackState::Correct {
            return self.state;
        }

        let Some(freq) = estimate.frequency_hz else {
            return self.state;
        };
        if estimate.confidence < self.policy.acceptance_confidence {
            return self.state;
        }
        let Some(note) = Note::from_frequency(freq) else {
            return self.state;
        };
        self.last_note = Some(note);

        let count = match self.candidate {
            Some((pitch, count)) if pitch == note.pitch_class => count + 1,
            _ => 1,
        };
        self.candidate = Some((note.pitch_class, count));
        if count < self.policy.stable_frames.max(1) {
            return self.state;
        }

        let next = FeedbackState::from_relationship(Relationship::between(note.pitch_class, target));
        if next != self.state {
            self.enter(next, note);
        }
        self.state
    }

    fn enter(&mut self, next: FeedbackState, note: Note) {
        debug!(from = ?self.state, to = ?next, note = %note, "feedback");
        self.state = next;
        self.feedback_since = self.clock;
        match next {
            FeedbackState::Correct => {
                let elapsed = self.clock.saturating_sub(self.round_started);
                self.stats.rounds_completed += 1;
                self.stats.round_times.push(elapsed);
                info!(note = %note, elapsed_ms = elapsed.as_millis() as u64, "correct");
            }
            FeedbackState::Incorrect
            | FeedbackState::RelatedThird
            | FeedbackState::RelatedFifth => {
                // A held note re-entering the same feedback after the hold is one answer.
                let answer = (next, note.pitch_class);
                if self.counted != Some(answer) {
                    self.counted = Some(answer);
                    if next == FeedbackState::Incorrect {
                        self.stats.incorrect += 1;
                    } else {
                        self.stats.related += 1;
                    }
                }
            }
            FeedbackState::Idle | FeedbackState::Listening => {}
        }
    }

    fn is_eligible(&self, pitch_class: PitchClass, string: StringId) -> bool {
        self.config.difficulty.allows(pitch_class) && self.config.active_strings.contains(&string)
    }

    pub fn state(&self) -> FeedbackState {
        self.state
    }

    pub fn target(&self) -> Option<&TargetSpec> {
        self.target.as_ref()
    }

    /// Reveals the target without touching the state.
    pub fn hint(&self) -> Option<&TargetSpec> {
        self.target.as_ref()
    }

    pub fn last_note(&self) -> Option<Note> {
        self.last_note
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}
