//! Drives the threaded trainer end to end with synthetic pull-mode sources.

use crossbeam_channel::Receiver;
use fretflow_core::audio::{AudioFrame, AudioSource, FrameReader, PullSource, Segment, ToneReader};
use fretflow_core::{
    AnalysisSettings, DeviceError, Difficulty, FeedbackState, SessionConfig, SourceFactory,
    StringId, Trainer, TrainerEvent,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SAMPLE_RATE: u32 = 16_000;

/// C3 through B3, one natural note after another.
const NATURALS_OCTAVE_3: [f32; 7] = [130.81, 146.83, 164.81, 174.61, 196.00, 220.00, 246.94];

fn scale_factory() -> SourceFactory {
    Arc::new(|| {
        let mut segments = Vec::new();
        for freq in NATURALS_OCTAVE_3 {
            segments.push(Segment::Tone {
                freq,
                amplitude: 0.5,
                duration: Duration::from_millis(400),
            });
            segments.push(Segment::Silence(Duration::from_millis(100)));
        }
        let reader = ToneReader::new(SAMPLE_RATE, segments).realtime(true);
        Box::new(PullSource::new(reader, "scale")) as Box<dyn AudioSource>
    })
}

fn collect_until_end(events: &Receiver<TrainerEvent>, timeout: Duration) -> Vec<TrainerEvent> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(left) {
            Ok(TrainerEvent::SessionEnded) => {
                seen.push(TrainerEvent::SessionEnded);
                break;
            }
            Ok(event) => seen.push(event),
            Err(_) => break,
        }
    }
    seen
}

#[test]
fn playing_every_natural_note_finds_the_target() {
    let mut trainer = Trainer::new(
        AnalysisSettings::default(),
        SessionConfig::default(),
        scale_factory(),
    )
    .with_seed(11);
    let events = trainer.events();

    let target = trainer.start_session().expect("session starts");
    assert!(target.pitch_class.is_natural());
    assert!(target.allowed_strings.contains(&target.string));

    let seen = collect_until_end(&events, Duration::from_secs(10));
    assert_eq!(seen.last(), Some(&TrainerEvent::SessionEnded));
    assert_eq!(seen.first(), Some(&TrainerEvent::TargetChanged(target)));
    assert!(
        seen.contains(&TrainerEvent::Feedback(FeedbackState::Correct)),
        "events: {seen:?}"
    );

    let snapshot = trainer.snapshot();
    assert!(!snapshot.running);
    assert_eq!(snapshot.feedback, FeedbackState::Idle);
    assert!(snapshot.stats.rounds_completed >= 1);
    assert!(snapshot.device_error.is_none());
    assert!(snapshot.last_note.is_some());
    assert_eq!(snapshot.stats.round_times.len() as u32, snapshot.stats.rounds_completed);
}

#[test]
fn reconfigure_while_running_redraws_an_ineligible_target() {
    let mut trainer = Trainer::new(
        AnalysisSettings::default(),
        SessionConfig::default(),
        scale_factory(),
    )
    .with_seed(5);
    let first = trainer.start_session().unwrap();
    assert_ne!(first.string, StringId::HighE);

    trainer
        .set_session_config(SessionConfig {
            active_strings: BTreeSet::from([StringId::HighE]),
            difficulty: Difficulty::All,
        })
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut target = trainer.target();
    while target.as_ref().map(|t| t.string) != Some(StringId::HighE) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
        target = trainer.target();
    }
    let target = target.expect("target while running");
    assert_eq!(target.string, StringId::HighE);
    assert_eq!(target.difficulty, Difficulty::All);

    trainer.stop_session();
    assert_eq!(trainer.feedback_state(), FeedbackState::Idle);
    assert_eq!(trainer.current_level(), 0.0);
}

/// Yields a few frames of tone, then loses the device.
struct FlakyReader {
    frames_left: u32,
    sequence: u64,
}

impl FrameReader for FlakyReader {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn read_frame(&mut self) -> Result<Option<AudioFrame>, DeviceError> {
        if self.frames_left == 0 {
            return Err(DeviceError::Disconnected);
        }
        self.frames_left -= 1;
        std::thread::sleep(Duration::from_millis(5));
        let frame = AudioFrame::new(vec![0.0; 256], SAMPLE_RATE, self.sequence);
        self.sequence += 1;
        Ok(Some(frame))
    }
}

#[test]
fn device_loss_ends_the_session_and_is_reported() {
    let factory: SourceFactory = Arc::new(|| {
        let reader = FlakyReader {
            frames_left: 8,
            sequence: 0,
        };
        Box::new(PullSource::new(reader, "flaky")) as Box<dyn AudioSource>
    });
    let mut trainer = Trainer::new(AnalysisSettings::default(), SessionConfig::default(), factory);
    let events = trainer.events();
    trainer.start_session().unwrap();

    let seen = collect_until_end(&events, Duration::from_secs(5));
    assert!(seen.contains(&TrainerEvent::DeviceError(DeviceError::Disconnected)));
    assert_eq!(seen.last(), Some(&TrainerEvent::SessionEnded));

    let snapshot = trainer.snapshot();
    assert_eq!(snapshot.device_error, Some(DeviceError::Disconnected));
    assert_eq!(snapshot.feedback, FeedbackState::Idle);
    assert!(!trainer.is_running());

    // No automatic retry, but the caller may start again.
    assert!(trainer.start_session().is_ok());
    trainer.stop_session();
}

/// Switches sample rate after the first frame.
struct RateSwitchReader {
    sequence: u64,
}

impl FrameReader for RateSwitchReader {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn read_frame(&mut self) -> Result<Option<AudioFrame>, DeviceError> {
        let rate = if self.sequence == 0 { SAMPLE_RATE } else { 22_050 };
        let frame = AudioFrame::new(vec![0.0; 256], rate, self.sequence);
        self.sequence += 1;
        Ok(Some(frame))
    }
}

#[test]
fn sample_rate_change_is_a_device_error() {
    let factory: SourceFactory = Arc::new(|| {
        Box::new(PullSource::new(RateSwitchReader { sequence: 0 }, "switch")) as Box<dyn AudioSource>
    });
    let mut trainer = Trainer::new(AnalysisSettings::default(), SessionConfig::default(), factory);
    let events = trainer.events();
    trainer.start_session().unwrap();

    let seen = collect_until_end(&events, Duration::from_secs(5));
    assert!(seen.contains(&TrainerEvent::DeviceError(DeviceError::SampleRateChanged {
        expected: SAMPLE_RATE,
        actual: 22_050,
    })));
}
