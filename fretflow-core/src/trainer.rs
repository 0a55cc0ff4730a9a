//! # Trainer
//!
//! The thread-safe facade used by a presentation layer. A session runs on a
//! dedicated analysis thread that owns the audio source, the ring consumer,
//! the analyzer, and the session state machine. The caller sees only:
//!
//! - a [`Snapshot`] of the latest state, read without blocking the thread
//! - a channel of [`TrainerEvent`]s for state changes
//! - commands sent over a channel (reconfigure, shutdown)
//!
//! The source is built by a factory on the analysis thread, so sources that
//! cannot leave their creating thread (platform audio streams) work too.

use crate::analysis::Analyzer;
use crate::audio::{AudioSource, CpalSource, FrameSink};
use crate::config::{AnalysisSettings, Settings};
use crate::error::{DeviceError, FretflowError, Result};
use crate::ring::{RingCloser, WindowRead, ring_buffer};
use crate::session::{FeedbackState, Session, SessionConfig, SessionStats, TargetSpec};
use crate::tuning::Note;
use crossbeam_channel::{Receiver, Sender, select};
use parking_lot::RwLock;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Events beyond this many unread ones are dropped. The snapshot always
/// holds the current state.
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/// Builds a fresh audio source for each session.
pub type SourceFactory = Arc<dyn Fn() -> Box<dyn AudioSource> + Send + Sync>;

/// Latest state published by the analysis thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub feedback: FeedbackState,
    /// Smoothed input level in `[0, 1]`.
    pub level: f32,
    pub last_note: Option<Note>,
    pub target: Option<TargetSpec>,
    pub stats: SessionStats,
    /// Samples overwritten before analysis could read them.
    pub dropped_samples: u64,
    /// Set when a device fault ended the session.
    pub device_error: Option<DeviceError>,
    pub running: bool,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainerEvent {
    TargetChanged(TargetSpec),
    Feedback(FeedbackState),
    DeviceError(DeviceError),
    SessionEnded,
}

enum Command {
    Configure(SessionConfig),
    Shutdown,
}

struct Worker {
    commands: Sender<Command>,
    closer: RingCloser,
    thread_handle: Option<JoinHandle<()>>,
}

/// Ear-training session driver.
pub struct Trainer {
    analysis: AnalysisSettings,
    config: SessionConfig,
    seed: Option<u64>,
    factory: SourceFactory,
    shared: Arc<RwLock<Snapshot>>,
    events_tx: Sender<TrainerEvent>,
    events_rx: Receiver<TrainerEvent>,
    worker: Option<Worker>,
}

impl Trainer {
    pub fn new(analysis: AnalysisSettings, config: SessionConfig, factory: SourceFactory) -> Self {
        Self::with_event_capacity(analysis, config, factory, EVENT_QUEUE_CAPACITY)
    }

    fn with_event_capacity(
        analysis: AnalysisSettings,
        config: SessionConfig,
        factory: SourceFactory,
        capacity: usize,
    ) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::bounded(capacity);
        Self {
            analysis,
            config,
            seed: None,
            factory,
            shared: Arc::new(RwLock::new(Snapshot::default())),
            events_tx,
            events_rx,
            worker: None,
        }
    }

    /// Trainer capturing from the configured cpal input device.
    pub fn from_settings(settings: Settings) -> Self {
        let device = settings.device.clone();
        let factory: SourceFactory =
            Arc::new(move || Box::new(CpalSource::new(device.clone())) as Box<dyn AudioSource>);
        Self::new(settings.analysis, settings.session, factory)
    }

    /// Fixes the target sequence. Each session reuses the same seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn feedback_state(&self) -> FeedbackState {
        self.shared.read().feedback
    }

    pub fn current_level(&self) -> f32 {
        self.shared.read().level
    }

    pub fn last_detected_note(&self) -> Option<Note> {
        self.shared.read().last_note
    }

    pub fn target(&self) -> Option<TargetSpec> {
        self.shared.read().target.clone()
    }

    /// Reveals the current target, including its string and fret, without
    /// changing any state.
    pub fn request_hint(&self) -> Option<TargetSpec> {
        let target = self.target();
        if let Some(target) = &target {
            debug!(pitch = %target.pitch_class, fret = target.fret(), "hint requested");
        }
        target
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.read().stats.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.read().clone()
    }

    /// Receiver for state-change events. The queue is bounded; events that
    /// arrive while it is full are dropped.
    pub fn events(&self) -> Receiver<TrainerEvent> {
        self.events_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.shared.read().running
    }

    /// Replaces the string selection and difficulty. A running session
    /// applies it between two windows.
    pub fn set_session_config(&mut self, config: SessionConfig) -> Result<()> {
        config.validate()?;
        self.config = config.clone();
        if let Some(worker) = &self.worker {
            // A worker that already exited is reaped by the next start or stop.
            let _ = worker.commands.send(Command::Configure(config));
        }
        Ok(())
    }

    /// Opens the source, starts the analysis thread, and returns the first
    /// target. Fails without side effects if the device cannot be opened.
    pub fn start_session(&mut self) -> Result<TargetSpec> {
        if self.is_running() {
            return Err(FretflowError::SessionAlreadyRunning);
        }
        self.reap_worker();
        self.config.validate()?;

        *self.shared.write() = Snapshot::default();

        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let rng = match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };
        let context = WorkerContext {
            factory: Arc::clone(&self.factory),
            analysis: self.analysis.clone(),
            session: Session::new(self.config.clone(), self.analysis.policy(), rng),
            shared: Arc::clone(&self.shared),
            events: self.events_tx.clone(),
            commands: commands_rx,
        };

        let thread_handle = thread::Builder::new()
            .name("fretflow-analysis".into())
            .spawn(move || context.run(ready_tx))
            .map_err(|e| DeviceError::Stream(format!("failed to spawn analysis thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok((closer, target))) => {
                self.worker = Some(Worker {
                    commands: commands_tx,
                    closer,
                    thread_handle: Some(thread_handle),
                });
                Ok(target)
            }
            Ok(Err(err)) => {
                let _ = thread_handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(DeviceError::Stream("analysis thread exited during startup".into()).into())
            }
        }
    }

    /// Closes the source, discards buffered audio, and returns to `Idle`.
    /// Does nothing when no session is running.
    pub fn stop_session(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        worker.closer.close();
        let _ = worker.commands.send(Command::Shutdown);
        if let Some(handle) = worker.thread_handle.take() {
            if handle.join().is_err() {
                error!("analysis thread panicked");
            }
        }

        let mut snapshot = self.shared.write();
        snapshot.running = false;
        snapshot.feedback = FeedbackState::Idle;
        snapshot.target = None;
        snapshot.level = 0.0;
        info!("session stopped");
    }

    /// Joins a worker that ended on its own (device fault or end of input).
    fn reap_worker(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            if let Some(handle) = worker.thread_handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Trainer {
    fn drop(&mut self) {
        self.stop_session();
    }
}

type Ready = Result<(RingCloser, TargetSpec)>;

/// Everything the analysis thread owns.
struct WorkerContext {
    factory: SourceFactory,
    analysis: AnalysisSettings,
    session: Session,
    shared: Arc<RwLock<Snapshot>>,
    events: Sender<TrainerEvent>,
    commands: Receiver<Command>,
}

impl WorkerContext {
    fn run(mut self, ready: Sender<Ready>) {
        let mut source = (self.factory)();
        let name = source.name();

        let sample_rate = match source.open() {
            Ok(rate) => rate,
            Err(err) => {
                warn!(source = %name, error = %err, "failed to open audio source");
                let _ = ready.send(Err(err.into()));
                return;
            }
        };

        let mut analyzer = Analyzer::new(sample_rate, &self.analysis);
        let window_size = analyzer.window_size();
        let hop_size = analyzer.hop_size();
        let (producer, mut consumer) = ring_buffer(self.analysis.ring_capacity_for(window_size));
        let (faults_tx, faults_rx) = crossbeam_channel::unbounded();

        if let Err(err) = source.start(FrameSink::new(producer, faults_tx, sample_rate)) {
            warn!(source = %name, error = %err, "failed to start audio source");
            source.stop();
            let _ = ready.send(Err(err.into()));
            return;
        }

        let target = match self.session.start() {
            Ok(target) => target.clone(),
            Err(err) => {
                source.stop();
                let _ = ready.send(Err(err));
                return;
            }
        };
        info!(
            source = %name,
            sample_rate,
            window_size,
            hop_size,
            prompt = %target,
            "session started"
        );
        self.publish_start(&target);
        if ready.send(Ok((consumer.closer(), target))).is_err() {
            source.stop();
            return;
        }

        let poll = self.analysis.poll_interval();
        let commands = self.commands.clone();
        let mut dropped = 0u64;
        let mut ended_by_device = false;

        'session: loop {
            select! {
                recv(commands) -> command => match command {
                    Ok(Command::Configure(config)) => self.reconfigure(config),
                    Ok(Command::Shutdown) | Err(_) => break 'session,
                },
                default(poll) => {}
            }

            // A finished source drops its sender; the ring then reads as closed.
            if let Ok(err) = faults_rx.try_recv() {
                self.device_fault(err);
                ended_by_device = true;
                break 'session;
            }

            loop {
                let frame = match consumer.read_window(window_size, hop_size) {
                    WindowRead::Ready(window) => analyzer.process(window.samples, window.end),
                    WindowRead::Empty => break,
                    WindowRead::Closed => {
                        if let Ok(err) = faults_rx.try_recv() {
                            self.device_fault(err);
                            ended_by_device = true;
                        } else {
                            debug!(source = %name, "audio source closed");
                        }
                        break 'session;
                    }
                };
                let previous = self.session.state();
                let previous_target = self.session.target().cloned();
                let state = self.session.on_estimate(&frame.estimate);

                let mut snapshot = self.shared.write();
                snapshot.level = frame.level;
                snapshot.last_note = self.session.last_note();
                snapshot.feedback = state;
                if state != previous {
                    snapshot.stats = self.session.stats().clone();
                    self.emit(TrainerEvent::Feedback(state));
                }
                if self.session.target() != previous_target.as_ref() {
                    snapshot.target = self.session.target().cloned();
                    if let Some(target) = &snapshot.target {
                        info!(prompt = %target, "next target");
                        self.emit(TrainerEvent::TargetChanged(target.clone()));
                    }
                }
            }

            let total = consumer.dropped_samples();
            if total > dropped {
                warn!(dropped = total - dropped, total, "analysis fell behind, samples overwritten");
                dropped = total;
                self.shared.write().dropped_samples = total;
            }
        }

        source.stop();
        consumer.clear();
        self.session.stop();
        analyzer.reset();

        let mut snapshot = self.shared.write();
        snapshot.running = false;
        snapshot.feedback = FeedbackState::Idle;
        snapshot.target = None;
        snapshot.level = 0.0;
        snapshot.stats = self.session.stats().clone();
        drop(snapshot);

        if !ended_by_device {
            info!(
                rounds = self.session.stats().rounds_completed,
                "session ended"
            );
        }
        self.emit(TrainerEvent::SessionEnded);
    }

    fn emit(&self, event: TrainerEvent) {
        // Full means nobody is draining the queue; Disconnected cannot
        // happen while the trainer holds the receiver.
        let _ = self.events.try_send(event);
    }

    fn publish_start(&self, target: &TargetSpec) {
        let mut snapshot = self.shared.write();
        snapshot.running = true;
        snapshot.feedback = self.session.state();
        snapshot.target = Some(target.clone());
        self.emit(TrainerEvent::TargetChanged(target.clone()));
        self.emit(TrainerEvent::Feedback(snapshot.feedback));
    }

    fn reconfigure(&mut self, config: SessionConfig) {
        let before = self.session.target().cloned();
        if let Err(err) = self.session.configure(config) {
            warn!(error = %err, "rejected session configuration");
            return;
        }
        let after = self.session.target().cloned();
        let mut snapshot = self.shared.write();
        snapshot.feedback = self.session.state();
        if after != before {
            snapshot.target = after.clone();
            if let Some(target) = after {
                self.emit(TrainerEvent::TargetChanged(target));
            }
        }
    }

    fn device_fault(&mut self, err: DeviceError) {
        error!(error = %err, "audio device failed, ending session");
        self.shared.write().device_error = Some(err.clone());
        self.emit(TrainerEvent::DeviceError(err));
    }
}
