//! # Audio Capture Module
//!
//! Audio sources feed mono `f32` samples into the ring buffer through a
//! [`FrameSink`]. Two delivery styles are supported:
//!
//! - **Push**: [`CpalSource`] registers a callback with the platform audio
//!   subsystem; the callback only downmixes into the ring.
//! - **Pull**: [`PullSource`] runs a thread that repeatedly calls a blocking
//!   [`FrameReader`] and forwards each [`AudioFrame`].
//!
//! Device failures are reported once through the sink's [`DeviceFault`] and
//! close the ring. Sources never reopen a device on their own.

use crate::error::DeviceError;
use crate::ring::{RingCloser, RingProducer};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, SupportedStreamConfigRange};
use crossbeam_channel::Sender;
use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Preferred capture rate when the device supports it.
pub const PREFERRED_SAMPLE_RATE: u32 = 44_100;

/// Samples per frame produced by the pull-mode readers in this module.
pub const FRAME_SIZE: usize = 512;

/// A block of mono samples as delivered by a source.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
    sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            sequence,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Monotonically increasing per source, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Reports a device failure and closes the ring. Only the first report is kept.
#[derive(Clone)]
pub struct DeviceFault {
    errors: Sender<DeviceError>,
    ring: RingCloser,
    reported: Arc<AtomicBool>,
}

impl DeviceFault {
    pub fn report(&self, err: DeviceError) {
        if self.reported.swap(true, Ordering::AcqRel) {
            return;
        }
        // The receiver may already be gone during shutdown.
        let _ = self.errors.send(err);
        self.ring.close();
    }

    pub fn is_reported(&self) -> bool {
        self.reported.load(Ordering::Acquire)
    }
}

/// Producer side handed to a source when it starts.
pub struct FrameSink {
    ring: RingProducer,
    fault: DeviceFault,
    sample_rate: u32,
    next_sequence: u64,
}

impl FrameSink {
    pub fn new(ring: RingProducer, errors: Sender<DeviceError>, sample_rate: u32) -> Self {
        let fault = DeviceFault {
            errors,
            ring: ring.closer(),
            reported: Arc::new(AtomicBool::new(false)),
        };
        Self {
            ring,
            fault,
            sample_rate,
            next_sequence: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Writes mono samples. Never blocks or allocates.
    pub fn push_samples(&mut self, samples: &[f32]) {
        self.ring.write(samples);
        self.next_sequence += 1;
    }

    /// Averages interleaved channels down to mono and writes them.
    pub fn push_interleaved<T>(&mut self, data: &[T], channels: usize)
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let channels = channels.max(1);
        let scale = 1.0 / channels as f32;
        self.ring.write_iter(data.chunks_exact(channels).map(|frame| {
            frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() * scale
        }));
        self.next_sequence += 1;
    }

    /// Writes a frame after checking that its rate matches the session's.
    ///
    /// A rate change is reported as a fault rather than resampled.
    pub fn push_frame(&mut self, frame: &AudioFrame) -> Result<(), DeviceError> {
        if frame.sample_rate() != self.sample_rate {
            let err = DeviceError::SampleRateChanged {
                expected: self.sample_rate,
                actual: frame.sample_rate(),
            };
            self.fault.report(err.clone());
            return Err(err);
        }
        if frame.sequence() < self.next_sequence {
            debug!(
                sequence = frame.sequence(),
                expected = self.next_sequence,
                "out-of-order frame"
            );
        }
        self.ring.write(frame.samples());
        self.next_sequence = frame.sequence() + 1;
        Ok(())
    }

    /// Handle for reporting failures from another callback or thread.
    pub fn fault(&self) -> DeviceFault {
        self.fault.clone()
    }

    /// `true` once the consumer or a fault closed the ring.
    pub fn is_closed(&self) -> bool {
        self.ring.is_closed()
    }
}

/// A capture device or stream of frames.
///
/// `open` negotiates the format and reports the sample rate; `start` begins
/// delivering into the sink; `stop` releases the device. `stop` must be
/// safe to call more than once and without a prior `start`.
pub trait AudioSource {
    /// Human-readable name for logs and the presentation layer.
    fn name(&self) -> String;

    /// Prepares the device and returns the fixed sample rate it will deliver.
    fn open(&mut self) -> Result<u32, DeviceError>;

    fn start(&mut self, sink: FrameSink) -> Result<(), DeviceError>;

    fn stop(&mut self);
}

// ---------------------------------------------------------------------------
// Push mode: cpal
// ---------------------------------------------------------------------------

/// Push-mode source backed by a cpal input stream.
pub struct CpalSource {
    device_filter: Option<String>,
    device: Option<cpal::Device>,
    config: Option<(cpal::StreamConfig, SampleFormat)>,
    stream: Option<cpal::Stream>,
    label: String,
}

impl CpalSource {
    /// Source for the default input device, or the first whose name contains
    /// `device_filter` (case-insensitive).
    pub fn new(device_filter: Option<String>) -> Self {
        Self {
            device_filter,
            device: None,
            config: None,
            stream: None,
            label: "default input".into(),
        }
    }

    fn pick_input_device(&self) -> Result<cpal::Device, DeviceError> {
        let host = cpal::default_host();

        if let Some(filter) = &self.device_filter {
            let filter_lc = filter.to_lowercase();
            let devices = host
                .input_devices()
                .map_err(|e| DeviceError::StreamConfig(e.to_string()))?;
            for device in devices {
                if let Ok(name) = device.name() {
                    if name.to_lowercase().contains(&filter_lc) {
                        return Ok(device);
                    }
                }
            }
            return Err(DeviceError::NoInputDevice(Some(filter.clone())));
        }

        host.default_input_device()
            .ok_or(DeviceError::NoInputDevice(None))
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut sink: FrameSink,
    ) -> Result<cpal::Stream, DeviceError>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let channels = config.channels as usize;
        let fault = sink.fault();
        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    if !sink.is_closed() {
                        sink.push_interleaved(data, channels);
                    }
                },
                move |err| fault.report(DeviceError::from(err)),
                None,
            )
            .map_err(|e| DeviceError::BuildStream(e.to_string()))
    }
}

impl AudioSource for CpalSource {
    fn name(&self) -> String {
        self.label.clone()
    }

    fn open(&mut self) -> Result<u32, DeviceError> {
        let device = self.pick_input_device()?;
        if let Ok(name) = device.name() {
            self.label = name;
        }
        info!(device = %self.label, "using audio input device");

        let configs = device
            .supported_input_configs()
            .map_err(|e| DeviceError::StreamConfig(e.to_string()))?
            .collect::<Vec<_>>();
        let supported = find_supported_config(configs, PREFERRED_SAMPLE_RATE)
            .ok_or_else(|| DeviceError::UnsupportedFormat("no f32/i16/u16 input format".into()))?;

        let rate = PREFERRED_SAMPLE_RATE.clamp(
            supported.min_sample_rate().0,
            supported.max_sample_rate().0,
        );
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.with_sample_rate(cpal::SampleRate(rate)).into();
        info!(sample_rate = rate, channels = config.channels, ?format, "selected input format");

        self.device = Some(device);
        self.config = Some((config, format));
        Ok(rate)
    }

    fn start(&mut self, sink: FrameSink) -> Result<(), DeviceError> {
        let device = self
            .device
            .as_ref()
            .ok_or(DeviceError::NoInputDevice(self.device_filter.clone()))?;
        let (config, format) = self
            .config
            .as_ref()
            .ok_or_else(|| DeviceError::StreamConfig("source was not opened".into()))?;

        let stream = match format {
            SampleFormat::F32 => Self::build_stream::<f32>(device, config, sink)?,
            SampleFormat::I16 => Self::build_stream::<i16>(device, config, sink)?,
            SampleFormat::U16 => Self::build_stream::<u16>(device, config, sink)?,
            other => return Err(DeviceError::UnsupportedFormat(format!("{other:?}"))),
        };
        stream
            .play()
            .map_err(|e| DeviceError::PlayStream(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!(error = %e, "error pausing input stream");
            }
            drop(stream);
            debug!(device = %self.label, "input stream closed");
        }
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Finds the best supported configuration for the target sample rate.
///
/// Prefers mono over multi-channel, `f32` over integer formats, then the
/// range closest to `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| {
            matches!(
                c.sample_format(),
                SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
            )
        })
        .min_by_key(|c| {
            let rate_distance = if (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&target_rate) {
                0
            } else {
                let min_diff = c.min_sample_rate().0.abs_diff(target_rate);
                let max_diff = c.max_sample_rate().0.abs_diff(target_rate);
                min_diff.min(max_diff)
            };
            let format_rank = match c.sample_format() {
                SampleFormat::F32 => 0,
                SampleFormat::I16 => 1,
                _ => 2,
            };
            (c.channels() != 1, format_rank, rate_distance)
        })
}

// ---------------------------------------------------------------------------
// Pull mode
// ---------------------------------------------------------------------------

/// Blocking frame producer for pull-mode capture.
pub trait FrameReader: Send + 'static {
    /// Sample rate of every frame this reader yields.
    fn sample_rate(&self) -> u32;

    /// Blocks until the next frame is ready. `Ok(None)` ends the stream.
    fn read_frame(&mut self) -> Result<Option<AudioFrame>, DeviceError>;
}

/// Pull-mode source: a thread that drains a [`FrameReader`] into the ring.
pub struct PullSource<R: FrameReader> {
    reader: Option<R>,
    sample_rate: u32,
    label: String,
    stop: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl<R: FrameReader> PullSource<R> {
    pub fn new(reader: R, label: impl Into<String>) -> Self {
        Self {
            sample_rate: reader.sample_rate(),
            reader: Some(reader),
            label: label.into(),
            stop: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }
}

impl<R: FrameReader> AudioSource for PullSource<R> {
    fn name(&self) -> String {
        self.label.clone()
    }

    fn open(&mut self) -> Result<u32, DeviceError> {
        if self.reader.is_none() {
            return Err(DeviceError::Stream("pull source already consumed".into()));
        }
        Ok(self.sample_rate)
    }

    fn start(&mut self, mut sink: FrameSink) -> Result<(), DeviceError> {
        let mut reader = self
            .reader
            .take()
            .ok_or_else(|| DeviceError::Stream("pull source already consumed".into()))?;
        let stop = Arc::clone(&self.stop);
        let label = self.label.clone();

        let handle = thread::Builder::new()
            .name("fretflow-pull".into())
            .spawn(move || {
                let fault = sink.fault();
                while !stop.load(Ordering::Acquire) && !sink.is_closed() {
                    match reader.read_frame() {
                        Ok(Some(frame)) if frame.is_empty() => {}
                        Ok(Some(frame)) => {
                            if sink.push_frame(&frame).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!(source = %label, "pull source exhausted");
                            break;
                        }
                        Err(err) => {
                            fault.report(err);
                            break;
                        }
                    }
                }
                // Dropping the sink closes the ring.
            })
            .map_err(|e| DeviceError::PlayStream(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!(source = %self.label, "pull thread panicked");
            }
        }
    }
}

impl<R: FrameReader> Drop for PullSource<R> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A segment of a scripted test signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment {
    /// Sine at `freq` Hz with peak `amplitude` for `duration`.
    Tone {
        freq: f32,
        amplitude: f32,
        duration: Duration,
    },
    Silence(Duration),
}

/// Synthetic reader that plays a script of tones and silences.
///
/// With `realtime` set, each frame is released no earlier than its
/// wall-clock position, like a capture device would.
pub struct ToneReader {
    sample_rate: u32,
    segments: Vec<Segment>,
    segment: usize,
    segment_pos: u64,
    phase: f32,
    sequence: u64,
    realtime: bool,
    started: Option<Instant>,
    emitted: u64,
}

impl ToneReader {
    pub fn new(sample_rate: u32, segments: Vec<Segment>) -> Self {
        Self {
            sample_rate,
            segments,
            segment: 0,
            segment_pos: 0,
            phase: 0.0,
            sequence: 0,
            realtime: false,
            started: None,
            emitted: 0,
        }
    }

    /// Paces frames at the sample rate instead of producing them at once.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    fn segment_len(&self, segment: &Segment) -> u64 {
        let duration = match segment {
            Segment::Tone { duration, .. } | Segment::Silence(duration) => *duration,
        };
        (duration.as_secs_f64() * self.sample_rate as f64).round() as u64
    }

    fn next_sample(&mut self) -> Option<f32> {
        loop {
            let segment = *self.segments.get(self.segment)?;
            if self.segment_pos < self.segment_len(&segment) {
                self.segment_pos += 1;
                return Some(match segment {
                    Segment::Tone { freq, amplitude, .. } => {
                        let sample = amplitude * self.phase.sin();
                        self.phase = (self.phase + TAU * freq / self.sample_rate as f32) % TAU;
                        sample
                    }
                    Segment::Silence(_) => 0.0,
                });
            }
            self.segment += 1;
            self.segment_pos = 0;
        }
    }
}

impl FrameReader for ToneReader {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frame(&mut self) -> Result<Option<AudioFrame>, DeviceError> {
        let mut samples = Vec::with_capacity(FRAME_SIZE);
        while samples.len() < FRAME_SIZE {
            match self.next_sample() {
                Some(sample) => samples.push(sample),
                None => break,
            }
        }
        if samples.is_empty() {
            return Ok(None);
        }

        if self.realtime {
            let started = *self.started.get_or_insert_with(Instant::now);
            let due = Duration::from_secs_f64(self.emitted as f64 / self.sample_rate as f64);
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                thread::sleep(wait);
            }
        }

        self.emitted += samples.len() as u64;
        let frame = AudioFrame::new(samples, self.sample_rate, self.sequence);
        self.sequence += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::{RingConsumer, WindowRead, ring_buffer};

    fn make_sink(
        capacity: usize,
        rate: u32,
    ) -> (FrameSink, RingConsumer, crossbeam_channel::Receiver<DeviceError>) {
        let (producer, consumer) = ring_buffer(capacity);
        let (tx, rx) = crossbeam_channel::unbounded();
        (FrameSink::new(producer, tx, rate), consumer, rx)
    }

    #[test]
    fn interleaved_stereo_is_averaged() {
        let (mut sink, mut consumer, _rx) = make_sink(16, 48_000);
        sink.push_interleaved(&[1.0f32, 0.0, 0.5, 0.5, -1.0, 1.0], 2);
        match consumer.read_window(3, 3) {
            WindowRead::Ready(window) => assert_eq!(window.samples, &[0.5, 0.5, 0.0]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn integer_samples_are_converted() {
        let (mut sink, mut consumer, _rx) = make_sink(16, 48_000);
        sink.push_interleaved(&[i16::MAX, 0, i16::MIN], 1);
        match consumer.read_window(3, 3) {
            WindowRead::Ready(window) => {
                assert!((window.samples[0] - 1.0).abs() < 1e-3);
                assert_eq!(window.samples[1], 0.0);
                assert_eq!(window.samples[2], -1.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rate_change_is_a_device_error() {
        let (mut sink, consumer, rx) = make_sink(16, 48_000);
        let frame = AudioFrame::new(vec![0.0; 4], 44_100, 0);
        let err = sink.push_frame(&frame).unwrap_err();
        assert_eq!(
            err,
            DeviceError::SampleRateChanged {
                expected: 48_000,
                actual: 44_100
            }
        );
        assert_eq!(rx.try_recv().unwrap(), err);
        assert!(consumer.is_closed());
    }

    #[test]
    fn fault_is_reported_once() {
        let (sink, _consumer, rx) = make_sink(16, 48_000);
        let fault = sink.fault();
        fault.report(DeviceError::Disconnected);
        fault.report(DeviceError::Stream("late".into()));
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![DeviceError::Disconnected]);
        assert!(fault.is_reported());
    }

    #[test]
    fn tone_reader_follows_script() {
        let mut reader = ToneReader::new(
            8_000,
            vec![
                Segment::Silence(Duration::from_millis(100)),
                Segment::Tone {
                    freq: 440.0,
                    amplitude: 0.5,
                    duration: Duration::from_millis(100),
                },
            ],
        );
        let mut samples = Vec::new();
        let mut sequence = 0;
        while let Some(frame) = reader.read_frame().unwrap() {
            assert_eq!(frame.sequence(), sequence);
            assert_eq!(frame.sample_rate(), 8_000);
            sequence += 1;
            samples.extend_from_slice(frame.samples());
        }
        assert_eq!(samples.len(), 1600);
        assert!(samples[..800].iter().all(|&s| s == 0.0));
        assert!(samples[800..].iter().any(|&s| s.abs() > 0.4));
    }

    #[test]
    fn pull_source_fills_ring_then_closes_it() {
        let reader = ToneReader::new(
            8_000,
            vec![Segment::Tone {
                freq: 200.0,
                amplitude: 0.5,
                duration: Duration::from_millis(250),
            }],
        );
        let mut source = PullSource::new(reader, "script");
        let rate = source.open().unwrap();
        let (sink, mut consumer, rx) = make_sink(4096, rate);
        source.start(sink).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !consumer.is_closed() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        source.stop();

        assert!(rx.try_recv().is_err());
        assert!(matches!(consumer.read_window(2000, 2000), WindowRead::Ready(_)));
        assert_eq!(consumer.read_window(2000, 2000), WindowRead::Closed);
        assert!(source.open().is_err());
    }

    #[test]
    fn supported_config_prefers_mono_f32_in_range() {
        let range = |channels, format, min, max| {
            SupportedStreamConfigRange::new(
                channels,
                cpal::SampleRate(min),
                cpal::SampleRate(max),
                cpal::SupportedBufferSize::Unknown,
                format,
            )
        };
        let best = find_supported_config(
            vec![
                range(2, SampleFormat::F32, 44_100, 48_000),
                range(1, SampleFormat::I16, 44_100, 48_000),
                range(1, SampleFormat::F32, 8_000, 16_000),
                range(1, SampleFormat::F32, 44_100, 96_000),
            ],
            44_100,
        )
        .unwrap();
        assert_eq!(best.channels(), 1);
        assert_eq!(best.sample_format(), SampleFormat::F32);
        assert_eq!(best.max_sample_rate().0, 96_000);
    }
}
