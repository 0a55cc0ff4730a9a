//! # Error Types
//!
//! Two layers of errors: [`DeviceError`] covers everything that can go wrong
//! with the input device and is the only condition that ends a running
//! session. [`FretflowError`] wraps it together with configuration and
//! lifecycle errors.
//!
//! Buffer overruns and low-confidence detections are deliberately absent:
//! they are counters and normal "no update" outcomes, not errors.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of the audio input device or its stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The host reports no input device (or none matched the filter).
    #[error("no input device available{}", .0.as_deref().map(|f| format!(" matching `{f}`")).unwrap_or_default())]
    NoInputDevice(Option<String>),

    /// The device offers no sample format we can convert to `f32`.
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Querying the device configuration failed.
    #[error("failed to query stream configuration: {0}")]
    StreamConfig(String),

    /// Building the input stream failed.
    #[error("failed to build input stream: {0}")]
    BuildStream(String),

    /// Starting the input stream failed.
    #[error("failed to start input stream: {0}")]
    PlayStream(String),

    /// The device went away while capturing.
    #[error("input device disconnected")]
    Disconnected,

    /// Any other backend error reported while the stream was running.
    #[error("audio stream error: {0}")]
    Stream(String),

    /// A source delivered frames at a different rate than it started with.
    #[error("sample rate changed from {expected} Hz to {actual} Hz")]
    SampleRateChanged {
        /// Rate negotiated when the source started.
        expected: u32,
        /// Rate carried by the offending frame.
        actual: u32,
    },
}

impl From<cpal::StreamError> for DeviceError {
    fn from(err: cpal::StreamError) -> Self {
        match err {
            cpal::StreamError::DeviceNotAvailable => DeviceError::Disconnected,
            other => DeviceError::Stream(other.to_string()),
        }
    }
}

/// Top-level error for the trainer core.
#[derive(Debug, Error)]
pub enum FretflowError {
    /// Input device failure; fatal to the current session.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// A session cannot run without at least one active string.
    #[error("no strings selected; select at least one string to drill")]
    NoStringsSelected,

    /// Settings that cannot be clamped into something usable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `start_session` was called while a session is already running.
    #[error("a session is already running")]
    SessionAlreadyRunning,

    /// Reading the settings file failed.
    #[error("failed to read config {}: {source}", path.display())]
    ConfigIo {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON for [`crate::config::FileSettings`].
    #[error("invalid JSON in {}: {source}", path.display())]
    ConfigParse {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for trainer operations.
pub type Result<T> = std::result::Result<T, FretflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_not_available_maps_to_disconnected() {
        let err: DeviceError = cpal::StreamError::DeviceNotAvailable.into();
        assert_eq!(err, DeviceError::Disconnected);
    }

    #[test]
    fn no_input_device_message_names_filter() {
        let err = DeviceError::NoInputDevice(Some("scarlett".into()));
        assert_eq!(err.to_string(), "no input device available matching `scarlett`");
        assert_eq!(
            DeviceError::NoInputDevice(None).to_string(),
            "no input device available"
        );
    }

    #[test]
    fn device_error_is_transparent_in_wrapper() {
        let err = FretflowError::from(DeviceError::Disconnected);
        assert_eq!(err.to_string(), "input device disconnected");
    }
}
