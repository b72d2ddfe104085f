// Audio playback module
// Uses Symphonia for decoding and cpal for output

pub mod decoder;
#[cfg(test)]
pub mod mock;
pub mod output;
pub mod player;

pub use player::CpalBackend;

use std::fmt;

use crate::error::BackendError;
use crate::track::StreamSource;

/// Opaque handle to one live backend stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-stream attributes the engine can adjust while playing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    /// Linear gain, 0.0 to 1.0
    Volume,
    /// Playback rate multiplier, 1.0 is normal speed
    Tempo,
}

/// Notifications a backend raises from its own threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEvent {
    /// The stream played to its natural end
    Ended(StreamHandle),
    /// The stream stopped delivering audio (decode error, device loss)
    Stalled(StreamHandle),
}

pub type BackendEventCallback = Box<dyn Fn(BackendEvent) + Send + Sync + 'static>;

/// Decode/mix/output library the playback engine drives.
///
/// The engine owns its backend exclusively and only ever keeps one stream
/// alive: `stop` must fully release a stream before the next
/// `create_stream` call.
pub trait AudioBackend: Send + 'static {
    /// Open a stream for the source. The stream starts paused.
    fn create_stream(&mut self, source: &StreamSource) -> Result<StreamHandle, BackendError>;

    fn play(&mut self, handle: StreamHandle) -> Result<(), BackendError>;

    /// Pause without releasing the stream
    fn pause(&mut self, handle: StreamHandle) -> Result<(), BackendError>;

    /// Stop and release the stream. Unknown handles are ignored.
    fn stop(&mut self, handle: StreamHandle);

    fn set_position(&mut self, handle: StreamHandle, seconds: f64) -> Result<(), BackendError>;

    fn position(&self, handle: StreamHandle) -> Result<f64, BackendError>;

    /// Total length in seconds, when the container reports one
    fn duration(&self, handle: StreamHandle) -> Option<f64>;

    fn set_attribute(&mut self, handle: StreamHandle, attribute: Attribute, value: f32) -> Result<(), BackendError>;

    /// Register the end/stall callback. Replaces any previous callback.
    fn set_event_callback(&mut self, callback: BackendEventCallback);
}
