// Scripted backend for engine tests
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use super::{Attribute, AudioBackend, BackendEvent, BackendEventCallback, StreamHandle};
use crate::error::BackendError;
use crate::track::StreamSource;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(StreamHandle),
    Play(StreamHandle),
    Pause(StreamHandle),
    Stop(StreamHandle),
    SetPosition(StreamHandle, f64),
    SetAttribute(StreamHandle, Attribute, f32),
}

#[derive(Default)]
pub struct MockState {
    pub calls: Vec<Call>,
    pub live: HashSet<StreamHandle>,
    pub position: f64,
    pub duration: Option<f64>,
    /// Results for upcoming create_stream calls; empty means success
    pub create_results: VecDeque<Result<(), String>>,
    /// Number of upcoming set_position calls that fail
    pub failing_seeks: u32,
    pub callback: Option<BackendEventCallback>,
    next_id: u64,
}

/// Backend double whose state the test keeps a handle to
#[derive(Clone, Default)]
pub struct MockBackend {
    pub state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_position(&self, seconds: f64) {
        self.state.lock().position = seconds;
    }

    pub fn fail_next_create(&self, reason: &str) {
        self.state.lock().create_results.push_back(Err(reason.to_string()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn live_streams(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Fire a backend event the way the decode thread would
    pub fn emit(&self, event: BackendEvent) {
        let state = self.state.lock();
        if let Some(cb) = state.callback.as_ref() {
            cb(event);
        }
    }
}

impl AudioBackend for MockBackend {
    fn create_stream(&mut self, _source: &StreamSource) -> Result<StreamHandle, BackendError> {
        let mut state = self.state.lock();
        if let Some(Err(reason)) = state.create_results.pop_front() {
            return Err(BackendError::Source(reason));
        }
        assert!(state.live.is_empty(), "a previous stream was not released");
        state.next_id += 1;
        let handle = StreamHandle(state.next_id);
        state.live.insert(handle);
        state.position = 0.0;
        state.calls.push(Call::Create(handle));
        Ok(handle)
    }

    fn play(&mut self, handle: StreamHandle) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if !state.live.contains(&handle) {
            return Err(BackendError::UnknownStream(handle.0));
        }
        state.calls.push(Call::Play(handle));
        Ok(())
    }

    fn pause(&mut self, handle: StreamHandle) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.calls.push(Call::Pause(handle));
        Ok(())
    }

    fn stop(&mut self, handle: StreamHandle) {
        let mut state = self.state.lock();
        state.live.remove(&handle);
        state.calls.push(Call::Stop(handle));
    }

    fn set_position(&mut self, handle: StreamHandle, seconds: f64) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.calls.push(Call::SetPosition(handle, seconds));
        if state.failing_seeks > 0 {
            state.failing_seeks -= 1;
            return Err(BackendError::Seek("busy".to_string()));
        }
        if state.duration.is_some_and(|d| seconds > d) {
            return Err(BackendError::Seek("past the end".to_string()));
        }
        state.position = seconds;
        Ok(())
    }

    fn position(&self, _handle: StreamHandle) -> Result<f64, BackendError> {
        Ok(self.state.lock().position)
    }

    fn duration(&self, _handle: StreamHandle) -> Option<f64> {
        self.state.lock().duration
    }

    fn set_attribute(&mut self, handle: StreamHandle, attribute: Attribute, value: f32) -> Result<(), BackendError> {
        self.state.lock().calls.push(Call::SetAttribute(handle, attribute, value));
        Ok(())
    }

    fn set_event_callback(&mut self, callback: BackendEventCallback) {
        self.state.lock().callback = Some(callback);
    }
}
