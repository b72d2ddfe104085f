// Local audio backend: Symphonia decode thread -> rubato rate conversion -> cpal output
use parking_lot::Mutex;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::decoder::AudioDecoder;
use super::output::{AudioOutput, OutputMode};
use super::{Attribute, AudioBackend, BackendEvent, BackendEventCallback, StreamHandle};
use crate::error::BackendError;
use crate::settings::OutputSettings;
use crate::track::StreamSource;

const RESAMPLER_CHUNK: usize = 1024;
const MAX_TEMPO_SPAN: f64 = 8.0;

type SharedCallback = Arc<Mutex<Option<BackendEventCallback>>>;

/// State shared between the backend and one stream's decode thread
struct StreamControl {
    playing: AtomicBool,
    stop: AtomicBool,
    seek_to: Mutex<Option<f64>>,
    /// Source frames handed to the output so far
    frames_played: AtomicU64,
    tempo: Mutex<f32>,
}

struct StreamSlot {
    control: Arc<StreamControl>,
    sample_rate: u32,
    duration: Option<f64>,
    worker: Option<JoinHandle<()>>,
}

pub struct CpalBackend {
    settings: OutputSettings,
    output: Option<Arc<AudioOutput>>,
    streams: HashMap<StreamHandle, StreamSlot>,
    next_id: u64,
    callback: SharedCallback,
}

impl CpalBackend {
    pub fn new(settings: OutputSettings) -> Self {
        Self {
            settings,
            output: None,
            streams: HashMap::new(),
            next_id: 1,
            callback: Arc::new(Mutex::new(None)),
        }
    }

    /// Output for a source at `sample_rate`, reopening it when exclusive
    /// mode wants a different native rate
    fn output_for(&mut self, sample_rate: u32) -> Result<Arc<AudioOutput>, BackendError> {
        if let Some(output) = &self.output {
            if !self.settings.exclusive_mode || output.sample_rate() == sample_rate {
                return Ok(output.clone());
            }
        }
        // Release the old device before opening a new one
        self.output = None;

        let mode = if self.settings.exclusive_mode {
            OutputMode::Exclusive { sample_rate }
        } else {
            OutputMode::Shared
        };
        let output = Arc::new(AudioOutput::open(
            mode,
            self.settings.buffer_ms,
            self.settings.exclusive_init_attempts,
        )?);
        self.output = Some(output.clone());
        Ok(output)
    }

    fn slot(&self, handle: StreamHandle) -> Result<&StreamSlot, BackendError> {
        self.streams.get(&handle).ok_or(BackendError::UnknownStream(handle.0))
    }
}

impl AudioBackend for CpalBackend {
    fn create_stream(&mut self, source: &StreamSource) -> Result<StreamHandle, BackendError> {
        // Only one live stream at a time
        let live: Vec<StreamHandle> = self.streams.keys().copied().collect();
        for handle in live {
            self.stop(handle);
        }

        let decoder = AudioDecoder::open(source)?;
        let sample_rate = decoder.sample_rate();
        let duration = decoder.duration_secs();
        let output = self.output_for(sample_rate)?;
        output.set_paused(true);

        let handle = StreamHandle(self.next_id);
        self.next_id += 1;

        let control = Arc::new(StreamControl {
            playing: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            seek_to: Mutex::new(None),
            frames_played: AtomicU64::new(0),
            tempo: Mutex::new(1.0),
        });

        let worker = {
            let control = control.clone();
            let callback = self.callback.clone();
            std::thread::Builder::new()
                .name(format!("decode-{}", handle.0))
                .spawn(move || decode_loop(handle, decoder, output, control, callback))
                .map_err(|e| BackendError::Output(format!("Failed to spawn decode thread: {}", e)))?
        };

        tracing::debug!(%handle, sample_rate, ?duration, "stream created");
        self.streams.insert(
            handle,
            StreamSlot {
                control,
                sample_rate,
                duration,
                worker: Some(worker),
            },
        );
        Ok(handle)
    }

    fn play(&mut self, handle: StreamHandle) -> Result<(), BackendError> {
        let slot = self.slot(handle)?;
        slot.control.playing.store(true, Ordering::SeqCst);
        if let Some(output) = &self.output {
            output.set_paused(false);
        }
        Ok(())
    }

    fn pause(&mut self, handle: StreamHandle) -> Result<(), BackendError> {
        let slot = self.slot(handle)?;
        slot.control.playing.store(false, Ordering::SeqCst);
        if let Some(output) = &self.output {
            output.set_paused(true);
        }
        Ok(())
    }

    fn stop(&mut self, handle: StreamHandle) {
        let Some(mut slot) = self.streams.remove(&handle) else {
            return;
        };
        slot.control.stop.store(true, Ordering::SeqCst);
        if let Some(output) = &self.output {
            output.clear();
            output.set_paused(true);
        }
        if let Some(worker) = slot.worker.take() {
            if worker.join().is_err() {
                tracing::error!(%handle, "decode thread panicked");
            }
        }
        tracing::debug!(%handle, "stream released");
    }

    fn set_position(&mut self, handle: StreamHandle, seconds: f64) -> Result<(), BackendError> {
        let slot = self.slot(handle)?;
        if let Some(duration) = slot.duration {
            if seconds > duration {
                return Err(BackendError::Seek(format!("{:.2}s is past the end ({:.2}s)", seconds, duration)));
            }
        }
        *slot.control.seek_to.lock() = Some(seconds.max(0.0));
        Ok(())
    }

    fn position(&self, handle: StreamHandle) -> Result<f64, BackendError> {
        let slot = self.slot(handle)?;
        if let Some(pending) = *slot.control.seek_to.lock() {
            return Ok(pending);
        }
        let decoded = slot.control.frames_played.load(Ordering::Relaxed) as f64 / slot.sample_rate as f64;
        // Samples still sitting in the ring buffer have not been heard yet
        let buffered = self
            .output
            .as_ref()
            .map(|o| o.buffered() as f64 / (o.channels() as f64 * o.sample_rate() as f64))
            .unwrap_or(0.0)
            * *slot.control.tempo.lock() as f64;
        Ok((decoded - buffered).max(0.0))
    }

    fn duration(&self, handle: StreamHandle) -> Option<f64> {
        self.streams.get(&handle).and_then(|s| s.duration)
    }

    fn set_attribute(&mut self, handle: StreamHandle, attribute: Attribute, value: f32) -> Result<(), BackendError> {
        let slot = self.slot(handle)?;
        match attribute {
            Attribute::Volume => {
                if let Some(output) = &self.output {
                    output.set_volume(value);
                }
            }
            Attribute::Tempo => {
                *slot.control.tempo.lock() = value.clamp(0.25, 4.0);
            }
        }
        Ok(())
    }

    fn set_event_callback(&mut self, callback: BackendEventCallback) {
        *self.callback.lock() = Some(callback);
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        let live: Vec<StreamHandle> = self.streams.keys().copied().collect();
        for handle in live {
            self.stop(handle);
        }
    }
}

fn emit(callback: &SharedCallback, event: BackendEvent) {
    if let Some(cb) = callback.lock().as_ref() {
        cb(event);
    }
}

fn decode_loop(
    handle: StreamHandle,
    mut decoder: AudioDecoder,
    output: Arc<AudioOutput>,
    control: Arc<StreamControl>,
    callback: SharedCallback,
) {
    let mut converter = match RateConverter::new(
        decoder.sample_rate(),
        output.sample_rate(),
        decoder.channels(),
        output.channels() as usize,
    ) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(%handle, error = %e, "failed to build rate converter");
            emit(&callback, BackendEvent::Stalled(handle));
            return;
        }
    };
    let source_channels = decoder.channels().max(1);
    let mut end_of_stream = false;

    loop {
        if control.stop.load(Ordering::SeqCst) {
            return;
        }

        let seek = control.seek_to.lock().take();
        if let Some(target) = seek {
            match decoder.seek(target) {
                Ok(actual) => {
                    control
                        .frames_played
                        .store((actual * decoder.sample_rate() as f64) as u64, Ordering::SeqCst);
                    converter.reset();
                    output.clear();
                    end_of_stream = false;
                }
                Err(e) => tracing::warn!(%handle, error = %e, "seek failed"),
            }
        }

        let tempo = *control.tempo.lock();
        if let Err(e) = converter.set_tempo(tempo) {
            tracing::warn!(%handle, tempo, error = %e, "tempo change rejected");
        }

        if !control.playing.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }

        if end_of_stream {
            if output.buffered() == 0 {
                tracing::debug!(%handle, "stream ended");
                emit(&callback, BackendEvent::Ended(handle));
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }

        match decoder.decode_next() {
            Ok(Some(samples)) => {
                let frames = (samples.len() / source_channels) as u64;
                match converter.push(&samples) {
                    Ok(out) => {
                        write_all(&output, &control, &out);
                        control.frames_played.fetch_add(frames, Ordering::SeqCst);
                    }
                    Err(e) => {
                        tracing::error!(%handle, error = %e, "rate conversion failed");
                        emit(&callback, BackendEvent::Stalled(handle));
                        return;
                    }
                }
            }
            Ok(None) => {
                if let Ok(rest) = converter.flush() {
                    write_all(&output, &control, &rest);
                }
                end_of_stream = true;
            }
            Err(e) => {
                tracing::error!(%handle, error = %e, "decode failed");
                emit(&callback, BackendEvent::Stalled(handle));
                return;
            }
        }
    }
}

/// Push samples into the ring buffer, giving up early on stop or seek
fn write_all(output: &AudioOutput, control: &StreamControl, samples: &[f32]) {
    let mut remaining = samples;
    while !remaining.is_empty() {
        if control.stop.load(Ordering::SeqCst) || control.seek_to.lock().is_some() {
            return;
        }
        let written = output.write(remaining);
        if written > 0 {
            remaining = &remaining[written..];
        } else {
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

/// Sample-rate and tempo conversion with channel mapping to the device layout
struct RateConverter {
    resampler: FastFixedIn<f32>,
    base_ratio: f64,
    tempo: f32,
    in_channels: usize,
    out_channels: usize,
    pending: Vec<Vec<f32>>,
}

impl RateConverter {
    fn new(in_rate: u32, out_rate: u32, in_channels: usize, out_channels: usize) -> Result<Self, BackendError> {
        let in_channels = in_channels.max(1);
        let base_ratio = out_rate as f64 / in_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            base_ratio,
            MAX_TEMPO_SPAN,
            PolynomialDegree::Cubic,
            RESAMPLER_CHUNK,
            in_channels,
        )
        .map_err(|e| BackendError::Output(e.to_string()))?;

        Ok(Self {
            resampler,
            base_ratio,
            tempo: 1.0,
            in_channels,
            out_channels: out_channels.max(1),
            pending: vec![Vec::new(); in_channels],
        })
    }

    fn set_tempo(&mut self, tempo: f32) -> Result<(), BackendError> {
        if (tempo - self.tempo).abs() < f32::EPSILON {
            return Ok(());
        }
        self.resampler
            .set_resample_ratio(self.base_ratio / tempo as f64, true)
            .map_err(|e| BackendError::Output(e.to_string()))?;
        self.tempo = tempo;
        Ok(())
    }

    fn reset(&mut self) {
        self.resampler.reset();
        for channel in self.pending.iter_mut() {
            channel.clear();
        }
    }

    fn push(&mut self, interleaved: &[f32]) -> Result<Vec<f32>, BackendError> {
        for (i, sample) in interleaved.iter().enumerate() {
            self.pending[i % self.in_channels].push(*sample);
        }

        let mut out = Vec::new();
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|ch| ch.drain(..needed).collect())
                .collect();
            let converted = self
                .resampler
                .process(&chunk, None)
                .map_err(|e| BackendError::Output(e.to_string()))?;
            self.interleave_into(&converted, &mut out);
        }
        Ok(out)
    }

    fn flush(&mut self) -> Result<Vec<f32>, BackendError> {
        let rest: Vec<Vec<f32>> = self.pending.iter_mut().map(std::mem::take).collect();
        let converted = self
            .resampler
            .process_partial(Some(rest.as_slice()), None)
            .map_err(|e| BackendError::Output(e.to_string()))?;
        let mut out = Vec::new();
        self.interleave_into(&converted, &mut out);
        Ok(out)
    }

    fn interleave_into(&self, planes: &[Vec<f32>], out: &mut Vec<f32>) {
        let frames = planes.first().map(|p| p.len()).unwrap_or(0);
        out.reserve(frames * self.out_channels);
        for frame in 0..frames {
            for ch in 0..self.out_channels {
                let value = if self.in_channels == 1 {
                    planes[0][frame]
                } else if ch < self.in_channels {
                    planes[ch][frame]
                } else {
                    0.0
                };
                out.push(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_converter_upmixes_mono() {
        let mut converter = RateConverter::new(48000, 48000, 1, 2).unwrap();
        let input = vec![0.5f32; RESAMPLER_CHUNK * 2];
        let mut out = converter.push(&input).unwrap();
        out.extend(converter.flush().unwrap());
        assert!(!out.is_empty());
        assert_eq!(out.len() % 2, 0);
    }

    #[test]
    fn test_rate_converter_doubles_rate() {
        let mut converter = RateConverter::new(24000, 48000, 2, 2).unwrap();
        let input = vec![0.0f32; RESAMPLER_CHUNK * 2 * 4];
        let out = converter.push(&input).unwrap();
        // Four full chunks in, roughly twice as many frames out
        let frames_out = out.len() / 2;
        assert!(frames_out >= RESAMPLER_CHUNK * 4 && frames_out <= RESAMPLER_CHUNK * 10);
    }

    #[test]
    fn test_rate_converter_rejects_nothing_within_tempo_span() {
        let mut converter = RateConverter::new(44100, 48000, 2, 2).unwrap();
        assert!(converter.set_tempo(2.0).is_ok());
        assert!(converter.set_tempo(0.5).is_ok());
    }
}
