// Audio output using cpal
// Handles cross-platform audio output with a ring buffer

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfig};
use parking_lot::Mutex;
use ringbuf::{HeapRb, traits::{Consumer, Observer, Producer, Split}};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use crate::error::BackendError;

type RingProducer = ringbuf::HeapProd<f32>;
type RingConsumer = ringbuf::HeapCons<f32>;

/// How the output device is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Device default configuration, mixed with other applications
    Shared,
    /// Device opened at the source's native rate when it supports it
    Exclusive { sample_rate: u32 },
}

/// Handle to a running output stream.
///
/// The cpal stream itself lives on a dedicated thread because it is not
/// `Send` on every platform. Dropping this handle shuts that thread down.
pub struct AudioOutput {
    producer: Arc<Mutex<RingProducer>>,
    sample_rate: u32,
    channels: u16,
    capacity: usize,
    volume: Arc<Mutex<f32>>,
    clear_flag: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    _shutdown: mpsc::Sender<()>,
}

struct OutputInfo {
    sample_rate: u32,
    channels: u16,
    capacity: usize,
    producer: Arc<Mutex<RingProducer>>,
}

struct CallbackShared {
    consumer: Arc<Mutex<RingConsumer>>,
    volume: Arc<Mutex<f32>>,
    clear_flag: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl AudioOutput {
    /// Open the default device, trying exclusive mode first when asked.
    ///
    /// Exclusive initialisation is retried `attempts` times before falling
    /// back to the shared default configuration.
    pub fn open(mode: OutputMode, buffer_ms: u32, attempts: u32) -> Result<Self, BackendError> {
        if let OutputMode::Exclusive { sample_rate } = mode {
            for attempt in 1..=attempts.max(1) {
                match Self::open_with(Some(sample_rate), buffer_ms) {
                    Ok(output) => return Ok(output),
                    Err(e) => {
                        tracing::warn!(attempt, sample_rate, error = %e, "exclusive output init failed");
                        std::thread::sleep(Duration::from_millis(50));
                    }
                }
            }
            tracing::info!("falling back to shared output mode");
        }
        Self::open_with(None, buffer_ms)
    }

    fn open_with(preferred_rate: Option<u32>, buffer_ms: u32) -> Result<Self, BackendError> {
        let (init_tx, init_rx) = mpsc::channel::<Result<OutputInfo, BackendError>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let volume = Arc::new(Mutex::new(1.0f32));
        let clear_flag = Arc::new(AtomicBool::new(false));
        let paused = Arc::new(AtomicBool::new(false));
        let (v, c, p) = (volume.clone(), clear_flag.clone(), paused.clone());

        std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match Self::build(preferred_rate, buffer_ms, v, c, p) {
                    Ok((stream, info)) => {
                        let _ = init_tx.send(Ok(info));
                        stream
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                // Park until the owning AudioOutput is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| BackendError::Output(format!("Failed to spawn output thread: {}", e)))?;

        let OutputInfo { sample_rate, channels, capacity, producer } = init_rx
            .recv()
            .map_err(|_| BackendError::Output("Output thread exited during init".to_string()))??;

        tracing::info!(sample_rate, channels, exclusive = preferred_rate.is_some(), "audio output opened");

        Ok(Self {
            producer,
            sample_rate,
            channels,
            capacity,
            volume,
            clear_flag,
            paused,
            _shutdown: shutdown_tx,
        })
    }

    fn build(
        preferred_rate: Option<u32>,
        buffer_ms: u32,
        volume: Arc<Mutex<f32>>,
        clear_flag: Arc<AtomicBool>,
        paused: Arc<AtomicBool>,
    ) -> Result<(Stream, OutputInfo), BackendError> {
        let host = cpal::default_host();

        let device = host.default_output_device().ok_or(BackendError::NoDevice)?;

        let config = match preferred_rate {
            Some(rate) => Self::native_rate_config(&device, rate)?,
            None => device
                .default_output_config()
                .map_err(|e| BackendError::Output(format!("Failed to get default output config: {}", e)))?,
        };

        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        // Ring buffer sized to the configured latency
        let capacity = ((sample_rate as usize * channels as usize * buffer_ms as usize) / 1000).max(1024);
        let rb = HeapRb::<f32>::new(capacity);
        let (producer, consumer) = rb.split();
        let producer = Arc::new(Mutex::new(producer));
        let consumer = Arc::new(Mutex::new(consumer));

        let shared = CallbackShared {
            consumer,
            volume,
            clear_flag,
            paused,
        };

        let stream_config: StreamConfig = config.config();
        let stream = match config.sample_format() {
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &stream_config, &shared)?,
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &stream_config, &shared)?,
            SampleFormat::U16 => Self::build_stream::<u16>(&device, &stream_config, &shared)?,
            format => return Err(BackendError::Output(format!("Unsupported sample format: {:?}", format))),
        };

        stream
            .play()
            .map_err(|e| BackendError::Output(format!("Failed to start stream: {}", e)))?;

        Ok((stream, OutputInfo { sample_rate, channels, capacity, producer }))
    }

    /// Find a device configuration running at exactly `rate`
    fn native_rate_config(device: &cpal::Device, rate: u32) -> Result<SupportedStreamConfig, BackendError> {
        let ranges = device
            .supported_output_configs()
            .map_err(|e| BackendError::Output(format!("Failed to query output configs: {}", e)))?;

        ranges
            .filter(|r| r.min_sample_rate().0 <= rate && rate <= r.max_sample_rate().0)
            .max_by_key(|r| (r.sample_format() == SampleFormat::F32, r.channels() == 2))
            .map(|r| r.with_sample_rate(SampleRate(rate)))
            .ok_or_else(|| BackendError::Output(format!("Device does not support {} Hz", rate)))
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &StreamConfig,
        shared: &CallbackShared,
    ) -> Result<Stream, BackendError> {
        let consumer = shared.consumer.clone();
        let volume = shared.volume.clone();
        let clear_flag = shared.clear_flag.clone();
        let paused = shared.paused.clone();

        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut consumer = consumer.lock();

                // If clear flag is set, drain the buffer and output silence
                if clear_flag.swap(false, Ordering::SeqCst) {
                    while consumer.try_pop().is_some() {}
                }

                // Paused output keeps its buffered samples for resume
                if paused.load(Ordering::Relaxed) {
                    for sample in data.iter_mut() {
                        *sample = T::from_sample(0.0);
                    }
                    return;
                }

                let vol = *volume.lock();
                for sample in data.iter_mut() {
                    let value = consumer.try_pop().unwrap_or(0.0) * vol;
                    *sample = T::from_sample(value);
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio output error");
            },
            None,
        ).map_err(|e| BackendError::Output(format!("Failed to build output stream: {}", e)))?;

        Ok(stream)
    }

    /// Write samples to the output buffer
    /// Returns the number of samples actually written
    pub fn write(&self, samples: &[f32]) -> usize {
        let mut producer = self.producer.lock();
        producer.push_slice(samples)
    }

    /// Get available space in the buffer
    pub fn available_space(&self) -> usize {
        self.producer.lock().vacant_len()
    }

    /// Samples still waiting to be played
    pub fn buffered(&self) -> usize {
        self.capacity.saturating_sub(self.available_space())
    }

    /// Clear the buffer (useful when seeking)
    pub fn clear(&self) {
        // Set flag so audio callback drains buffer on next call
        self.clear_flag.store(true, Ordering::SeqCst);
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// Get the output sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get the number of output channels
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Set the output volume (0.0 to 1.0)
    pub fn set_volume(&self, vol: f32) {
        *self.volume.lock() = vol.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }
}
