// Playback state machine
// Owns the backend stream and the queue. Every state change happens on the
// task that owns the engine; other threads only ever send it messages.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use super::failure::{FailureDecision, FailureTracker};
use super::session::{PlayState, RepeatMode, Session};
use super::sync::{recompute_lyric, PositionSample};
use crate::audio::{Attribute, AudioBackend, BackendEvent, StreamHandle};
use crate::error::ResolveError;
use crate::metadata::TrackResolver;
use crate::queue::{NextTrack, PlayQueue, QueueSnapshot, SessionSnapshot, SnapshotStore, SnapshotWriter};
use crate::settings::PlaybackSettings;
use crate::smtc::{ButtonsEnabled, MediaInfo, MediaSession, SmtcButton};
use crate::track::{TrackDetail, TrackRef};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sync_interval: Duration,
    pub max_consecutive_failures: u32,
    pub seek_retry_attempts: u32,
    pub seek_retry_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&PlaybackSettings::default())
    }
}

impl From<&PlaybackSettings> for EngineConfig {
    fn from(settings: &PlaybackSettings) -> Self {
        Self {
            sync_interval: Duration::from_millis(settings.position_sync_interval_ms),
            max_consecutive_failures: settings.max_consecutive_failures,
            seek_retry_attempts: settings.seek_retry_attempts,
            seek_retry_delay: Duration::from_millis(settings.seek_retry_delay_ms),
        }
    }
}

/// Collaborators the engine drives. It takes exclusive ownership of the
/// backend and the media session; the store is written from a background task.
pub struct EngineParts {
    pub backend: Box<dyn AudioBackend>,
    pub resolver: Arc<dyn TrackResolver>,
    pub media: Box<dyn MediaSession>,
    pub store: Option<Arc<dyn SnapshotStore>>,
}

/// Messages produced off the engine task and handled on it
#[derive(Debug)]
pub enum Internal {
    Resolved {
        generation: u64,
        result: Result<TrackDetail, ResolveError>,
    },
    Backend(BackendEvent),
    Button(SmtcButton),
}

/// Notifications for observers (UI, logging, the CLI)
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged(PlayState),
    TrackChanged {
        index: Option<usize>,
        title: String,
        artist: String,
        duration_ms: u64,
    },
    Position {
        elapsed_ms: u64,
        duration_ms: u64,
        fraction: f64,
    },
    LyricChanged {
        previous: Option<usize>,
        index: usize,
        text: String,
    },
    QueueChanged {
        len: usize,
        playing: Option<usize>,
        shuffle: bool,
    },
    RepeatChanged(RepeatMode),
    VolumeChanged {
        volume: f32,
        muted: bool,
    },
    SpeedChanged(f32),
    TrackFailed {
        track: TrackRef,
        error: String,
    },
}

/// Point-in-time view of the player
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatus {
    pub state: PlayState,
    pub index: Option<usize>,
    pub track: Option<TrackRef>,
    pub title: Option<String>,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub volume: f32,
    pub muted: bool,
    pub speed: f32,
    pub repeat: RepeatMode,
    pub shuffle: bool,
    pub queue_len: usize,
}

/// A load waiting for its track to resolve
#[derive(Debug, Clone, Copy)]
struct PendingLoad {
    /// Create the stream but leave it paused
    start_paused: bool,
    resume_at_ms: Option<u64>,
}

pub struct Engine {
    backend: Box<dyn AudioBackend>,
    resolver: Arc<dyn TrackResolver>,
    media: Box<dyn MediaSession>,
    store: Option<SnapshotWriter>,
    queue: PlayQueue,
    session: Session,
    stream: Option<StreamHandle>,
    /// Bumped on every load and stop; resolutions from older generations are dropped
    generation: u64,
    pending: Option<PendingLoad>,
    /// Entry uid and position restored from the last session
    resume: Option<(u64, u64)>,
    failures: FailureTracker,
    config: EngineConfig,
    internal_tx: mpsc::UnboundedSender<Internal>,
    events: broadcast::Sender<PlayerEvent>,
}

impl Engine {
    /// Build an engine inside a tokio runtime. The returned receiver carries
    /// resolutions, backend callbacks and media buttons; feed each message to
    /// `handle_internal`.
    pub fn new(
        mut parts: EngineParts,
        settings: &PlaybackSettings,
    ) -> (Self, mpsc::UnboundedReceiver<Internal>) {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let tx = internal_tx.clone();
        parts.backend.set_event_callback(Box::new(move |event| {
            let _ = tx.send(Internal::Backend(event));
        }));

        let tx = internal_tx.clone();
        if let Err(e) = parts.media.set_button_callback(Box::new(move |button| {
            let _ = tx.send(Internal::Button(button));
        })) {
            tracing::warn!(error = %e, "media buttons unavailable");
        }

        let mut queue = PlayQueue::new();
        queue.set_shuffle(settings.shuffle);

        let session = Session {
            repeat: settings.repeat,
            volume: settings.volume.clamp(0.0, 1.0),
            muted: settings.muted,
            speed: settings.speed.clamp(0.25, 4.0),
            ..Default::default()
        };

        let config = EngineConfig::from(settings);
        let engine = Self {
            backend: parts.backend,
            resolver: parts.resolver,
            media: parts.media,
            store: parts.store.map(SnapshotWriter::spawn),
            queue,
            session,
            stream: None,
            generation: 0,
            pending: None,
            resume: None,
            failures: FailureTracker::new(config.max_consecutive_failures),
            config,
            internal_tx,
            events,
        };
        engine.update_buttons();
        (engine, internal_rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<PlayerEvent> {
        self.events.clone()
    }

    pub fn state(&self) -> PlayState {
        self.session.state
    }

    pub fn is_playing(&self) -> bool {
        self.session.state == PlayState::Playing
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn queue(&self) -> &PlayQueue {
        &self.queue
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.consecutive()
    }

    pub fn status(&self) -> PlayerStatus {
        PlayerStatus {
            state: self.session.state,
            index: self.queue.playing(),
            track: self.session.entry.as_ref().map(|e| e.track.clone()),
            title: self
                .session
                .detail
                .as_ref()
                .map(|d| d.title.clone())
                .or_else(|| self.session.entry.as_ref().map(|e| e.track.display_title())),
            position_ms: self.session.position_ms,
            duration_ms: self.session.duration_ms,
            volume: self.session.volume,
            muted: self.session.muted,
            speed: self.session.speed,
            repeat: self.session.repeat,
            shuffle: self.queue.is_shuffled(),
            queue_len: self.queue.len(),
        }
    }

    fn emit(&self, event: PlayerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: PlayState) {
        if self.session.state == state {
            return;
        }
        tracing::debug!(from = ?self.session.state, to = ?state, "state change");
        self.session.state = state;
        self.emit(PlayerEvent::StateChanged(state));
        if let Err(e) = self.media.update_playback_status(state) {
            tracing::debug!(error = %e, "media session status update failed");
        }
        self.update_buttons();
    }

    fn update_buttons(&self) {
        let has_tracks = !self.queue.is_empty();
        let state = self.session.state;
        let buttons = ButtonsEnabled {
            previous: has_tracks,
            next: has_tracks,
            play: has_tracks && state != PlayState::Playing,
            pause: matches!(state, PlayState::Playing | PlayState::Loading),
        };
        if let Err(e) = self.media.set_buttons_enabled(buttons) {
            tracing::debug!(error = %e, "media session button update failed");
        }
    }

    // ---- transport ----

    pub fn play_by_index(&mut self, index: usize) {
        self.load(index, false);
    }

    /// Play a track, queueing it after the current entry when it isn't queued yet
    pub fn play_by_track(&mut self, track: TrackRef) {
        let index = match self.queue.position_of(&track) {
            Some(index) => index,
            None => {
                let at = self.queue.playing().map_or(self.queue.len(), |p| p + 1);
                self.queue.insert_at(at, vec![track]);
                self.queue_changed();
                at
            }
        };
        self.load(index, false);
    }

    fn load(&mut self, index: usize, start_paused: bool) {
        let Some(entry) = self.queue.get(index).cloned() else {
            tracing::warn!(index, len = self.queue.len(), "play request outside the queue");
            return;
        };

        // The old stream is fully released before the next one can exist
        self.release_stream();
        self.queue.set_playing(index);
        self.generation += 1;
        let generation = self.generation;

        let resume_at_ms = match self.resume.take() {
            Some((uid, ms)) if uid == entry.uid => Some(ms),
            _ => None,
        };
        self.pending = Some(PendingLoad { start_paused, resume_at_ms });

        tracing::debug!(index, generation, track = %entry.track, "loading");
        self.session.entry = Some(entry.clone());
        self.session.detail = None;
        self.session.position_ms = 0;
        self.session.duration_ms = 0;
        self.session.lyric_index = None;
        self.set_state(PlayState::Loading);
        self.persist();

        let tx = self.internal_tx.clone();
        let track = entry.track;
        if !track.is_playable() {
            let result = Err(ResolveError::Unavailable(track.to_string()));
            let _ = tx.send(Internal::Resolved { generation, result });
            return;
        }

        let resolver = Arc::clone(&self.resolver);
        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || resolver.resolve(&track)).await {
                Ok(result) => result,
                Err(e) => Err(ResolveError::Task(e.to_string())),
            };
            let _ = tx.send(Internal::Resolved { generation, result });
        });
    }

    pub fn play(&mut self) {
        match self.session.state {
            PlayState::Playing => {}
            PlayState::Loading => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.start_paused = false;
                }
            }
            PlayState::Paused => {
                let Some(handle) = self.stream else {
                    return;
                };
                match self.backend.play(handle) {
                    Ok(()) => {
                        self.failures.record_success();
                        self.set_state(PlayState::Playing);
                    }
                    Err(e) => {
                        tracing::error!(stream = %handle, error = %e, "failed to resume stream");
                        self.on_failure(e.to_string());
                    }
                }
            }
            PlayState::Stopped => {
                if self.queue.is_empty() {
                    return;
                }
                let index = self.queue.playing().unwrap_or(0);
                self.load(index, false);
            }
        }
    }

    pub fn pause(&mut self) {
        match self.session.state {
            PlayState::Playing => {
                if let Some(handle) = self.stream {
                    if let Err(e) = self.backend.pause(handle) {
                        tracing::error!(stream = %handle, error = %e, "failed to pause stream");
                    }
                }
                self.set_state(PlayState::Paused);
                self.persist();
            }
            PlayState::Loading => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.start_paused = true;
                }
            }
            PlayState::Paused | PlayState::Stopped => {}
        }
    }

    pub fn toggle_play_pause(&mut self) {
        let wants_pause = match self.session.state {
            PlayState::Playing => true,
            PlayState::Loading => self.pending.is_some_and(|p| !p.start_paused),
            PlayState::Paused | PlayState::Stopped => false,
        };
        if wants_pause {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Release the stream and zero the timeline. The queue keeps its position.
    pub fn stop(&mut self) {
        self.release_stream();
        self.generation += 1;
        self.pending = None;
        self.session.detail = None;
        self.session.position_ms = 0;
        self.session.duration_ms = 0;
        self.session.lyric_index = None;
        self.set_state(PlayState::Stopped);
        self.publish_position();
        self.persist();
    }

    pub fn play_next(&mut self) {
        self.advance();
    }

    pub fn play_previous(&mut self) {
        if let Some(index) = self.queue.previous_index(self.session.repeat) {
            self.load(index, false);
        }
    }

    fn advance(&mut self) {
        match self.queue.next_index(self.session.repeat) {
            Some(NextTrack::Play(index)) => self.load(index, false),
            Some(NextTrack::Finished(index)) => {
                tracing::debug!("end of queue, parking on the first track");
                self.load(index, true);
            }
            None => self.stop(),
        }
    }

    fn release_stream(&mut self) {
        if let Some(handle) = self.stream.take() {
            tracing::trace!(stream = %handle, "releasing stream");
            self.backend.stop(handle);
        }
    }

    // ---- messages from other threads ----

    pub async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Resolved { generation, result } => self.on_resolved(generation, result).await,
            Internal::Backend(BackendEvent::Ended(handle)) if self.stream == Some(handle) => {
                self.on_stream_ended();
            }
            Internal::Backend(BackendEvent::Stalled(handle)) if self.stream == Some(handle) => {
                tracing::warn!(stream = %handle, "stream stalled");
                self.on_failure("stream stalled".to_string());
            }
            Internal::Backend(event) => {
                tracing::debug!(?event, "ignoring event from a released stream");
            }
            Internal::Button(button) => self.on_button(button),
        }
    }

    async fn on_resolved(&mut self, generation: u64, result: Result<TrackDetail, ResolveError>) {
        if generation != self.generation {
            tracing::debug!(generation, current = self.generation, "discarding stale resolution");
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };

        match result {
            Ok(detail) => self.start(detail, pending).await,
            Err(e) => {
                tracing::warn!(generation, error = %e, "track could not be resolved");
                self.on_load_failure(e.to_string(), pending);
            }
        }
    }

    async fn start(&mut self, detail: TrackDetail, pending: PendingLoad) {
        let handle = match self.backend.create_stream(&detail.source) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "failed to create stream");
                self.on_load_failure(e.to_string(), pending);
                return;
            }
        };
        self.stream = Some(handle);
        let volume = self.session.effective_volume();
        self.set_stream_attribute(Attribute::Volume, volume);
        self.set_stream_attribute(Attribute::Tempo, self.session.speed);

        self.session.duration_ms = self
            .backend
            .duration(handle)
            .map(|secs| (secs * 1000.0).round() as u64)
            .or(detail.duration_ms)
            .unwrap_or(0);
        self.publish_track(&detail);
        self.session.detail = Some(detail);

        if let Some(ms) = pending.resume_at_ms {
            self.seek(ms).await;
        }
        self.refresh_lyric();

        if pending.start_paused {
            self.set_state(PlayState::Paused);
            return;
        }

        match self.backend.play(handle) {
            Ok(()) => {
                self.failures.record_success();
                tracing::info!(index = ?self.queue.playing(), stream = %handle, "playing");
                self.set_state(PlayState::Playing);
            }
            Err(e) => {
                tracing::error!(stream = %handle, error = %e, "failed to start stream");
                self.on_failure(e.to_string());
            }
        }
    }

    fn on_load_failure(&mut self, error: String, pending: PendingLoad) {
        if pending.start_paused {
            // Nobody asked for audio yet; don't go hunting for a playable track
            self.report_failure(error);
            self.failures.reset();
            self.stop();
        } else {
            self.on_failure(error);
        }
    }

    fn report_failure(&self, error: String) {
        if let Some(entry) = self.session.entry.as_ref() {
            self.emit(PlayerEvent::TrackFailed {
                track: entry.track.clone(),
                error,
            });
        }
    }

    /// Failure path shared by resolution, stream creation and stalls
    fn on_failure(&mut self, error: String) {
        self.release_stream();
        let online = self.session.entry.as_ref().is_some_and(|e| e.track.is_online());
        let repeat_one = self.session.repeat == RepeatMode::One;
        self.report_failure(error);

        match self.failures.record_failure(repeat_one, online) {
            FailureDecision::Stop => {
                tracing::warn!(repeat_one, online, "stopping after failure");
                self.stop();
            }
            FailureDecision::Advance => {
                tracing::debug!(consecutive = self.failures.consecutive(), "skipping failed track");
                self.advance();
            }
        }
    }

    fn on_stream_ended(&mut self) {
        tracing::debug!(index = ?self.queue.playing(), "stream ended");
        if self.session.repeat == RepeatMode::One {
            if let Some(index) = self.queue.playing() {
                self.load(index, false);
                return;
            }
        }
        self.advance();
    }

    fn on_button(&mut self, button: SmtcButton) {
        tracing::debug!(?button, "media button");
        match button {
            SmtcButton::Play => self.play(),
            SmtcButton::Pause => self.pause(),
            SmtcButton::Stop => self.stop(),
            SmtcButton::Next => self.play_next(),
            SmtcButton::Previous => self.play_previous(),
        }
    }

    // ---- position and lyrics ----

    /// Periodic sample of the backend clock. Does nothing unless playing.
    pub fn tick(&mut self) {
        if self.session.state != PlayState::Playing {
            return;
        }
        let Some(handle) = self.stream else {
            return;
        };
        match self.backend.position(handle) {
            Ok(secs) => {
                let sample = PositionSample::new(secs, self.session.duration_ms);
                self.session.position_ms = sample.elapsed_ms;
                self.publish_position();
                self.refresh_lyric();
            }
            Err(e) => tracing::debug!(stream = %handle, error = %e, "position read failed"),
        }
    }

    /// Jump within the current track. Busy backends get a few retries, after
    /// which the seek is dropped.
    pub async fn seek(&mut self, position_ms: u64) {
        let Some(handle) = self.stream else {
            if let Some(pending) = self.pending.as_mut() {
                pending.resume_at_ms = Some(position_ms);
            }
            return;
        };

        // The stream's own length wins over tag durations
        let duration_ms = self
            .backend
            .duration(handle)
            .map(|secs| (secs * 1000.0).floor() as u64)
            .unwrap_or(self.session.duration_ms);
        let target = match duration_ms {
            0 => position_ms,
            duration => position_ms.min(duration),
        };
        let seconds = target as f64 / 1000.0;
        let attempts = self.config.seek_retry_attempts.max(1);
        let delay = self.config.seek_retry_delay;

        let mut landed = false;
        for attempt in 1..=attempts {
            match self.backend.set_position(handle, seconds) {
                Ok(()) => {
                    landed = true;
                    break;
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "seek rejected");
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        if !landed {
            tracing::debug!(position_ms = target, attempts, "giving up on seek");
            return;
        }

        self.session.position_ms = target;
        self.publish_position();
        self.refresh_lyric();
    }

    fn publish_position(&self) {
        let sample = PositionSample {
            elapsed_ms: self.session.position_ms,
            duration_ms: self.session.duration_ms,
        };
        self.emit(PlayerEvent::Position {
            elapsed_ms: sample.elapsed_ms,
            duration_ms: sample.duration_ms,
            fraction: sample.fraction(),
        });
        if let Err(e) = self.media.update_timeline(sample.elapsed_ms, sample.duration_ms) {
            tracing::trace!(error = %e, "media timeline update failed");
        }
    }

    fn refresh_lyric(&mut self) {
        let lyrics = self.session.detail.as_ref().and_then(|d| d.lyrics.as_ref());
        let Some(change) = recompute_lyric(lyrics, self.session.lyric_index, self.session.position_ms) else {
            return;
        };
        self.session.lyric_index = Some(change.index);
        self.emit(PlayerEvent::LyricChanged {
            previous: change.previous,
            index: change.index,
            text: change.text,
        });
    }

    fn publish_track(&self, detail: &TrackDetail) {
        let info = MediaInfo {
            title: detail.title.clone(),
            artist: detail.artist_line(),
            album: detail.album.clone(),
            duration_ms: Some(self.session.duration_ms).filter(|d| *d > 0),
            cover: detail.cover.clone(),
        };
        if let Err(e) = self.media.update_media_info(&info) {
            tracing::debug!(error = %e, "media info update failed");
        }
        self.emit(PlayerEvent::TrackChanged {
            index: self.queue.playing(),
            title: info.title,
            artist: info.artist,
            duration_ms: self.session.duration_ms,
        });
    }

    // ---- attributes and modes ----

    fn set_stream_attribute(&mut self, attribute: Attribute, value: f32) {
        let Some(handle) = self.stream else {
            return;
        };
        if let Err(e) = self.backend.set_attribute(handle, attribute, value) {
            tracing::warn!(stream = %handle, ?attribute, error = %e, "failed to set stream attribute");
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.session.volume = volume.clamp(0.0, 1.0);
        let effective = self.session.effective_volume();
        self.set_stream_attribute(Attribute::Volume, effective);
        self.volume_changed();
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.session.muted = muted;
        let effective = self.session.effective_volume();
        self.set_stream_attribute(Attribute::Volume, effective);
        self.volume_changed();
    }

    fn volume_changed(&mut self) {
        self.emit(PlayerEvent::VolumeChanged {
            volume: self.session.volume,
            muted: self.session.muted,
        });
        self.persist();
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.session.speed = speed.clamp(0.25, 4.0);
        self.set_stream_attribute(Attribute::Tempo, self.session.speed);
        self.emit(PlayerEvent::SpeedChanged(self.session.speed));
        self.persist();
    }

    pub fn set_repeat(&mut self, repeat: RepeatMode) {
        self.session.repeat = repeat;
        self.emit(PlayerEvent::RepeatChanged(repeat));
        self.persist();
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        let shuffled = self.queue.toggle_shuffle();
        self.sync_entry();
        self.queue_changed();
        shuffled
    }

    // ---- queue ----

    /// Replace the queue. Playback stops unless the content is unchanged.
    pub fn set_queue(&mut self, name: impl Into<String>, tracks: Vec<TrackRef>) -> bool {
        if !self.queue.set_queue(name, tracks) {
            return false;
        }
        self.stop();
        self.session.zero();
        self.queue_changed();
        true
    }

    pub fn set_queue_and_play(&mut self, name: impl Into<String>, tracks: Vec<TrackRef>, index: usize) {
        self.set_queue(name, tracks);
        if !self.queue.is_empty() {
            self.load(index.min(self.queue.len() - 1), false);
        }
    }

    pub fn insert_at(&mut self, index: usize, tracks: Vec<TrackRef>) -> usize {
        let inserted = self.queue.insert_at(index, tracks);
        if inserted > 0 {
            self.sync_entry();
            self.queue_changed();
        }
        inserted
    }

    pub fn append(&mut self, tracks: Vec<TrackRef>) -> usize {
        self.insert_at(self.queue.len(), tracks)
    }

    pub fn remove_at(&mut self, index: usize) -> bool {
        let Some(outcome) = self.queue.remove_at(index) else {
            return false;
        };
        tracing::debug!(index, was_playing = outcome.was_playing, playing = ?outcome.playing, "removed entry");

        if self.queue.is_empty() {
            self.stop();
            self.session.zero();
        } else if outcome.was_playing {
            match (self.session.state, outcome.playing) {
                (PlayState::Playing | PlayState::Loading, Some(next)) => self.load(next, false),
                (PlayState::Paused, Some(next)) => self.load(next, true),
                _ => self.session.entry = self.queue.current().cloned(),
            }
        } else {
            self.sync_entry();
        }
        self.queue_changed();
        true
    }

    pub fn move_up(&mut self, index: usize) -> bool {
        let moved = self.queue.move_up(index);
        if moved {
            self.sync_entry();
            self.queue_changed();
        }
        moved
    }

    pub fn move_down(&mut self, index: usize) -> bool {
        let moved = self.queue.move_down(index);
        if moved {
            self.sync_entry();
            self.queue_changed();
        }
        moved
    }

    fn sync_entry(&mut self) {
        if let Some(current) = self.queue.current() {
            self.session.entry = Some(current.clone());
        }
    }

    fn queue_changed(&mut self) {
        self.emit(PlayerEvent::QueueChanged {
            len: self.queue.len(),
            playing: self.queue.playing(),
            shuffle: self.queue.is_shuffled(),
        });
        self.update_buttons();
        self.persist();
    }

    // ---- persistence ----

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot::capture(
            &self.queue,
            SessionSnapshot {
                repeat: self.session.repeat,
                volume: self.session.volume,
                speed: self.session.speed,
                muted: self.session.muted,
                position_ms: self.session.position_ms,
            },
        )
    }

    fn persist(&mut self) {
        if self.store.is_none() {
            return;
        }
        let snapshot = self.snapshot();
        if let Some(writer) = self.store.as_mut() {
            writer.submit(snapshot);
        }
    }

    /// Load a saved session. Nothing plays until asked; the first play of
    /// the saved entry resumes at the saved position.
    pub fn restore(&mut self, snapshot: &QueueSnapshot) {
        self.release_stream();
        self.generation += 1;
        self.pending = None;
        self.queue = snapshot.to_queue();

        let saved = &snapshot.session;
        self.session.zero();
        self.session.repeat = saved.repeat;
        self.session.volume = saved.volume.clamp(0.0, 1.0);
        self.session.speed = saved.speed.clamp(0.25, 4.0);
        self.session.muted = saved.muted;
        self.session.entry = self.queue.current().cloned();
        self.resume = self
            .session
            .entry
            .as_ref()
            .filter(|_| saved.position_ms > 0)
            .map(|e| (e.uid, saved.position_ms));

        tracing::info!(
            len = self.queue.len(),
            playing = ?self.queue.playing(),
            saved_at = %snapshot.saved_at,
            "restored last session"
        );
        self.emit(PlayerEvent::RepeatChanged(self.session.repeat));
        self.emit(PlayerEvent::VolumeChanged {
            volume: self.session.volume,
            muted: self.session.muted,
        });
        self.queue_changed();
    }

    /// Save where we are, release the stream and wait for pending writes
    pub async fn shutdown(&mut self) {
        self.persist();
        self.release_stream();
        self.generation += 1;
        self.pending = None;
        self.set_state(PlayState::Stopped);
        if let Some(writer) = self.store.as_mut() {
            writer.finish().await;
        }
        tracing::info!("player shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::{Call, MockBackend};
    use crate::lyrics::Lyrics;
    use crate::track::{OnlineTrack, StreamSource};
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct ScriptedResolver {
        calls: Arc<AtomicUsize>,
    }

    impl TrackResolver for ScriptedResolver {
        fn resolve(&self, track: &TrackRef) -> Result<TrackDetail, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match track {
                TrackRef::Local { path } if path.to_string_lossy().contains("broken") => {
                    Err(ResolveError::NotFound(path.clone()))
                }
                TrackRef::Local { path } => Ok(detail_for(path)),
                TrackRef::Online(t) => Err(ResolveError::Unavailable(t.id.clone())),
                TrackRef::Unknown { url } => Err(ResolveError::Unavailable(url.clone())),
            }
        }
    }

    fn detail_for(path: &Path) -> TrackDetail {
        TrackDetail {
            title: crate::track::file_stem_title(path),
            artists: vec!["Artist".to_string()],
            album: None,
            duration_ms: Some(180_000),
            source: StreamSource::File(path.to_path_buf()),
            cover: Some(vec![0xff, 0xd8, 0xff]),
            lyrics: Some(Lyrics::parse_lrc("[00:00.00]zero\n[00:01.00]one\n[00:02.00]two\n")),
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSession {
        statuses: Arc<Mutex<Vec<PlayState>>>,
        infos: Arc<Mutex<Vec<MediaInfo>>>,
    }

    impl MediaSession for RecordingSession {
        fn update_media_info(&self, info: &MediaInfo) -> Result<(), String> {
            self.infos.lock().push(info.clone());
            Ok(())
        }
        fn update_playback_status(&self, state: PlayState) -> Result<(), String> {
            self.statuses.lock().push(state);
            Ok(())
        }
        fn update_timeline(&self, _position_ms: u64, _duration_ms: u64) -> Result<(), String> {
            Ok(())
        }
        fn set_buttons_enabled(&self, _buttons: ButtonsEnabled) -> Result<(), String> {
            Ok(())
        }
        fn set_button_callback(&self, _callback: crate::smtc::ButtonCallback) -> Result<(), String> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct MemoryStore(Arc<Mutex<Option<QueueSnapshot>>>);

    impl SnapshotStore for MemoryStore {
        fn save(&self, snapshot: &QueueSnapshot) -> anyhow::Result<()> {
            *self.0.lock() = Some(snapshot.clone());
            Ok(())
        }
        fn load(&self) -> anyhow::Result<Option<QueueSnapshot>> {
            Ok(self.0.lock().clone())
        }
    }

    struct Harness {
        engine: Engine,
        internal: mpsc::UnboundedReceiver<Internal>,
        backend: MockBackend,
        media: RecordingSession,
        store: MemoryStore,
        resolver: ScriptedResolver,
    }

    impl Harness {
        fn new(tracks: Vec<TrackRef>) -> Self {
            let backend = MockBackend::new();
            let media = RecordingSession::default();
            let store = MemoryStore::default();
            let resolver = ScriptedResolver::default();
            let parts = EngineParts {
                backend: Box::new(backend.clone()),
                resolver: Arc::new(resolver.clone()),
                media: Box::new(media.clone()),
                store: Some(Arc::new(store.clone())),
            };
            let (mut engine, internal) = Engine::new(parts, &PlaybackSettings::default());
            engine.set_queue("test", tracks);
            Self { engine, internal, backend, media, store, resolver }
        }

        fn local(names: &[&str]) -> Self {
            Self::new(names.iter().map(|n| TrackRef::local(format!("/music/{}.mp3", n))).collect())
        }

        async fn pump(&mut self) {
            let message = tokio::time::timeout(Duration::from_secs(5), self.internal.recv())
                .await
                .expect("timed out waiting for the engine")
                .expect("internal channel closed");
            self.engine.handle_internal(message).await;
        }

        /// Process messages until the engine leaves Loading
        async fn settle(&mut self) {
            while self.engine.state() == PlayState::Loading {
                self.pump().await;
            }
        }

        fn title(&self) -> String {
            self.engine.status().title.unwrap_or_default()
        }

        fn stream(&self) -> StreamHandle {
            self.engine.stream.expect("no live stream")
        }

        fn resolves(&self) -> usize {
            self.resolver.calls.load(Ordering::SeqCst)
        }

        fn creates(&self) -> usize {
            self.backend.calls().iter().filter(|c| matches!(c, Call::Create(_))).count()
        }
    }

    #[tokio::test]
    async fn test_next_wraps_under_repeat_all() {
        let mut h = Harness::local(&["a", "b", "c"]);
        h.engine.set_repeat(RepeatMode::All);
        h.engine.play_by_index(0);
        h.settle().await;
        assert_eq!(h.title(), "a");

        h.engine.play_next();
        h.settle().await;
        h.engine.play_next();
        h.settle().await;
        assert_eq!(h.title(), "c");

        h.engine.play_next();
        h.settle().await;
        assert_eq!(h.title(), "a");
        assert_eq!(h.engine.queue().playing(), Some(0));
        assert_eq!(h.engine.state(), PlayState::Playing);
        assert_eq!(h.backend.live_streams(), 1);
    }

    #[tokio::test]
    async fn test_next_at_end_without_repeat_parks_paused() {
        let mut h = Harness::local(&["a", "b"]);
        h.engine.play_by_index(1);
        h.settle().await;

        h.engine.play_next();
        h.settle().await;
        assert_eq!(h.engine.state(), PlayState::Paused);
        assert_eq!(h.engine.queue().playing(), Some(0));
        assert!(!h.backend.calls().contains(&Call::Play(h.stream())));
    }

    #[tokio::test]
    async fn test_previous_at_start_restarts_first() {
        let mut h = Harness::local(&["a", "b"]);
        h.engine.play_by_index(0);
        h.settle().await;
        h.engine.play_previous();
        h.settle().await;
        assert_eq!(h.engine.queue().playing(), Some(0));
        assert_eq!(h.creates(), 2);
    }

    #[tokio::test]
    async fn test_three_failures_stop_and_reset() {
        let mut h = Harness::local(&["broken1", "broken2", "broken3", "d"]);
        let mut events = h.engine.subscribe();
        h.engine.play_by_index(0);
        h.settle().await;

        assert_eq!(h.engine.state(), PlayState::Stopped);
        assert_eq!(h.engine.consecutive_failures(), 0);
        assert_eq!(h.engine.queue().playing(), Some(2));
        assert_eq!(h.creates(), 0);

        let mut failed = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, PlayerEvent::TrackFailed { .. }) {
                failed += 1;
            }
        }
        assert_eq!(failed, 3);
    }

    #[tokio::test]
    async fn test_failure_then_success_resets_counter() {
        let mut h = Harness::local(&["broken", "b"]);
        h.engine.play_by_index(0);
        h.settle().await;
        assert_eq!(h.engine.state(), PlayState::Playing);
        assert_eq!(h.title(), "b");
        assert_eq!(h.engine.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_online_failure_stops_immediately() {
        let online = TrackRef::Online(OnlineTrack {
            id: "42".into(),
            title: "Remote".into(),
            artists: vec![],
            album: None,
            duration_ms: None,
            playable: true,
            cached_path: None,
        });
        let mut h = Harness::new(vec![online, TrackRef::local("/music/b.mp3")]);
        h.engine.play_by_index(0);
        h.settle().await;
        assert_eq!(h.engine.state(), PlayState::Stopped);
        assert_eq!(h.engine.queue().playing(), Some(0));
    }

    #[tokio::test]
    async fn test_repeat_one_failure_stops() {
        let mut h = Harness::local(&["broken", "b"]);
        h.engine.set_repeat(RepeatMode::One);
        h.engine.play_by_index(0);
        h.settle().await;
        assert_eq!(h.engine.state(), PlayState::Stopped);
    }

    #[tokio::test]
    async fn test_backend_create_failure_advances() {
        let mut h = Harness::local(&["a", "b"]);
        h.backend.fail_next_create("device busy");
        h.engine.play_by_index(0);
        h.settle().await;
        assert_eq!(h.title(), "b");
        assert_eq!(h.engine.state(), PlayState::Playing);
    }

    #[tokio::test]
    async fn test_stale_resolution_is_discarded() {
        let mut h = Harness::local(&["a", "b"]);
        h.engine.play_by_index(0);
        h.engine.play_by_index(1);
        // Both resolutions arrive; only the newer one may start a stream
        h.pump().await;
        h.pump().await;

        assert_eq!(h.engine.state(), PlayState::Playing);
        assert_eq!(h.title(), "b");
        assert_eq!(h.creates(), 1);
    }

    #[tokio::test]
    async fn test_natural_end_under_repeat_one_replays() {
        let mut h = Harness::local(&["a", "b"]);
        h.engine.set_repeat(RepeatMode::One);
        h.engine.play_by_index(0);
        h.settle().await;

        h.backend.emit(BackendEvent::Ended(h.stream()));
        h.pump().await;
        h.settle().await;
        assert_eq!(h.engine.queue().playing(), Some(0));
        assert_eq!(h.creates(), 2);
    }

    #[tokio::test]
    async fn test_natural_end_advances() {
        let mut h = Harness::local(&["a", "b"]);
        h.engine.play_by_index(0);
        h.settle().await;

        h.backend.emit(BackendEvent::Ended(h.stream()));
        h.pump().await;
        h.settle().await;
        assert_eq!(h.title(), "b");
    }

    #[tokio::test]
    async fn test_events_from_released_streams_are_ignored() {
        let mut h = Harness::local(&["a", "b"]);
        h.engine.play_by_index(0);
        h.settle().await;

        h.backend.emit(BackendEvent::Ended(StreamHandle(999)));
        h.pump().await;
        assert_eq!(h.engine.state(), PlayState::Playing);
        assert_eq!(h.title(), "a");
    }

    #[tokio::test]
    async fn test_stall_takes_failure_path() {
        let mut h = Harness::local(&["a", "b"]);
        h.engine.play_by_index(0);
        h.settle().await;

        h.backend.emit(BackendEvent::Stalled(h.stream()));
        h.pump().await;
        h.settle().await;
        assert_eq!(h.title(), "b");
        assert_eq!(h.backend.live_streams(), 1);
    }

    #[tokio::test]
    async fn test_seek_retries_and_updates_lyric() {
        let mut h = Harness::local(&["a"]);
        h.engine.play_by_index(0);
        h.settle().await;
        h.backend.state.lock().failing_seeks = 3;

        h.engine.seek(1500).await;
        assert_eq!(h.engine.session().position_ms, 1500);
        assert_eq!(h.engine.session().lyric_index, Some(1));
        let seeks = h.backend.calls().iter().filter(|c| matches!(c, Call::SetPosition(..))).count();
        assert_eq!(seeks, 4);
    }

    #[tokio::test]
    async fn test_seek_gives_up_silently() {
        let mut h = Harness::local(&["a"]);
        h.engine.play_by_index(0);
        h.settle().await;
        h.backend.state.lock().failing_seeks = 100;

        h.engine.seek(2000).await;
        assert_eq!(h.engine.session().position_ms, 0);
        let seeks = h.backend.calls().iter().filter(|c| matches!(c, Call::SetPosition(..))).count();
        assert_eq!(seeks, 10);
        assert_eq!(h.engine.state(), PlayState::Playing);
    }

    #[tokio::test]
    async fn test_tick_only_samples_while_playing() {
        let mut h = Harness::local(&["a"]);
        h.engine.play_by_index(0);
        h.settle().await;

        h.backend.set_position(2.5);
        h.engine.tick();
        assert_eq!(h.engine.session().position_ms, 2500);
        assert_eq!(h.engine.session().lyric_index, Some(2));

        h.engine.pause();
        h.backend.set_position(3.0);
        h.engine.tick();
        assert_eq!(h.engine.session().position_ms, 2500);
    }

    #[tokio::test]
    async fn test_pause_keeps_stream_and_stop_releases() {
        let mut h = Harness::local(&["a"]);
        h.engine.play_by_index(0);
        h.settle().await;
        h.backend.set_position(10.0);
        h.engine.tick();

        h.engine.pause();
        assert_eq!(h.engine.state(), PlayState::Paused);
        assert_eq!(h.backend.live_streams(), 1);

        h.engine.stop();
        assert_eq!(h.backend.live_streams(), 0);
        assert_eq!(h.engine.session().position_ms, 0);
        assert_eq!(h.engine.session().lyric_index, None);

        let statuses = h.media.statuses.lock().clone();
        assert_eq!(statuses.last(), Some(&PlayState::Stopped));
        assert!(statuses.contains(&PlayState::Paused));
    }

    #[tokio::test]
    async fn test_removing_playing_entry_plays_replacement() {
        let mut h = Harness::local(&["a", "b", "c"]);
        h.engine.play_by_index(1);
        h.settle().await;

        assert!(h.engine.remove_at(1));
        h.settle().await;
        assert_eq!(h.engine.queue().playing(), Some(1));
        assert_eq!(h.title(), "c");
    }

    #[tokio::test]
    async fn test_emptying_queue_zeroes_session() {
        let mut h = Harness::local(&["a"]);
        h.engine.play_by_index(0);
        h.settle().await;

        assert!(h.engine.remove_at(0));
        assert_eq!(h.engine.state(), PlayState::Stopped);
        assert!(h.engine.session().entry.is_none());
        assert_eq!(h.backend.live_streams(), 0);
    }

    #[tokio::test]
    async fn test_volume_and_mute_reach_backend() {
        let mut h = Harness::local(&["a"]);
        h.engine.play_by_index(0);
        h.settle().await;
        let stream = h.stream();

        h.engine.set_volume(0.5);
        h.engine.set_muted(true);
        h.engine.set_speed(9.0);

        let calls = h.backend.calls();
        assert!(calls.contains(&Call::SetAttribute(stream, Attribute::Volume, 0.5)));
        assert!(calls.contains(&Call::SetAttribute(stream, Attribute::Volume, 0.0)));
        assert!(calls.contains(&Call::SetAttribute(stream, Attribute::Tempo, 4.0)));
    }

    #[tokio::test]
    async fn test_restored_session_resumes_position() {
        let mut h = Harness::local(&["a", "b", "c"]);
        h.engine.set_repeat(RepeatMode::All);
        h.engine.set_volume(0.3);
        h.engine.play_by_index(2);
        h.settle().await;
        h.backend.set_position(42.0);
        h.engine.tick();
        h.engine.shutdown().await;

        let snapshot = h.store.load().unwrap().expect("snapshot saved");
        assert_eq!(snapshot.playing, Some(2));
        assert_eq!(snapshot.session.position_ms, 42_000);

        let mut fresh = Harness::local(&[]);
        fresh.engine.restore(&snapshot);
        assert_eq!(fresh.engine.status().repeat, RepeatMode::All);
        assert_eq!(fresh.engine.status().volume, 0.3);

        fresh.engine.play();
        fresh.settle().await;
        assert_eq!(fresh.title(), "c");
        assert_eq!(fresh.engine.session().position_ms, 42_000);
        assert!(fresh
            .backend
            .calls()
            .contains(&Call::SetPosition(fresh.stream(), 42.0)));
    }

    #[tokio::test]
    async fn test_media_button_drives_transport() {
        let mut h = Harness::local(&["a", "b"]);
        h.engine.play_by_index(0);
        h.settle().await;

        h.engine.handle_internal(Internal::Button(SmtcButton::Next)).await;
        h.settle().await;
        assert_eq!(h.title(), "b");

        h.engine.handle_internal(Internal::Button(SmtcButton::Pause)).await;
        assert_eq!(h.engine.state(), PlayState::Paused);
    }

    #[tokio::test]
    async fn test_play_by_track_queues_unknown_track_after_current() {
        let mut h = Harness::local(&["a", "b"]);
        h.engine.play_by_index(0);
        h.settle().await;

        h.engine.play_by_track(TrackRef::local("/music/x.mp3"));
        h.settle().await;
        assert_eq!(h.engine.queue().playing(), Some(1));
        assert_eq!(h.title(), "x");
        assert_eq!(h.engine.queue().len(), 3);
    }

    #[tokio::test]
    async fn test_natural_end_of_last_track_parks_on_first() {
        let mut h = Harness::local(&["a", "b"]);
        h.engine.play_by_index(1);
        h.settle().await;

        h.backend.emit(BackendEvent::Ended(h.stream()));
        h.pump().await;
        h.settle().await;
        assert_eq!(h.engine.state(), PlayState::Paused);
        assert_eq!(h.engine.queue().playing(), Some(0));
        assert_eq!(h.title(), "a");
        assert!(!h.backend.calls().contains(&Call::Play(h.stream())));
    }

    #[tokio::test]
    async fn test_failure_while_parking_stops_and_resets() {
        let mut h = Harness::local(&["broken", "b"]);
        h.engine.play_by_index(1);
        h.settle().await;

        h.engine.play_next();
        h.settle().await;
        assert_eq!(h.engine.state(), PlayState::Stopped);
        assert_eq!(h.engine.consecutive_failures(), 0);
        assert_eq!(h.engine.queue().playing(), Some(0));
        assert_eq!(h.backend.live_streams(), 0);
    }

    #[tokio::test]
    async fn test_removing_playing_entry_while_paused_stays_paused() {
        let mut h = Harness::local(&["a", "b", "c"]);
        h.engine.play_by_index(1);
        h.settle().await;
        h.engine.pause();

        assert!(h.engine.remove_at(1));
        h.settle().await;
        assert_eq!(h.engine.state(), PlayState::Paused);
        assert_eq!(h.engine.queue().playing(), Some(1));
        assert_eq!(h.title(), "c");
        assert_eq!(h.creates(), 2);
        assert!(!h.backend.calls().contains(&Call::Play(h.stream())));
    }

    #[tokio::test]
    async fn test_removing_playing_entry_while_stopped_only_selects() {
        let mut h = Harness::local(&["a", "b", "c"]);
        h.engine.play_by_index(1);
        h.settle().await;
        h.engine.stop();

        assert!(h.engine.remove_at(1));
        assert_eq!(h.engine.state(), PlayState::Stopped);
        assert_eq!(h.engine.queue().playing(), Some(1));
        assert_eq!(h.engine.status().track, Some(TrackRef::local("/music/c.mp3")));
        assert_eq!(h.creates(), 1);
        assert_eq!(h.backend.live_streams(), 0);
    }

    #[tokio::test]
    async fn test_unplayable_track_skips_resolver() {
        let blocked = TrackRef::Online(OnlineTrack {
            id: "7".into(),
            title: "Region locked".into(),
            artists: vec![],
            album: None,
            duration_ms: None,
            playable: false,
            cached_path: None,
        });
        let mut h = Harness::new(vec![blocked, TrackRef::local("/music/b.mp3")]);
        let mut events = h.engine.subscribe();
        h.engine.play_by_index(0);
        h.settle().await;

        assert_eq!(h.resolves(), 0);
        assert_eq!(h.engine.state(), PlayState::Stopped);
        let mut failed = false;
        while let Ok(event) = events.try_recv() {
            failed |= matches!(event, PlayerEvent::TrackFailed { .. });
        }
        assert!(failed);
    }

    #[tokio::test]
    async fn test_seek_clamps_to_stream_length() {
        let mut h = Harness::local(&["a"]);
        h.engine.play_by_index(0);
        h.settle().await;
        // Tags claimed 180 s; the stream turns out to hold only 100 s
        assert_eq!(h.engine.session().duration_ms, 180_000);
        h.backend.state.lock().duration = Some(100.0);

        h.engine.seek(150_000).await;
        let seeks: Vec<_> = h
            .backend
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::SetPosition(..)))
            .collect();
        assert_eq!(seeks, vec![Call::SetPosition(h.stream(), 100.0)]);
        assert_eq!(h.engine.session().position_ms, 100_000);
    }

    #[tokio::test]
    async fn test_cover_art_reaches_media_session() {
        let mut h = Harness::local(&["a"]);
        h.engine.play_by_index(0);
        h.settle().await;

        let infos = h.media.infos.lock();
        let info = infos.last().expect("media info published");
        assert_eq!(info.title, "a");
        assert_eq!(info.cover.as_deref(), Some(&[0xff, 0xd8, 0xff][..]));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_latest_snapshot() {
        let mut h = Harness::local(&["a", "b"]);
        h.engine.set_volume(0.2);
        h.engine.set_repeat(RepeatMode::One);
        h.engine.shutdown().await;

        let saved = h.store.load().unwrap().expect("snapshot saved");
        assert_eq!(saved.session.volume, 0.2);
        assert_eq!(saved.session.repeat, RepeatMode::One);
        assert_eq!(saved.entries.len(), 2);
    }
}
