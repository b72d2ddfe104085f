// Player task and its handle
// One tokio task owns the engine; everything else talks to it through channels

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use super::engine::{Engine, EngineParts, PlayerEvent, PlayerStatus};
use super::session::RepeatMode;
use crate::queue::QueueSnapshot;
use crate::settings::PlaybackSettings;
use crate::track::TrackRef;

const COMMAND_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum PlayerCommand {
    Play,
    Pause,
    TogglePlayPause,
    Stop,
    Next,
    Previous,
    PlayIndex(usize),
    PlayTrack(TrackRef),
    /// Position in milliseconds
    Seek(u64),
    SetVolume(f32),
    SetMuted(bool),
    SetSpeed(f32),
    SetRepeat(RepeatMode),
    ToggleShuffle,
    SetQueue {
        name: String,
        tracks: Vec<TrackRef>,
        play_index: Option<usize>,
    },
    InsertAt {
        index: usize,
        tracks: Vec<TrackRef>,
    },
    Append(Vec<TrackRef>),
    RemoveAt(usize),
    MoveUp(usize),
    MoveDown(usize),
    Status(oneshot::Sender<PlayerStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to the player task
#[derive(Clone)]
pub struct PlayerHandle {
    commands: mpsc::Sender<PlayerCommand>,
    events: broadcast::Sender<PlayerEvent>,
}

impl PlayerHandle {
    pub async fn send(&self, command: PlayerCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("player task has stopped"))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> Result<PlayerStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(PlayerCommand::Status(tx)).await?;
        rx.await.context("player task dropped the status request")
    }

    /// Stop playback, save the session and end the task
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(PlayerCommand::Shutdown(tx)).await?;
        rx.await.context("player task ended before acknowledging shutdown")
    }
}

/// Start the player task. A saved snapshot, if given, is restored before
/// the first command is handled.
pub fn spawn_player(
    parts: EngineParts,
    settings: &PlaybackSettings,
    snapshot: Option<QueueSnapshot>,
) -> PlayerHandle {
    let (mut engine, mut internal) = Engine::new(parts, settings);
    if let Some(snapshot) = snapshot.as_ref() {
        engine.restore(snapshot);
    }

    let (commands, mut command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let events = engine.event_sender();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(engine.config().sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!("player task started");

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(PlayerCommand::Shutdown(done)) => {
                        command_rx.close();
                        engine.shutdown().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => apply(&mut engine, command).await,
                    None => {
                        // Every handle is gone
                        engine.shutdown().await;
                        break;
                    }
                },
                Some(message) = internal.recv() => engine.handle_internal(message).await,
                _ = ticker.tick(), if engine.is_playing() => engine.tick(),
            }
        }

        tracing::debug!("player task finished");
    });

    PlayerHandle { commands, events }
}

async fn apply(engine: &mut Engine, command: PlayerCommand) {
    tracing::trace!(?command, "player command");
    match command {
        PlayerCommand::Play => engine.play(),
        PlayerCommand::Pause => engine.pause(),
        PlayerCommand::TogglePlayPause => engine.toggle_play_pause(),
        PlayerCommand::Stop => engine.stop(),
        PlayerCommand::Next => engine.play_next(),
        PlayerCommand::Previous => engine.play_previous(),
        PlayerCommand::PlayIndex(index) => engine.play_by_index(index),
        PlayerCommand::PlayTrack(track) => engine.play_by_track(track),
        PlayerCommand::Seek(position_ms) => engine.seek(position_ms).await,
        PlayerCommand::SetVolume(volume) => engine.set_volume(volume),
        PlayerCommand::SetMuted(muted) => engine.set_muted(muted),
        PlayerCommand::SetSpeed(speed) => engine.set_speed(speed),
        PlayerCommand::SetRepeat(repeat) => engine.set_repeat(repeat),
        PlayerCommand::ToggleShuffle => {
            engine.toggle_shuffle();
        }
        PlayerCommand::SetQueue { name, tracks, play_index } => match play_index {
            Some(index) => engine.set_queue_and_play(name, tracks, index),
            None => {
                engine.set_queue(name, tracks);
            }
        },
        PlayerCommand::InsertAt { index, tracks } => {
            engine.insert_at(index, tracks);
        }
        PlayerCommand::Append(tracks) => {
            engine.append(tracks);
        }
        PlayerCommand::RemoveAt(index) => {
            engine.remove_at(index);
        }
        PlayerCommand::MoveUp(index) => {
            engine.move_up(index);
        }
        PlayerCommand::MoveDown(index) => {
            engine.move_down(index);
        }
        PlayerCommand::Status(reply) => {
            let _ = reply.send(engine.status());
        }
        // Handled by the task loop
        PlayerCommand::Shutdown(_) => {}
    }
}
