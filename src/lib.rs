// Melodeck - play queue and playback engine
// Module declarations
pub mod audio;
pub mod cli;
pub mod db;
pub mod error;
pub mod library;
pub mod logging;
pub mod lyrics;
pub mod metadata;
pub mod playback;
pub mod playlist;
pub mod queue;
pub mod settings;
pub mod smtc;
pub mod state;
pub mod track;

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use audio::CpalBackend;
use cli::{CliAction, HELP};
use library::DirectoryScanner;
use playback::{PlayerCommand, PlayerEvent, PlayerHandle, PlayerStatus};
use smtc::{MediaSession, NullMediaSession, SmtcManager};
use state::AppContext;

/// Command-line options
#[derive(Debug, Default, PartialEq)]
pub struct Options {
    pub data_dir: Option<PathBuf>,
    pub no_resume: bool,
    pub inputs: Vec<String>,
}

impl Options {
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut options = Options::default();
        let mut args = args.into_iter().map(Into::into);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--no-resume" => options.no_resume = true,
                "--data-dir" => {
                    let dir = args.next().context("--data-dir needs a path")?;
                    options.data_dir = Some(PathBuf::from(dir));
                }
                "--" => options.inputs.extend(args.by_ref()),
                flag if flag.starts_with("--") => bail!("unknown option {}", flag),
                _ => options.inputs.push(arg),
            }
        }
        Ok(options)
    }
}

pub async fn run(args: Vec<String>) -> Result<()> {
    let options = Options::parse(args)?;
    let app_dir = match options.data_dir {
        Some(dir) => dir,
        None => AppContext::default_app_dir()?,
    };

    let _log_guard = logging::init_logging(&app_dir.join("logs"))?;
    tracing::info!(app_dir = ?app_dir, "starting melodeck");

    let context = AppContext::load(app_dir)?;
    let backend = CpalBackend::new(context.settings.output.clone());
    let media: Box<dyn MediaSession> = match SmtcManager::new() {
        Ok(manager) => Box::new(manager),
        Err(e) => {
            tracing::warn!(error = %e, "media overlay unavailable");
            Box::new(NullMediaSession)
        }
    };

    // Paths on the command line replace whatever was saved
    let resume = !options.no_resume && options.inputs.is_empty();
    let player = context.start_player(Box::new(backend), media, resume);
    let printer = tokio::spawn(print_events(player.subscribe()));

    if !options.inputs.is_empty() {
        let tracks = DirectoryScanner::expand(&options.inputs);
        if tracks.is_empty() {
            println!("nothing playable in the given paths");
        } else {
            player
                .send(PlayerCommand::SetQueue {
                    name: "command line".to_string(),
                    tracks,
                    play_index: Some(0),
                })
                .await?;
        }
    }

    let result = command_loop(&player).await;

    player.shutdown().await?;
    printer.abort();
    tracing::info!("melodeck stopped");
    result
}

async fn command_loop(player: &PlayerHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match cli::parse_line(&line) {
            Ok(None) => {}
            Ok(Some(CliAction::Command(command))) => player.send(command.into_player_command()).await?,
            Ok(Some(CliAction::Status)) => println!("{}", describe_status(&player.status().await?)),
            Ok(Some(CliAction::Help)) => println!("{}", HELP),
            Ok(Some(CliAction::Quit)) => break,
            Err(e) => println!("{}", e),
        }
    }
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<PlayerEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(line) = describe_event(&event) {
                    println!("{}", line);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn describe_event(event: &PlayerEvent) -> Option<String> {
    match event {
        PlayerEvent::StateChanged(state) => Some(format!("[{:?}]", state)),
        PlayerEvent::TrackChanged { index, title, artist, duration_ms } => {
            let position = index.map(|i| format!("{}. ", i + 1)).unwrap_or_default();
            let artist = if artist.is_empty() { String::new() } else { format!(" - {}", artist) };
            Some(format!("{}{}{} ({})", position, title, artist, format_time(*duration_ms)))
        }
        PlayerEvent::LyricChanged { text, .. } => Some(format!("  ♪ {}", text)),
        PlayerEvent::RepeatChanged(mode) => Some(format!("repeat: {}", mode)),
        PlayerEvent::QueueChanged { len, shuffle, .. } => {
            Some(format!("queue: {} tracks{}", len, if *shuffle { ", shuffled" } else { "" }))
        }
        PlayerEvent::VolumeChanged { volume, muted } => Some(format!(
            "volume: {:.0}%{}",
            volume * 100.0,
            if *muted { " (muted)" } else { "" }
        )),
        PlayerEvent::SpeedChanged(speed) => Some(format!("speed: {:.2}x", speed)),
        PlayerEvent::TrackFailed { track, error } => {
            Some(format!("can't play {}: {}", track.display_title(), error))
        }
        // Too chatty for the terminal
        PlayerEvent::Position { .. } => None,
    }
}

fn describe_status(status: &PlayerStatus) -> String {
    let mut line = format!("[{:?}]", status.state);
    if let (Some(index), Some(title)) = (status.index, status.title.as_deref()) {
        line.push_str(&format!(" {}/{} {}", index + 1, status.queue_len, title));
    } else {
        line.push_str(&format!(" {} tracks queued", status.queue_len));
    }
    line.push_str(&format!(
        " {} / {} | repeat {} | shuffle {} | vol {:.0}%{}",
        format_time(status.position_ms),
        format_time(status.duration_ms),
        status.repeat,
        if status.shuffle { "on" } else { "off" },
        status.volume * 100.0,
        if status.muted { " (muted)" } else { "" },
    ));
    line
}

fn format_time(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::{PlayState, RepeatMode};

    #[test]
    fn test_parse_options() {
        let options = Options::parse(["--no-resume", "--data-dir", "/tmp/md", "a.mp3", "--", "--odd.mp3"]).unwrap();
        assert!(options.no_resume);
        assert_eq!(options.data_dir, Some(PathBuf::from("/tmp/md")));
        assert_eq!(options.inputs, vec!["a.mp3".to_string(), "--odd.mp3".to_string()]);

        assert!(Options::parse(["--data-dir"]).is_err());
        assert!(Options::parse(["--loud"]).is_err());
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "0:00");
        assert_eq!(format_time(61_999), "1:01");
        assert_eq!(format_time(3_600_000), "60:00");
    }

    #[test]
    fn test_describe_status() {
        let status = PlayerStatus {
            state: PlayState::Playing,
            index: Some(1),
            track: None,
            title: Some("Song".into()),
            position_ms: 5_000,
            duration_ms: 90_000,
            volume: 0.5,
            muted: false,
            speed: 1.0,
            repeat: RepeatMode::All,
            shuffle: true,
            queue_len: 3,
        };
        assert_eq!(
            describe_status(&status),
            "[Playing] 2/3 Song 0:05 / 1:30 | repeat all | shuffle on | vol 50%"
        );
        assert!(describe_event(&PlayerEvent::Position { elapsed_ms: 1, duration_ms: 2, fraction: 0.5 }).is_none());
    }
}
