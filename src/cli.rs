// Line commands for the headless player
use crate::playback::{PlayerCommand, RepeatMode};

#[derive(Debug, Clone, PartialEq)]
pub enum CliAction {
    Command(CliCommand),
    Status,
    Help,
    Quit,
}

/// Commands that map straight onto the player
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Play,
    Pause,
    Toggle,
    Stop,
    Next,
    Previous,
    Jump(usize),
    Seek(u64),
    Volume(f32),
    Mute(bool),
    Speed(f32),
    Repeat(RepeatMode),
    Shuffle,
    Remove(usize),
}

impl CliCommand {
    pub fn into_player_command(self) -> PlayerCommand {
        match self {
            CliCommand::Play => PlayerCommand::Play,
            CliCommand::Pause => PlayerCommand::Pause,
            CliCommand::Toggle => PlayerCommand::TogglePlayPause,
            CliCommand::Stop => PlayerCommand::Stop,
            CliCommand::Next => PlayerCommand::Next,
            CliCommand::Previous => PlayerCommand::Previous,
            CliCommand::Jump(index) => PlayerCommand::PlayIndex(index),
            CliCommand::Seek(ms) => PlayerCommand::Seek(ms),
            CliCommand::Volume(v) => PlayerCommand::SetVolume(v),
            CliCommand::Mute(m) => PlayerCommand::SetMuted(m),
            CliCommand::Speed(s) => PlayerCommand::SetSpeed(s),
            CliCommand::Repeat(r) => PlayerCommand::SetRepeat(r),
            CliCommand::Shuffle => PlayerCommand::ToggleShuffle,
            CliCommand::Remove(index) => PlayerCommand::RemoveAt(index),
        }
    }
}

pub const HELP: &str = "\
commands:
  play | pause | toggle | stop
  next | prev
  jump <n>          play queue entry n (1-based)
  seek <secs>
  vol <0-1> | mute | unmute
  speed <0.25-4>
  repeat <off|all|one>
  shuffle
  rm <n>            remove queue entry n (1-based)
  status | help | quit";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<CliAction>, String> {
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();

    let command = match word.to_ascii_lowercase().as_str() {
        "play" => CliCommand::Play,
        "pause" => CliCommand::Pause,
        "toggle" | "p" => CliCommand::Toggle,
        "stop" => CliCommand::Stop,
        "next" | "n" => CliCommand::Next,
        "prev" | "previous" => CliCommand::Previous,
        "jump" => CliCommand::Jump(one_based(arg)?),
        "rm" | "remove" => CliCommand::Remove(one_based(arg)?),
        "seek" => {
            let secs: f64 = number(arg, "seek")?;
            if secs < 0.0 {
                return Err("seek position can't be negative".to_string());
            }
            CliCommand::Seek((secs * 1000.0).round() as u64)
        }
        "vol" | "volume" => CliCommand::Volume(number(arg, "vol")?),
        "mute" => CliCommand::Mute(true),
        "unmute" => CliCommand::Mute(false),
        "speed" => CliCommand::Speed(number(arg, "speed")?),
        "repeat" => {
            let mode = arg.ok_or("repeat needs off, all or one")?;
            CliCommand::Repeat(mode.parse()?)
        }
        "shuffle" => CliCommand::Shuffle,
        "status" | "s" => return Ok(Some(CliAction::Status)),
        "help" | "?" => return Ok(Some(CliAction::Help)),
        "quit" | "exit" | "q" => return Ok(Some(CliAction::Quit)),
        other => return Err(format!("unknown command '{}', try 'help'", other)),
    };
    Ok(Some(CliAction::Command(command)))
}

fn number<T: std::str::FromStr>(arg: Option<&str>, name: &str) -> Result<T, String> {
    let arg = arg.ok_or_else(|| format!("{} needs a number", name))?;
    arg.parse().map_err(|_| format!("'{}' is not a valid number for {}", arg, name))
}

fn one_based(arg: Option<&str>) -> Result<usize, String> {
    let n: usize = number(arg, "entry")?;
    n.checked_sub(1).ok_or_else(|| "entries are numbered from 1".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_line("  "), Ok(None));
        assert_eq!(parse_line("NEXT"), Ok(Some(CliAction::Command(CliCommand::Next))));
        assert_eq!(parse_line("seek 1.5"), Ok(Some(CliAction::Command(CliCommand::Seek(1500)))));
        assert_eq!(parse_line("jump 3"), Ok(Some(CliAction::Command(CliCommand::Jump(2)))));
        assert_eq!(
            parse_line("repeat all"),
            Ok(Some(CliAction::Command(CliCommand::Repeat(RepeatMode::All))))
        );
        assert_eq!(parse_line("quit"), Ok(Some(CliAction::Quit)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("seek").is_err());
        assert!(parse_line("seek -4").is_err());
        assert!(parse_line("jump 0").is_err());
        assert!(parse_line("vol loud").is_err());
        assert!(parse_line("repeat sometimes").is_err());
        assert!(parse_line("dance").is_err());
    }
}
