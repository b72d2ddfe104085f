// Playback module
// State machine, position/lyric sync and the task that owns them

pub mod engine;
pub mod failure;
pub mod handle;
pub mod session;
pub mod sync;

pub use engine::{Engine, EngineConfig, EngineParts, PlayerEvent, PlayerStatus};
pub use handle::{spawn_player, PlayerCommand, PlayerHandle};
pub use session::{PlayState, RepeatMode, Session};
