// Playlist import/export
// Turns playlist files into queue contents and back

pub mod m3u;

pub use m3u::{M3uEntry, M3uPlaylist};
