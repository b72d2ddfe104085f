// Library module
// Finds audio files on disk and turns them into queue contents

pub mod scanner;

pub use scanner::{is_audio_file, is_playlist_file, DirectoryScanner};
