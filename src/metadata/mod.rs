// Track detail resolution
// Turns lightweight track references into playable snapshots

pub mod extractor;
pub mod parser;

pub use extractor::LocalResolver;

use crate::error::ResolveError;
use crate::track::{TrackDetail, TrackRef};

/// Resolves a [`TrackRef`] into a [`TrackDetail`].
///
/// Resolution may touch the disk or the network, so the engine always calls
/// it from a blocking task and never from its event loop.
pub trait TrackResolver: Send + Sync + 'static {
    fn resolve(&self, track: &TrackRef) -> Result<TrackDetail, ResolveError>;
}
