//! Video input.

pub mod webcam;

use crate::image::Image;
use crate::timer::Timer;

/// A source of video frames, like a webcam.
pub trait FrameSource {
    /// Blocks until the next frame is available and returns it.
    ///
    /// An error means that the stream has ended and no further frames will arrive.
    fn read(&mut self) -> anyhow::Result<Image>;

    /// Releases the underlying device. Reads after this fail.
    ///
    /// Releasing an already released source does nothing.
    fn release(&mut self);

    /// Returns the profiling timers of this source.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}
