//! Frame publishing.
//!
//! The [`PublishLoop`] ties the capture session, the reconnect supervisor
//! and the rate monitor together and hands every frame to a [`FrameSink`].

mod message;
mod runner;
mod sink;

pub use message::{CompressedImage, Header, JPEG_FORMAT};
pub use runner::{FrameOutcome, LoopStats, PublishLoop, StepOutcome};
pub use sink::{
    Delivery, FrameSink, LatestFrameReceiver, LatestFrameSink, PublishError, RecordingSink,
    TracingSink,
};
