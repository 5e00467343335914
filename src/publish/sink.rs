//! Destinations for published frames.

use super::CompressedImage;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use thiserror::Error;

/// Errors returned by a [`FrameSink`].
#[derive(Debug, Error)]
pub enum PublishError {
    /// No consumer is listening any more.
    #[error("consumer disconnected")]
    Disconnected,
}

/// How a sink accepted a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The message was queued behind nothing.
    Delivered,
    /// The message replaced one the consumer had not taken yet.
    ReplacedPending,
}

/// Accepts one message per successful grab.
pub trait FrameSink {
    /// Hands `image` to the consumer.
    fn publish(&mut self, image: CompressedImage) -> Result<Delivery, PublishError>;
}

impl<S: FrameSink + ?Sized> FrameSink for &mut S {
    fn publish(&mut self, image: CompressedImage) -> Result<Delivery, PublishError> {
        (**self).publish(image)
    }
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn publish(&mut self, image: CompressedImage) -> Result<Delivery, PublishError> {
        (**self).publish(image)
    }
}

#[derive(Debug, Default)]
struct Slot {
    pending: Option<CompressedImage>,
    senders: usize,
    receiver_alive: bool,
}

#[derive(Debug, Default)]
struct Shared {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Single-slot sink holding only the newest frame.
///
/// A lagging consumer never sees stale frames: publishing while a frame is
/// still pending overwrites it, and the overwritten frame counts as dropped.
#[derive(Debug)]
pub struct LatestFrameSink {
    shared: Arc<Shared>,
}

/// Receiving end of a [`LatestFrameSink`].
#[derive(Debug)]
pub struct LatestFrameReceiver {
    shared: Arc<Shared>,
}

impl LatestFrameSink {
    /// Creates a sink and its receiving end.
    pub fn new() -> (Self, LatestFrameReceiver) {
        let shared = Arc::new(Shared::default());
        {
            let mut slot = shared.lock();
            slot.senders = 1;
            slot.receiver_alive = true;
        }
        (
            Self {
                shared: Arc::clone(&shared),
            },
            LatestFrameReceiver { shared },
        )
    }
}

impl Clone for LatestFrameSink {
    fn clone(&self) -> Self {
        self.shared.lock().senders += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for LatestFrameSink {
    fn drop(&mut self) {
        self.shared.lock().senders -= 1;
        self.shared.ready.notify_all();
    }
}

impl FrameSink for LatestFrameSink {
    fn publish(&mut self, image: CompressedImage) -> Result<Delivery, PublishError> {
        let mut slot = self.shared.lock();
        if !slot.receiver_alive {
            return Err(PublishError::Disconnected);
        }
        let delivery = match slot.pending.replace(image) {
            Some(_) => Delivery::ReplacedPending,
            None => Delivery::Delivered,
        };
        drop(slot);
        self.shared.ready.notify_one();
        Ok(delivery)
    }
}

impl LatestFrameReceiver {
    /// Blocks until a frame is pending; `None` once every sink is gone and
    /// nothing is left to take.
    pub fn recv(&self) -> Option<CompressedImage> {
        let mut slot = self.shared.lock();
        loop {
            if let Some(image) = slot.pending.take() {
                return Some(image);
            }
            if slot.senders == 0 {
                return None;
            }
            slot = self
                .shared
                .ready
                .wait(slot)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Iterator for LatestFrameReceiver {
    type Item = CompressedImage;

    fn next(&mut self) -> Option<CompressedImage> {
        self.recv()
    }
}

impl Drop for LatestFrameReceiver {
    fn drop(&mut self) {
        let mut slot = self.shared.lock();
        slot.receiver_alive = false;
        slot.pending = None;
    }
}

/// Logs each frame and discards it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl FrameSink for TracingSink {
    fn publish(&mut self, image: CompressedImage) -> Result<Delivery, PublishError> {
        tracing::trace!(
            stamp = %image.header.stamp,
            frame_id = %image.header.frame_id,
            bytes = image.data.len(),
            "Frame published"
        );
        Ok(Delivery::Delivered)
    }
}

/// Keeps every published message in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    messages: Vec<CompressedImage>,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages published so far, oldest first.
    pub fn messages(&self) -> &[CompressedImage] {
        &self.messages
    }
}

impl FrameSink for RecordingSink {
    fn publish(&mut self, image: CompressedImage) -> Result<Delivery, PublishError> {
        self.messages.push(image);
        Ok(Delivery::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;
    use chrono::Utc;

    fn image(tag: u8) -> CompressedImage {
        CompressedImage::from_frame(Frame::new(vec![0xFF, 0xD8, tag], Utc::now(), tag as u64), "cam")
    }

    #[test]
    fn test_lagging_consumer_gets_newest_frame() {
        let (mut sink, rx) = LatestFrameSink::new();

        assert_eq!(sink.publish(image(1)).unwrap(), Delivery::Delivered);
        assert_eq!(sink.publish(image(2)).unwrap(), Delivery::ReplacedPending);
        assert_eq!(sink.publish(image(3)).unwrap(), Delivery::ReplacedPending);

        let received = rx.recv().unwrap();
        assert_eq!(received.data[2], 3);

        assert_eq!(sink.publish(image(4)).unwrap(), Delivery::Delivered);
        drop(sink);
        assert_eq!(rx.recv().unwrap().data[2], 4);
        assert!(rx.recv().is_none());
    }

    #[test]
    fn test_receiver_drains_then_ends_when_sink_dropped() {
        let (mut sink, rx) = LatestFrameSink::new();
        sink.publish(image(7)).unwrap();
        drop(sink);

        let frames: Vec<_> = rx.collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data[2], 7);
    }

    #[test]
    fn test_recv_wakes_on_publish_from_other_thread() {
        let (mut sink, rx) = LatestFrameSink::new();
        let producer = std::thread::spawn(move || {
            sink.publish(image(9)).unwrap();
        });

        let received = rx.recv().unwrap();
        assert_eq!(received.data[2], 9);
        producer.join().unwrap();
    }

    #[test]
    fn test_sink_reports_disconnect() {
        let (mut sink, rx) = LatestFrameSink::new();
        drop(rx);

        assert!(matches!(
            sink.publish(image(1)),
            Err(PublishError::Disconnected)
        ));
    }
}
