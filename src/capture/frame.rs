//! Frame type representing one encoded image with metadata.

use chrono::{DateTime, Utc};

/// A single captured MJPEG frame.
///
/// Frames are transient: the publish loop hands the bytes to a sink and
/// drops the frame immediately.
#[derive(Clone)]
pub struct Frame {
    /// Encoded JPEG bytes.
    data: Vec<u8>,
    /// Capture timestamp.
    timestamp: DateTime<Utc>,
    /// Per-session sequence number, starting at 1.
    sequence: u64,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(data: Vec<u8>, timestamp: DateTime<Utc>, sequence: u64) -> Self {
        Self {
            data,
            timestamp,
            sequence,
        }
    }

    /// Consumes the frame, returning the encoded bytes.
    #[inline]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Returns the capture timestamp.
    #[inline]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the sequence number.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the payload size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Checks for the JPEG start-of-image marker.
    pub fn has_jpeg_marker(&self) -> bool {
        self.data.starts_with(&[0xFF, 0xD8])
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("timestamp", &self.timestamp)
            .field("bytes", &self.data.len())
            .finish()
    }
}
