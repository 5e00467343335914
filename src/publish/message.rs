//! Outbound compressed image message.

use crate::capture::Frame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format label carried by every published frame.
pub const JPEG_FORMAT: &str = "jpeg";

/// Message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Capture time of the frame.
    pub stamp: DateTime<Utc>,
    /// Coordinate frame label of the camera.
    pub frame_id: String,
}

/// One compressed image, ready for a downstream consumer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedImage {
    /// Capture stamp and frame label.
    pub header: Header,
    /// Always [`JPEG_FORMAT`].
    pub format: String,
    /// Encoded image bytes.
    pub data: Vec<u8>,
}

impl CompressedImage {
    /// Wraps a captured frame, stamping it with the frame's capture time.
    pub fn from_frame(frame: Frame, frame_id: &str) -> Self {
        Self {
            header: Header {
                stamp: frame.timestamp(),
                frame_id: frame_id.to_string(),
            },
            format: JPEG_FORMAT.to_string(),
            data: frame.into_data(),
        }
    }
}

impl std::fmt::Debug for CompressedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedImage")
            .field("header", &self.header)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_frame() {
        let stamp = Utc::now();
        let frame = Frame::new(vec![0xFF, 0xD8, 0xFF, 0xD9], stamp, 1);
        let msg = CompressedImage::from_frame(frame, "head_camera");

        assert_eq!(msg.format, "jpeg");
        assert_eq!(msg.header.stamp, stamp);
        assert_eq!(msg.header.frame_id, "head_camera");
        assert_eq!(msg.data, vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }
}
