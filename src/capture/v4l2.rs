//! Video4Linux capture backend.
//!
//! Supports all three I/O strategies: memory-mapped and user-pointer
//! streaming through the `v4l` crate, and plain `read()` on the device node.

use super::device::{read_until_frame, CaptureBackend, DeviceError, DeviceHandle, OpenRequest};
use super::IoMethod;
use std::fs::File;
use std::io::{self, Read};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::io::userptr::Stream as UserptrStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// Number of driver buffers requested for streaming I/O.
const BUFFER_COUNT: u32 = 4;

/// `V4L2_CID_FOCUS_AUTO`.
const CID_FOCUS_AUTO: u32 = 0x009a_090c;

/// Opens real devices through Video4Linux.
#[derive(Debug, Default, Clone, Copy)]
pub struct V4lBackend;

impl V4lBackend {
    /// Creates the backend. Devices are opened lazily.
    pub fn new() -> Self {
        Self
    }
}

enum Stream {
    Mmap(MmapStream<'static>),
    Userptr(UserptrStream),
    Read { file: File, buf: Vec<u8> },
}

/// An open V4L2 device. Streams stop and buffers are released on drop.
pub struct V4lHandle {
    // Field order matters: the stream must be torn down before the device.
    stream: Stream,
    device: Device,
    path: String,
    io_method: IoMethod,
}

impl CaptureBackend for V4lBackend {
    type Handle = V4lHandle;

    fn open(&self, request: &OpenRequest) -> Result<V4lHandle, DeviceError> {
        let path = request.path.clone();
        let open_err = |e: io::Error| DeviceError::OpenFailed {
            path: path.clone(),
            reason: e.to_string(),
        };

        let device = Device::with_path(&path).map_err(open_err)?;

        let fourcc = FourCC::new(&request.pixel_format.fourcc());
        let requested = Format::new(request.width, request.height, fourcc);
        let format = device.set_format(&requested).map_err(open_err)?;
        if format.fourcc != fourcc {
            return Err(DeviceError::OpenFailed {
                path: path.clone(),
                reason: format!("device does not support {}", fourcc),
            });
        }
        if format.width != request.width || format.height != request.height {
            tracing::warn!(
                path = %path,
                "Camera did not accept requested resolution. Using {}x{} instead of {}x{}",
                format.width,
                format.height,
                request.width,
                request.height
            );
        }

        if let Err(e) = device.set_params(&Parameters::with_fps(request.frame_rate)) {
            tracing::warn!(path = %path, error = %e, "Failed to set frame rate");
        }

        let stream = match request.io_method {
            IoMethod::Mmap => Stream::Mmap(
                MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(open_err)?,
            ),
            IoMethod::Userptr => Stream::Userptr(
                UserptrStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(open_err)?,
            ),
            IoMethod::Read => Stream::Read {
                file: File::open(&path).map_err(open_err)?,
                buf: vec![0u8; format.size as usize],
            },
        };

        tracing::info!(
            path = %path,
            io_method = %request.io_method,
            "Opened {}x{} {} at {} fps",
            format.width,
            format.height,
            fourcc,
            request.frame_rate
        );

        Ok(V4lHandle {
            stream,
            device,
            path,
            io_method: request.io_method,
        })
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}

impl V4lHandle {
    fn read_once(&mut self) -> Result<Option<Vec<u8>>, DeviceError> {
        let result = match &mut self.stream {
            Stream::Mmap(stream) => stream
                .next()
                .map(|(buf, meta)| buf[..(meta.bytesused as usize).min(buf.len())].to_vec()),
            Stream::Userptr(stream) => stream
                .next()
                .map(|(buf, meta)| buf[..(meta.bytesused as usize).min(buf.len())].to_vec()),
            Stream::Read { file, buf } => file.read(buf).map(|n| buf[..n].to_vec()),
        };

        match result {
            Ok(data) => Ok(Some(data)),
            Err(e) if is_transient(&e) => Ok(None),
            Err(e) => Err(DeviceError::Lost {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

impl DeviceHandle for V4lHandle {
    fn path(&self) -> &str {
        &self.path
    }

    fn io_method(&self) -> IoMethod {
        self.io_method
    }

    fn grab(&mut self) -> Result<Vec<u8>, DeviceError> {
        let path = self.path.clone();
        read_until_frame(&path, || self.read_once())
    }

    fn set_autofocus(&mut self, enabled: bool) -> Result<(), DeviceError> {
        let control = v4l::Control {
            id: CID_FOCUS_AUTO,
            value: v4l::control::Value::Boolean(enabled),
        };
        self.device
            .set_control(control)
            .map_err(|e| DeviceError::Unsupported {
                path: self.path.clone(),
                control: format!("focus_auto ({})", e),
            })
    }
}

impl Drop for V4lHandle {
    fn drop(&mut self) {
        tracing::info!(path = %self.path, "Closing device");
    }
}
