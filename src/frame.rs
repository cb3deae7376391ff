use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::device::PixelFormat;

/// Kind of stream a buffer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    /// Compressed stills, produced from a planar YUV 4:2:0 intermediate
    Jpeg,
    /// Packed 3-byte-per-pixel frames delivered zero-copy
    Rgb,
    /// Native sensor Bayer data, never mapped or delivered
    Raw,
}

impl StreamType {
    /// Pixel format the device is asked to produce for this stream type
    pub fn pixel_format(&self) -> PixelFormat {
        match self {
            StreamType::Rgb => PixelFormat::Bgr888,
            StreamType::Jpeg => PixelFormat::Yuv420,
            StreamType::Raw => PixelFormat::Sbggr10,
        }
    }

    /// Bytes of a packed frame, or `None` for RAW which is never mapped
    pub fn mapped_size(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            StreamType::Rgb => Some(pixels * 3),
            StreamType::Jpeg => Some(pixels * 3 / 2),
            StreamType::Raw => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamType::Jpeg => "jpeg",
            StreamType::Rgb => "rgb",
            StreamType::Raw => "raw",
        }
    }
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Requested stream. A zero width or height keeps the device default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(rename = "type")]
    pub stream_type: StreamType,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

impl StreamConfig {
    pub fn new(stream_type: StreamType, width: u32, height: u32) -> Self {
        Self {
            stream_type,
            width,
            height,
        }
    }

    /// RAW stream synthesised when the caller does not ask for one
    pub fn default_raw() -> Self {
        Self::new(StreamType::Raw, 2304, 1296)
    }
}

#[derive(Debug, Clone)]
enum Backing<'a> {
    Mapped(&'a [u8]),
    Encoded(Bytes),
}

impl Backing<'_> {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Mapped(data) => data,
            Backing::Encoded(bytes) => bytes,
        }
    }
}

/// Lifetime token for a delivered frame.
///
/// For a zero-copy frame the token borrows the mapped capture buffer and cannot
/// outlive the callback that received it; the buffer is recycled once the
/// callback returns. For an encoded frame the token shares ownership of the
/// compressed bytes and may be kept for as long as the consumer likes.
#[derive(Debug, Clone)]
pub struct FrameOwner<'a>(Backing<'a>);

impl FrameOwner<'_> {
    pub fn bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// Whether the token pins a capture buffer rather than owned bytes
    pub fn is_borrowed(&self) -> bool {
        matches!(self.0, Backing::Mapped(_))
    }

    /// Give up the token explicitly
    pub fn release(self) {}
}

/// A frame handed to the application.
#[derive(Debug, Clone)]
pub struct Frame<'a> {
    stream_type: StreamType,
    backing: Backing<'a>,
    timestamp: u64,
    sequence: u32,
}

impl<'a> Frame<'a> {
    /// Zero-copy view into a mapped capture buffer
    pub fn mapped(stream_type: StreamType, data: &'a [u8], timestamp: u64, sequence: u32) -> Self {
        Self {
            stream_type,
            backing: Backing::Mapped(data),
            timestamp,
            sequence,
        }
    }

    pub fn stream_type(&self) -> StreamType {
        self.stream_type
    }

    pub fn data(&self) -> &[u8] {
        self.backing.as_slice()
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Sensor timestamp in nanoseconds
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// True when the data still lives in a capture buffer
    pub fn is_zero_copy(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }

    pub fn owner(&self) -> FrameOwner<'a> {
        FrameOwner(self.backing.clone())
    }

    /// Detach the frame from its capture buffer, copying if it is still mapped
    pub fn into_owned(self) -> Frame<'static> {
        let backing = match self.backing {
            Backing::Mapped(data) => Backing::Encoded(Bytes::copy_from_slice(data)),
            Backing::Encoded(bytes) => Backing::Encoded(bytes),
        };
        Frame {
            stream_type: self.stream_type,
            backing,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }
}

impl Frame<'static> {
    /// Frame backed by independently owned bytes
    pub fn owned(stream_type: StreamType, data: Bytes, timestamp: u64, sequence: u32) -> Self {
        Self {
            stream_type,
            backing: Backing::Encoded(data),
            timestamp,
            sequence,
        }
    }

    /// Owned bytes of the frame, shared without copying
    pub fn bytes(&self) -> Bytes {
        match &self.backing {
            Backing::Encoded(bytes) => bytes.clone(),
            Backing::Mapped(data) => Bytes::copy_from_slice(data),
        }
    }
}

/// Receives every delivered frame. May run on the capture dispatcher thread
/// or on the encoder worker thread.
pub type FrameCallback = Arc<dyn Fn(StreamType, &Frame<'_>) + Send + Sync>;

/// Receives fatal start-up errors.
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub fn frame_callback<F>(f: F) -> FrameCallback
where
    F: Fn(StreamType, &Frame<'_>) + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn error_callback<F>(f: F) -> ErrorCallback
where
    F: Fn(&str) + Send + Sync + 'static,
{
    Arc::new(f)
}
