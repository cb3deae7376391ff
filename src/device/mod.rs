//! Camera hardware abstraction consumed by the pipeline.
//!
//! A backend enumerates cameras, hands out configurations and buffers, and
//! returns completed capture requests over a channel. The pipeline never talks
//! to a driver directly.

mod request;
#[cfg(feature = "simulator")]
pub mod sim;

pub use request::{BufferSlot, CaptureRequest, RequestMetadata, RequestStatus};

use crate::controls::{ControlId, ControlInfo, ControlList};
use crate::error::DeviceError;
use crossbeam::channel::Receiver;
use std::os::fd::RawFd;
use std::sync::Arc;

/// Index of a stream inside the applied camera configuration
pub type StreamId = usize;

/// Purpose a stream is configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamRole {
    Raw,
    StillCapture,
}

/// Pixel formats the pipeline asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 24-bit, 3 bytes per pixel
    Bgr888,
    /// Planar YUV 4:2:0 (I420)
    Yuv420,
    /// 10-bit Bayer BGGR, sensor native
    Sbggr10,
}

impl PixelFormat {
    pub fn fourcc(&self) -> &'static str {
        match self {
            PixelFormat::Bgr888 => "BG24",
            PixelFormat::Yuv420 => "YU12",
            PixelFormat::Sbggr10 => "BG10",
        }
    }

    /// Bytes per line for a packed/planar luma row, or the unpacked Bayer row
    pub fn stride(&self, width: u32) -> u32 {
        match self {
            PixelFormat::Bgr888 => width * 3,
            PixelFormat::Yuv420 => width,
            PixelFormat::Sbggr10 => width * 2,
        }
    }

    /// Total bytes of one frame in this format
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Bgr888 => pixels * 3,
            PixelFormat::Yuv420 => pixels * 3 / 2,
            PixelFormat::Sbggr10 => pixels * 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Settings of one stream inside a camera configuration
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfiguration {
    pub role: StreamRole,
    pub pixel_format: PixelFormat,
    pub size: Size,
    pub stride: u32,
    pub buffer_count: u32,
}

/// Ordered stream settings; the position of each entry is its [`StreamId`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CameraConfiguration {
    streams: Vec<StreamConfiguration>,
}

impl CameraConfiguration {
    pub fn new(streams: Vec<StreamConfiguration>) -> Self {
        Self { streams }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn get(&self, stream: StreamId) -> Option<&StreamConfiguration> {
        self.streams.get(stream)
    }

    pub fn get_mut(&mut self, stream: StreamId) -> Option<&mut StreamConfiguration> {
        self.streams.get_mut(stream)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamConfiguration> {
        self.streams.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut StreamConfiguration> {
        self.streams.iter_mut()
    }
}

/// Outcome of validating a configuration against the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationStatus {
    Valid,
    Adjusted,
    Invalid,
}

/// One dma-buf style plane of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePlane {
    pub fd: RawFd,
    pub offset: u64,
    pub length: usize,
}

/// Device-owned frame buffer; the fds stay valid until the stream is freed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    pub planes: Vec<FramePlane>,
}

/// Entry point of a camera backend
pub trait CameraManager: Send + Sync {
    /// Bring up the backend service
    fn start(&self) -> Result<(), DeviceError>;

    /// Cameras in enumeration order
    fn cameras(&self) -> Vec<Arc<dyn Camera>>;
}

/// A single camera device.
///
/// All methods take `&self`: implementations guard their own state so the
/// completion dispatcher can requeue requests while the control thread stops
/// the device.
pub trait Camera: Send + Sync {
    fn id(&self) -> String;

    /// Take exclusive ownership
    fn acquire(&self) -> Result<(), DeviceError>;

    fn release(&self);

    /// Default settings for the given roles, `None` if the combination is unsupported
    fn generate_configuration(&self, roles: &[StreamRole]) -> Option<CameraConfiguration>;

    /// Adjust the configuration in place to something the hardware supports
    fn validate(&self, config: &mut CameraConfiguration) -> ConfigurationStatus;

    fn configure(&self, config: &CameraConfiguration) -> Result<(), DeviceError>;

    /// Allocate the configured number of buffers for a stream
    fn allocate(&self, stream: StreamId) -> Result<Vec<FrameBuffer>, DeviceError>;

    fn free(&self, stream: StreamId);

    /// Create an empty request, `None` if the device cannot provide one
    fn create_request(&self, cookie: u64) -> Option<CaptureRequest> {
        Some(CaptureRequest::new(cookie))
    }

    fn start(&self, controls: &ControlList) -> Result<(), DeviceError>;

    /// Stop capturing; queued requests come back cancelled
    fn stop(&self);

    /// Hand a request to the device. It returns through the completion channel.
    fn queue_request(&self, request: CaptureRequest) -> Result<(), DeviceError>;

    /// Subscribe to completed requests; one message per completion
    fn subscribe(&self) -> Receiver<CaptureRequest>;

    /// Close the completion channel
    fn unsubscribe(&self);

    /// Advertised limits of a control, if the device supports it
    fn control_info(&self, id: ControlId) -> Option<ControlInfo>;
}
