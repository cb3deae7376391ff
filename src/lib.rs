pub mod config;
pub mod controls;
pub mod device;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod orchestrator;
pub mod registry;

pub use config::CampipeConfig;
pub use controls::{
    AfMode, AfTrigger, AwbMode, Capabilities, ControlPipeline, ControlRange, ControlSet,
    ExposureMode,
};
pub use encoder::{AsyncEncoder, BlockEncoder, EncoderStatsSnapshot, JpegCodec};
pub use error::{CameraError, CampipeError, DeviceError, EncoderError, Result, StreamError};
pub use frame::{
    error_callback, frame_callback, ErrorCallback, Frame, FrameCallback, FrameOwner,
    StreamConfig, StreamType,
};
pub use orchestrator::{CaptureOrchestrator, CaptureStatsSnapshot, CodecFactory};
pub use registry::StreamRegistry;
