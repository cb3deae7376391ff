use thiserror::Error;

#[derive(Error, Debug)]
pub enum CampipeError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Invalid control {control}: {reason}")]
    InvalidControl {
        control: &'static str,
        reason: String,
    },

    #[error("Camera pipeline is not initialized")]
    NotInitialized,
}

impl CampipeError {
    pub fn invalid_control<S: Into<String>>(control: &'static str, reason: S) -> Self {
        Self::InvalidControl {
            control,
            reason: reason.into(),
        }
    }
}

/// Failures while taking ownership of a camera. All of them are fatal at init.
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to start camera manager. Check if camera service is running.")]
    ServiceUnavailable {
        #[source]
        source: DeviceError,
    },

    #[error("No cameras found. Verify camera is connected and drivers are loaded.")]
    NoCameraFound,

    #[error("Failed to acquire camera. Camera may be in use by another process.")]
    Busy {
        #[source]
        source: DeviceError,
    },
}

/// Failures of the stream configuration and buffer lifecycle steps.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("streams are not configured")]
    NotConfigured,

    #[error("failed to generate camera configuration for {roles} stream roles")]
    ConfigurationGeneration { roles: usize },

    #[error("invalid camera configuration after validation")]
    Validation,

    #[error("failed to apply camera configuration: {source}")]
    Apply {
        #[source]
        source: DeviceError,
    },

    #[error("failed to allocate buffers for stream {stream}: {source}")]
    Allocation {
        stream: usize,
        #[source]
        source: DeviceError,
    },

    #[error("failed to map buffer {index} of stream {stream}: {details}")]
    Mapping {
        stream: usize,
        index: usize,
        details: String,
    },

    #[error("failed to create capture request {index}")]
    RequestCreation { index: usize },
}

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("encoder is not running")]
    NotRunning,

    #[error("frame too short for {width}x{height} YUV420: expected {expected} bytes, got {actual}")]
    ShortFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("YUV 4:2:0 frame needs even dimensions, got {width}x{height}")]
    OddDimensions { width: u32, height: u32 },

    #[error("JPEG encoding failed: {details}")]
    Codec { details: String },

    #[error("encoder worker is unavailable")]
    WorkerUnavailable,

    #[error("failed to spawn encoder thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors reported by a camera hardware layer.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("camera service unavailable: {details}")]
    ServiceUnavailable { details: String },

    #[error("camera {id} is already acquired")]
    Busy { id: String },

    #[error("camera is not acquired")]
    NotAcquired,

    #[error("camera is not configured")]
    NotConfigured,

    #[error("camera is not running")]
    NotRunning,

    #[error("buffer allocation failed: {details}")]
    Allocation { details: String },

    #[error("device rejected operation: {details}")]
    Rejected { details: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CampipeError>;
