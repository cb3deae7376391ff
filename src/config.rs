use crate::controls::ControlSet;
use crate::encoder::DEFAULT_QUEUE_SIZE;
use crate::error::Result;
use crate::frame::{StreamConfig, StreamType};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CampipeConfig {
    /// Bound of the JPEG encode queue
    #[serde(default = "default_jpeg_encoder_queue_size")]
    pub jpeg_encoder_queue_size: usize,

    /// Explicit RAW stream; the device default size is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_stream: Option<StreamConfig>,

    /// Output streams, configured after the RAW stream in this order
    #[serde(default = "default_streams")]
    pub streams: Vec<StreamConfig>,

    /// Controls applied to every request when capture starts
    #[serde(default)]
    pub controls: ControlSet,
}

impl CampipeConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default(
                "jpeg_encoder_queue_size",
                default_jpeg_encoder_queue_size() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // CAMPIPE__CONTROLS__JPEG_QUALITY=70 style overrides
            .add_source(
                Environment::with_prefix("CAMPIPE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: CampipeConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.jpeg_encoder_queue_size == 0 {
            return Err(ConfigError::Message(
                "JPEG encoder queue size must be greater than 0".to_string(),
            ));
        }

        if self.streams.is_empty() {
            return Err(ConfigError::Message(
                "At least one output stream must be configured".to_string(),
            ));
        }

        let raw = self.raw_stream.iter();
        for stream in raw.chain(self.streams.iter()) {
            if (stream.width == 0) != (stream.height == 0) {
                return Err(ConfigError::Message(format!(
                    "{} stream size {}x{} must set both width and height or neither",
                    stream.stream_type, stream.width, stream.height
                )));
            }

            if stream.stream_type == StreamType::Jpeg
                && (stream.width % 2 != 0 || stream.height % 2 != 0)
            {
                return Err(ConfigError::Message(format!(
                    "JPEG stream size {}x{} must have even dimensions",
                    stream.width, stream.height
                )));
            }
        }

        if let Some(raw) = &self.raw_stream {
            if raw.stream_type != StreamType::Raw {
                debug!(
                    "raw_stream declared as {}, it will be configured as raw",
                    raw.stream_type
                );
            }
        }

        self.controls
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl Default for CampipeConfig {
    fn default() -> Self {
        Self {
            jpeg_encoder_queue_size: default_jpeg_encoder_queue_size(),
            raw_stream: None,
            streams: default_streams(),
            controls: ControlSet::default(),
        }
    }
}

fn default_jpeg_encoder_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

fn default_streams() -> Vec<StreamConfig> {
    vec![StreamConfig::new(StreamType::Rgb, 1280, 720)]
}
