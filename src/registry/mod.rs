//! Stream configuration, buffer allocation and zero-copy mapping.

mod mapped;
#[cfg(all(test, feature = "simulator"))]
mod tests;

pub use mapped::MappedBuffer;

use crate::device::{
    BufferSlot, Camera, CameraConfiguration, CaptureRequest, ConfigurationStatus, FrameBuffer,
    Size, StreamId, StreamRole,
};
use crate::error::{DeviceError, Result, StreamError};
use crate::frame::{StreamConfig, StreamType};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Buffers per stream; also the number of requests in flight
pub const BUFFER_COUNT: u32 = 6;

/// Owns the stream layout, the device buffers and the reusable capture requests.
///
/// Every lookup is keyed by the small integer [`StreamId`] assigned at
/// configuration time, so the per-stream tables are plain vectors.
pub struct StreamRegistry {
    camera: Arc<dyn Camera>,
    configuration: Option<CameraConfiguration>,
    stream_types: Vec<StreamType>,
    buffers: Vec<Vec<FrameBuffer>>,
    mapped: Vec<Vec<Option<MappedBuffer>>>,
    requests: Vec<CaptureRequest>,
}

impl StreamRegistry {
    pub fn new(camera: Arc<dyn Camera>) -> Self {
        Self {
            camera,
            configuration: None,
            stream_types: Vec::new(),
            buffers: Vec::new(),
            mapped: Vec::new(),
            requests: Vec::new(),
        }
    }

    /// Configure the device streams: RAW first (explicit or default), then one
    /// still-capture stream per requested stream. Further RAW requests are dropped.
    pub fn configure(&mut self, raw_stream: Option<&StreamConfig>, streams: &[StreamConfig]) -> Result<()> {
        let raw = match raw_stream {
            Some(raw) => StreamConfig::new(StreamType::Raw, raw.width, raw.height),
            None => StreamConfig::default_raw(),
        };

        let mut requested = vec![raw];
        let mut roles = vec![StreamRole::Raw];
        for stream in streams {
            if stream.stream_type == StreamType::Raw {
                debug!("Skipping duplicate RAW stream request");
                continue;
            }
            roles.push(StreamRole::StillCapture);
            requested.push(*stream);
        }

        let mut configuration = self
            .camera
            .generate_configuration(&roles)
            .ok_or(StreamError::ConfigurationGeneration { roles: roles.len() })?;

        if configuration.len() != requested.len() {
            error!(
                "Camera returned {} stream configurations for {} roles",
                configuration.len(),
                requested.len()
            );
            return Err(StreamError::ConfigurationGeneration { roles: roles.len() }.into());
        }

        for (id, wanted) in requested.iter().enumerate() {
            if let Some(settings) = configuration.get_mut(id) {
                if wanted.width > 0 {
                    settings.size.width = wanted.width;
                }
                if wanted.height > 0 {
                    settings.size.height = wanted.height;
                }
                settings.buffer_count = BUFFER_COUNT;
                settings.pixel_format = wanted.stream_type.pixel_format();
            }
        }

        match self.camera.validate(&mut configuration) {
            ConfigurationStatus::Invalid => {
                error!("Invalid camera configuration after validation");
                return Err(StreamError::Validation.into());
            }
            ConfigurationStatus::Adjusted => {
                warn!("Camera adjusted the requested stream configuration");
            }
            ConfigurationStatus::Valid => {}
        }

        self.camera
            .configure(&configuration)
            .map_err(|source| StreamError::Apply { source })?;

        self.stream_types = requested.iter().map(|s| s.stream_type).collect();
        for (id, settings) in configuration.iter().enumerate() {
            info!(
                "Stream {} configured: {} {} {} x{} buffers",
                id,
                self.stream_types[id],
                settings.size,
                settings.pixel_format.fourcc(),
                settings.buffer_count
            );
        }

        self.configuration = Some(configuration);
        Ok(())
    }

    /// Allocate and map buffers for every stream and build one capture request
    /// per buffer index. On failure nothing stays allocated.
    pub fn allocate_buffers(&mut self) -> Result<()> {
        if self.configuration.is_none() {
            error!("Cannot allocate buffers before streams are configured");
            return Err(StreamError::NotConfigured.into());
        }
        if !self.requests.is_empty() || self.buffers.iter().any(|b| !b.is_empty()) {
            warn!("Buffers already allocated, releasing them first");
            self.free_buffers();
        }

        if let Err(e) = self.try_allocate() {
            error!("Buffer allocation failed: {}", e);
            self.free_buffers();
            return Err(e);
        }

        info!(
            "Allocated {} buffers for {} stream(s), {} requests ready",
            BUFFER_COUNT,
            self.stream_types.len(),
            self.requests.len()
        );
        Ok(())
    }

    fn try_allocate(&mut self) -> Result<()> {
        let configuration = self
            .configuration
            .as_ref()
            .ok_or(StreamError::NotConfigured)?;
        let stream_count = configuration.len();
        self.buffers = (0..stream_count).map(|_| Vec::new()).collect();
        self.mapped = (0..stream_count).map(|_| Vec::new()).collect();

        for (stream, settings) in configuration.iter().enumerate() {
            let buffers = self
                .camera
                .allocate(stream)
                .map_err(|source| StreamError::Allocation { stream, source })?;
            // Recorded before mapping so a mapping failure still frees the stream
            self.buffers[stream] = buffers;

            let stream_type = self.stream_types[stream];
            let mut mapped = Vec::with_capacity(self.buffers[stream].len());
            for (index, buffer) in self.buffers[stream].iter().enumerate() {
                let Some(len) = stream_type.mapped_size(settings.size.width, settings.size.height) else {
                    mapped.push(None);
                    continue;
                };
                let plane = buffer.planes.first().ok_or_else(|| StreamError::Mapping {
                    stream,
                    index,
                    details: "buffer has no planes".to_string(),
                })?;
                let region = MappedBuffer::map(plane, len).map_err(|e| StreamError::Mapping {
                    stream,
                    index,
                    details: e.to_string(),
                })?;
                mapped.push(Some(region));
            }
            self.mapped[stream] = mapped;
        }

        for index in 0..BUFFER_COUNT as usize {
            let mut request = self
                .camera
                .create_request(index as u64)
                .ok_or(StreamError::RequestCreation { index })?;

            for (stream, buffers) in self.buffers.iter().enumerate() {
                if index < buffers.len() {
                    request.add_buffer(stream, index);
                }
            }
            self.requests.push(request);
        }

        Ok(())
    }

    /// Unmap and release every buffer and drop the requests. Safe to call repeatedly.
    pub fn free_buffers(&mut self) {
        let mapped = self.mapped.iter().flatten().filter(|m| m.is_some()).count();
        self.mapped.clear();

        for (stream, buffers) in self.buffers.iter().enumerate() {
            if !buffers.is_empty() {
                self.camera.free(stream);
            }
        }
        self.buffers.clear();
        self.requests.clear();

        if mapped > 0 {
            debug!("Released {} mapped buffers", mapped);
        }
    }

    /// Move every prepared request into the device queue
    pub fn queue_requests(&mut self) -> std::result::Result<usize, DeviceError> {
        let mut queued = 0;
        for request in self.requests.drain(..) {
            self.camera.queue_request(request)?;
            queued += 1;
        }
        debug!("Queued {} capture requests", queued);
        Ok(queued)
    }

    /// Stream type by handle; unknown handles are treated as RAW and never delivered
    pub fn stream_type(&self, stream: StreamId) -> StreamType {
        self.stream_types
            .get(stream)
            .copied()
            .unwrap_or(StreamType::Raw)
    }

    pub fn stream_count(&self) -> usize {
        self.stream_types.len()
    }

    pub fn configuration(&self) -> Option<&CameraConfiguration> {
        self.configuration.as_ref()
    }

    pub fn buffer(&self, stream: StreamId, index: usize) -> Option<&FrameBuffer> {
        self.buffers.get(stream)?.get(index)
    }

    /// Mapped bytes of a buffer, `None` for RAW or unknown buffers
    pub fn mapped_data(&self, slot: BufferSlot) -> Option<&[u8]> {
        self.mapped
            .get(slot.stream)?
            .get(slot.index)?
            .as_ref()
            .map(MappedBuffer::as_slice)
    }

    pub fn mapped_len(&self, slot: BufferSlot) -> usize {
        self.mapped_data(slot).map(<[u8]>::len).unwrap_or(0)
    }

    /// Dimensions the device accepted for a stream
    pub fn stream_size(&self, stream: StreamId) -> Option<Size> {
        self.configuration.as_ref()?.get(stream).map(|settings| settings.size)
    }

    pub fn requests(&self) -> &[CaptureRequest] {
        &self.requests
    }

    pub fn requests_mut(&mut self) -> &mut [CaptureRequest] {
        &mut self.requests
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        self.free_buffers();
    }
}
