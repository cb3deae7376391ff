use super::StreamId;
use crate::controls::ControlList;

/// Buffer attached to a request, addressed by stream and buffer index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferSlot {
    pub stream: StreamId,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Complete,
    Cancelled,
}

/// Metadata filled in by the device on completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    /// Start of exposure in nanoseconds
    pub sensor_timestamp: Option<u64>,
}

/// Reusable bundle of one buffer per active stream.
///
/// Requests circulate by value: queuing moves the request into the device,
/// completion moves it back out through the subscription channel.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    cookie: u64,
    buffers: Vec<BufferSlot>,
    controls: ControlList,
    metadata: RequestMetadata,
    status: RequestStatus,
    sequence: u32,
}

impl CaptureRequest {
    pub fn new(cookie: u64) -> Self {
        Self {
            cookie,
            buffers: Vec::new(),
            controls: ControlList::new(),
            metadata: RequestMetadata::default(),
            status: RequestStatus::Pending,
            sequence: 0,
        }
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    /// Attach a buffer, replacing any buffer already attached for that stream
    pub fn add_buffer(&mut self, stream: StreamId, index: usize) {
        let slot = BufferSlot { stream, index };
        match self.buffers.iter_mut().find(|b| b.stream == stream) {
            Some(existing) => *existing = slot,
            None => self.buffers.push(slot),
        }
    }

    pub fn buffers(&self) -> &[BufferSlot] {
        &self.buffers
    }

    pub fn buffer(&self, stream: StreamId) -> Option<BufferSlot> {
        self.buffers.iter().copied().find(|b| b.stream == stream)
    }

    pub fn controls(&self) -> &ControlList {
        &self.controls
    }

    pub fn controls_mut(&mut self) -> &mut ControlList {
        &mut self.controls
    }

    pub fn metadata(&self) -> &RequestMetadata {
        &self.metadata
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Called by a device when the exposure for this request finished
    pub fn complete(&mut self, sequence: u32, sensor_timestamp: u64) {
        self.status = RequestStatus::Complete;
        self.sequence = sequence;
        self.metadata.sensor_timestamp = Some(sensor_timestamp);
    }

    /// Called by a device when the request is returned without being captured
    pub fn cancel(&mut self) {
        self.status = RequestStatus::Cancelled;
    }

    /// Make the request ready to queue again, keeping its buffers
    pub fn reuse(&mut self) {
        self.status = RequestStatus::Pending;
        self.controls.clear();
        self.metadata = RequestMetadata::default();
        self.sequence = 0;
    }
}
