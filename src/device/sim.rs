//! In-process camera that behaves like a hardware backend.
//!
//! Buffers are anonymous memory files so the registry maps them through the
//! same mmap path it uses for real dma-buf planes. Completions are produced
//! either on demand (`complete_next`) or by a free-running thread.

use super::{
    Camera, CameraConfiguration, CameraManager, CaptureRequest, ConfigurationStatus, FrameBuffer,
    FramePlane, PixelFormat, Size, StreamConfiguration, StreamId, StreamRole,
};
use crate::controls::{ControlId, ControlInfo, ControlList, ControlValue};
use crate::error::DeviceError;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd};
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const MAX_BUFFERS: u32 = 16;
const DEFAULT_SENSOR: Size = Size {
    width: 4608,
    height: 2592,
};
const DEFAULT_RAW: Size = Size {
    width: 2304,
    height: 1296,
};
const DEFAULT_OUTPUT: Size = Size {
    width: 1920,
    height: 1080,
};

/// Failure points that can be switched on for testing error paths
#[derive(Debug, Clone, Default)]
pub struct SimulatedFaults {
    pub reject_configuration: bool,
    pub fail_configure: bool,
    pub fail_allocation: bool,
    pub fail_start: bool,
}

/// Camera manager over a fixed list of simulated cameras
pub struct SimulatedCameraManager {
    cameras: Vec<Arc<SimulatedCamera>>,
    unavailable: bool,
}

impl SimulatedCameraManager {
    pub fn new(cameras: Vec<Arc<SimulatedCamera>>) -> Self {
        Self {
            cameras,
            unavailable: false,
        }
    }

    pub fn single(camera: Arc<SimulatedCamera>) -> Self {
        Self::new(vec![camera])
    }

    /// Manager whose service never comes up
    pub fn unavailable() -> Self {
        Self {
            cameras: Vec::new(),
            unavailable: true,
        }
    }
}

impl CameraManager for SimulatedCameraManager {
    fn start(&self) -> Result<(), DeviceError> {
        if self.unavailable {
            return Err(DeviceError::ServiceUnavailable {
                details: "simulated camera service is down".to_string(),
            });
        }
        debug!("Simulated camera manager started with {} camera(s)", self.cameras.len());
        Ok(())
    }

    fn cameras(&self) -> Vec<Arc<dyn Camera>> {
        self.cameras
            .iter()
            .map(|camera| Arc::clone(camera) as Arc<dyn Camera>)
            .collect()
    }
}

struct SimBuffer {
    file: File,
    length: usize,
}

#[derive(Default)]
struct SimState {
    acquired: bool,
    running: bool,
    configuration: Option<CameraConfiguration>,
    buffers: Vec<Vec<SimBuffer>>,
    queue: VecDeque<CaptureRequest>,
    subscriber: Option<Sender<CaptureRequest>>,
    sequence: u32,
    start_controls: Option<ControlList>,
    completed_controls: Vec<ControlList>,
}

struct Inner {
    id: String,
    sensor: Size,
    epoch: Instant,
    free_running: AtomicBool,
    state: Mutex<SimState>,
}

impl Inner {
    fn complete_next(&self) -> bool {
        let (request, subscriber) = {
            let mut state = self.state.lock();
            if !state.running {
                return false;
            }
            let Some(mut request) = state.queue.pop_front() else {
                return false;
            };

            let sequence = state.sequence;
            state.sequence = state.sequence.wrapping_add(1);
            let timestamp = self.epoch.elapsed().as_nanos() as u64;

            if let Err(e) = fill_buffers(&state, &request, sequence) {
                warn!("Simulated camera {} failed to fill buffers: {}", self.id, e);
            }

            request.complete(sequence, timestamp);
            state.completed_controls.push(request.controls().clone());
            trace!(
                "Simulated camera {} completed request {} (sequence {})",
                self.id,
                request.cookie(),
                sequence
            );
            (request, state.subscriber.clone())
        };

        match subscriber {
            Some(tx) => tx.send(request).is_ok(),
            None => false,
        }
    }

    fn cancel_next(&self) -> bool {
        let (request, subscriber) = {
            let mut state = self.state.lock();
            let Some(mut request) = state.queue.pop_front() else {
                return false;
            };
            request.cancel();
            (request, state.subscriber.clone())
        };

        match subscriber {
            Some(tx) => tx.send(request).is_ok(),
            None => false,
        }
    }
}

/// Write a per-frame byte pattern into every non-Bayer buffer of the request
fn fill_buffers(state: &SimState, request: &CaptureRequest, sequence: u32) -> io::Result<()> {
    let Some(configuration) = &state.configuration else {
        return Ok(());
    };
    let pattern = (sequence % 251) as u8;

    for slot in request.buffers() {
        let is_bayer = configuration
            .get(slot.stream)
            .map(|s| s.pixel_format == PixelFormat::Sbggr10)
            .unwrap_or(true);
        if is_bayer {
            continue;
        }
        if let Some(buffer) = state.buffers.get(slot.stream).and_then(|b| b.get(slot.index)) {
            buffer.file.write_all_at(&vec![pattern; buffer.length], 0)?;
        }
    }
    Ok(())
}

fn memfd_buffer(length: usize) -> io::Result<File> {
    // SAFETY: the name is a valid NUL-terminated string and the returned fd is
    // owned by the File below.
    let fd = unsafe { libc::memfd_create(c"campipe-sim".as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let file = unsafe { File::from_raw_fd(fd) };
    file.set_len(length as u64)?;
    Ok(file)
}

/// Simulated camera device
pub struct SimulatedCamera {
    inner: Arc<Inner>,
    faults: SimulatedFaults,
    frame_interval: Option<Duration>,
    free_run: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedCamera {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                sensor: DEFAULT_SENSOR,
                epoch: Instant::now(),
                free_running: AtomicBool::new(false),
                state: Mutex::new(SimState::default()),
            }),
            faults: SimulatedFaults::default(),
            frame_interval: None,
            free_run: Mutex::new(None),
        }
    }

    pub fn with_faults(mut self, faults: SimulatedFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Complete queued requests on a background thread at this interval once started
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Complete the oldest queued request. Returns false if nothing was delivered.
    pub fn complete_next(&self) -> bool {
        self.inner.complete_next()
    }

    /// Return the oldest queued request as cancelled
    pub fn cancel_next(&self) -> bool {
        self.inner.cancel_next()
    }

    pub fn queued_requests(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_acquired(&self) -> bool {
        self.inner.state.lock().acquired
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.state.lock().subscriber.is_some()
    }

    pub fn allocated_buffers(&self, stream: StreamId) -> usize {
        self.inner
            .state
            .lock()
            .buffers
            .get(stream)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Configuration applied by the last successful `configure`
    pub fn configuration(&self) -> Option<CameraConfiguration> {
        self.inner.state.lock().configuration.clone()
    }

    /// Controls passed to `start`
    pub fn start_controls(&self) -> Option<ControlList> {
        self.inner.state.lock().start_controls.clone()
    }

    /// Control lists carried by every completed request, in completion order
    pub fn completed_controls(&self) -> Vec<ControlList> {
        self.inner.state.lock().completed_controls.clone()
    }

    fn stop_free_run(&self) {
        self.inner.free_running.store(false, Ordering::Release);
        if let Some(handle) = self.free_run.lock().take() {
            if handle.join().is_err() {
                warn!("Simulated camera {} frame thread panicked", self.inner.id);
            }
        }
    }
}

impl Camera for SimulatedCamera {
    fn id(&self) -> String {
        self.inner.id.clone()
    }

    fn acquire(&self) -> Result<(), DeviceError> {
        let mut state = self.inner.state.lock();
        if state.acquired {
            return Err(DeviceError::Busy {
                id: self.inner.id.clone(),
            });
        }
        state.acquired = true;
        Ok(())
    }

    fn release(&self) {
        self.inner.state.lock().acquired = false;
    }

    fn generate_configuration(&self, roles: &[StreamRole]) -> Option<CameraConfiguration> {
        if roles.is_empty() || self.faults.reject_configuration {
            return None;
        }

        let streams = roles
            .iter()
            .map(|role| {
                let (pixel_format, size) = match role {
                    StreamRole::Raw => (PixelFormat::Sbggr10, DEFAULT_RAW),
                    StreamRole::StillCapture => (PixelFormat::Yuv420, DEFAULT_OUTPUT),
                };
                StreamConfiguration {
                    role: *role,
                    pixel_format,
                    size,
                    stride: pixel_format.stride(size.width),
                    buffer_count: 1,
                }
            })
            .collect();

        Some(CameraConfiguration::new(streams))
    }

    fn validate(&self, config: &mut CameraConfiguration) -> ConfigurationStatus {
        if config.is_empty() {
            return ConfigurationStatus::Invalid;
        }

        let mut status = ConfigurationStatus::Valid;
        for stream in config.iter_mut() {
            let Size { width, height } = stream.size;
            if width == 0
                || height == 0
                || width > self.inner.sensor.width
                || height > self.inner.sensor.height
            {
                return ConfigurationStatus::Invalid;
            }

            if stream.pixel_format == PixelFormat::Yuv420 && (width % 2 != 0 || height % 2 != 0) {
                stream.size = Size::new(width & !1, height & !1);
                status = ConfigurationStatus::Adjusted;
            }

            if stream.buffer_count == 0 || stream.buffer_count > MAX_BUFFERS {
                stream.buffer_count = stream.buffer_count.clamp(1, MAX_BUFFERS);
                status = ConfigurationStatus::Adjusted;
            }

            let stride = stream.pixel_format.stride(stream.size.width);
            if stream.stride != stride {
                stream.stride = stride;
                status = ConfigurationStatus::Adjusted;
            }
        }
        status
    }

    fn configure(&self, config: &CameraConfiguration) -> Result<(), DeviceError> {
        if self.faults.fail_configure {
            return Err(DeviceError::Rejected {
                details: "simulated configure failure".to_string(),
            });
        }

        let mut state = self.inner.state.lock();
        if !state.acquired {
            return Err(DeviceError::NotAcquired);
        }
        if state.running {
            return Err(DeviceError::Rejected {
                details: "cannot configure a running camera".to_string(),
            });
        }

        state.buffers = (0..config.len()).map(|_| Vec::new()).collect();
        state.configuration = Some(config.clone());
        info!("Simulated camera {} configured with {} stream(s)", self.inner.id, config.len());
        Ok(())
    }

    fn allocate(&self, stream: StreamId) -> Result<Vec<FrameBuffer>, DeviceError> {
        if self.faults.fail_allocation {
            return Err(DeviceError::Allocation {
                details: "simulated allocation failure".to_string(),
            });
        }

        let mut state = self.inner.state.lock();
        let settings = state
            .configuration
            .as_ref()
            .ok_or(DeviceError::NotConfigured)?
            .get(stream)
            .cloned()
            .ok_or_else(|| DeviceError::Rejected {
                details: format!("unknown stream {}", stream),
            })?;

        let length = settings
            .pixel_format
            .frame_size(settings.size.width, settings.size.height);

        let mut sim_buffers = Vec::with_capacity(settings.buffer_count as usize);
        for _ in 0..settings.buffer_count {
            sim_buffers.push(SimBuffer {
                file: memfd_buffer(length)?,
                length,
            });
        }

        let frame_buffers = sim_buffers
            .iter()
            .map(|buffer| FrameBuffer {
                planes: vec![FramePlane {
                    fd: buffer.file.as_raw_fd(),
                    offset: 0,
                    length: buffer.length,
                }],
            })
            .collect();

        debug!(
            "Simulated camera {} allocated {} x {} byte buffers for stream {}",
            self.inner.id, settings.buffer_count, length, stream
        );

        if let Some(slot) = state.buffers.get_mut(stream) {
            *slot = sim_buffers;
        }
        Ok(frame_buffers)
    }

    fn free(&self, stream: StreamId) {
        if let Some(buffers) = self.inner.state.lock().buffers.get_mut(stream) {
            buffers.clear();
        }
    }

    fn start(&self, controls: &ControlList) -> Result<(), DeviceError> {
        if self.faults.fail_start {
            return Err(DeviceError::Rejected {
                details: "simulated start failure".to_string(),
            });
        }

        {
            let mut state = self.inner.state.lock();
            if state.configuration.is_none() {
                return Err(DeviceError::NotConfigured);
            }
            state.running = true;
            state.start_controls = Some(controls.clone());
        }

        if let Some(interval) = self.frame_interval {
            self.inner.free_running.store(true, Ordering::Release);
            let inner = Arc::clone(&self.inner);
            let handle = thread::Builder::new()
                .name("campipe-sim".to_string())
                .spawn(move || {
                    while inner.free_running.load(Ordering::Acquire) {
                        thread::sleep(interval);
                        inner.complete_next();
                    }
                })?;
            *self.free_run.lock() = Some(handle);
        }

        info!("Simulated camera {} started", self.inner.id);
        Ok(())
    }

    fn stop(&self) {
        self.stop_free_run();

        let (cancelled, subscriber) = {
            let mut state = self.inner.state.lock();
            state.running = false;
            let cancelled: Vec<CaptureRequest> = state.queue.drain(..).collect();
            (cancelled, state.subscriber.clone())
        };

        debug!(
            "Simulated camera {} stopped, returning {} request(s) cancelled",
            self.inner.id,
            cancelled.len()
        );

        for mut request in cancelled {
            request.cancel();
            if let Some(tx) = &subscriber {
                let _ = tx.send(request);
            }
        }
    }

    fn queue_request(&self, request: CaptureRequest) -> Result<(), DeviceError> {
        let mut state = self.inner.state.lock();
        if !state.running {
            return Err(DeviceError::NotRunning);
        }
        state.queue.push_back(request);
        Ok(())
    }

    fn subscribe(&self) -> Receiver<CaptureRequest> {
        let (tx, rx) = unbounded();
        self.inner.state.lock().subscriber = Some(tx);
        rx
    }

    fn unsubscribe(&self) {
        self.inner.state.lock().subscriber = None;
    }

    fn control_info(&self, id: ControlId) -> Option<ControlInfo> {
        match id {
            ControlId::ExposureTime => Some(ControlInfo {
                min: ControlValue::I32(26),
                max: ControlValue::I32(1_000_000),
                default: ControlValue::I32(20_000),
            }),
            ControlId::AnalogueGain => Some(ControlInfo {
                min: ControlValue::F32(1.0),
                max: ControlValue::F32(16.0),
                default: ControlValue::F32(1.0),
            }),
            ControlId::LensPosition => Some(ControlInfo {
                min: ControlValue::F32(0.0),
                max: ControlValue::F32(15.0),
                default: ControlValue::F32(1.0),
            }),
            _ => None,
        }
    }
}

impl Drop for SimulatedCamera {
    fn drop(&mut self) {
        self.stop_free_run();
    }
}
