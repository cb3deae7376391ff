//! Camera ownership, lifecycle and the completion hot path.

mod dispatch;
#[cfg(all(test, feature = "simulator"))]
mod tests;

use crate::config::CampipeConfig;
use crate::controls::{Capabilities, ControlList, ControlPipeline, ControlSet};
use crate::device::{Camera, CameraManager};
use crate::encoder::{AsyncEncoder, BlockEncoder, EncoderStatsSnapshot, JpegCodec};
use crate::error::{CameraError, CampipeError, Result};
use crate::frame::{ErrorCallback, FrameCallback};
use crate::registry::StreamRegistry;
use dispatch::Dispatcher;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Frame rate used when the initial controls leave it unset
pub const DEFAULT_TARGET_FPS: i32 = 30;
/// JPEG quality used when the initial controls leave it unset
pub const DEFAULT_JPEG_QUALITY: i32 = 85;

/// Builds the block encoder handed to each new encode worker
pub type CodecFactory = Box<dyn Fn() -> Box<dyn BlockEncoder> + Send + Sync>;

/// Counters for the completion hot path
#[derive(Debug, Default)]
pub struct CaptureStats {
    /// Completed requests handled
    pub completed: AtomicU64,
    /// Cancelled completions ignored
    pub cancelled: AtomicU64,
    /// RGB frames handed to the frame callback
    pub rgb_delivered: AtomicU64,
    /// JPEG frames accepted by the encoder
    pub jpeg_submitted: AtomicU64,
    /// Buffers dropped because no mapping was found
    pub missing_data: AtomicU64,
    /// Requests the device refused to take back
    pub requeue_failures: AtomicU64,
}

impl CaptureStats {
    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            rgb_delivered: self.rgb_delivered.load(Ordering::Relaxed),
            jpeg_submitted: self.jpeg_submitted.load(Ordering::Relaxed),
            missing_data: self.missing_data.load(Ordering::Relaxed),
            requeue_failures: self.requeue_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureStatsSnapshot {
    pub completed: u64,
    pub cancelled: u64,
    pub rgb_delivered: u64,
    pub jpeg_submitted: u64,
    pub missing_data: u64,
    pub requeue_failures: u64,
}

/// Components built by `initialize`, alive until `stop` releases the camera
struct Session {
    camera: Arc<dyn Camera>,
    registry: Arc<RwLock<StreamRegistry>>,
    controls: Arc<ControlPipeline>,
    encoder: Arc<AsyncEncoder>,
}

/// Owns the camera and wires the registry, control pipeline and encoder together.
///
/// Lifecycle: [`initialize`](Self::initialize) acquires and configures the
/// first camera, [`start`](Self::start) allocates buffers and begins capture,
/// [`stop`](Self::stop) tears everything down and releases the camera. Frames
/// are delivered from a dedicated dispatcher thread (RGB) and from the encoder
/// worker thread (JPEG).
pub struct CaptureOrchestrator {
    manager: Arc<dyn CameraManager>,
    codec_factory: CodecFactory,
    session: Option<Session>,
    pending: Arc<Mutex<Option<ControlSet>>>,
    jpeg_quality: Arc<AtomicI32>,
    initial_controls: ControlSet,
    dispatcher: Option<JoinHandle<()>>,
    running: bool,
    last_error: Mutex<Option<String>>,
    stats: Arc<CaptureStats>,
}

impl CaptureOrchestrator {
    pub fn new(manager: Arc<dyn CameraManager>) -> Self {
        Self::with_codec(
            manager,
            Box::new(|| Box::new(JpegCodec::new()) as Box<dyn BlockEncoder>),
        )
    }

    /// Orchestrator whose encoder uses codecs from `codec_factory`
    pub fn with_codec(manager: Arc<dyn CameraManager>, codec_factory: CodecFactory) -> Self {
        Self {
            manager,
            codec_factory,
            session: None,
            pending: Arc::new(Mutex::new(None)),
            jpeg_quality: Arc::new(AtomicI32::new(DEFAULT_JPEG_QUALITY)),
            initial_controls: ControlSet::default(),
            dispatcher: None,
            running: false,
            last_error: Mutex::new(None),
            stats: Arc::new(CaptureStats::default()),
        }
    }

    /// Acquire the first camera and configure its streams from `config`
    pub fn initialize(&mut self, config: &CampipeConfig) -> Result<()> {
        if self.session.is_some() {
            warn!("Re-initializing, releasing the current camera first");
            self.shutdown();
        }

        let result = self.try_initialize(config);
        self.record(result)
    }

    fn try_initialize(&mut self, config: &CampipeConfig) -> Result<()> {
        config.controls.validate()?;

        self.manager
            .start()
            .map_err(|source| CameraError::ServiceUnavailable { source })?;

        let camera = self
            .manager
            .cameras()
            .into_iter()
            .next()
            .ok_or(CameraError::NoCameraFound)?;

        camera
            .acquire()
            .map_err(|source| CameraError::Busy { source })?;
        info!("Acquired camera {}", camera.id());

        let mut registry = StreamRegistry::new(Arc::clone(&camera));
        if let Err(e) = registry.configure(config.raw_stream.as_ref(), &config.streams) {
            drop(registry);
            camera.release();
            return Err(e);
        }

        let controls = Arc::new(ControlPipeline::new(Arc::clone(&camera)));
        let encoder = Arc::new(AsyncEncoder::new(
            (self.codec_factory)(),
            config.jpeg_encoder_queue_size,
        ));

        self.initial_controls = config.controls.clone();
        self.session = Some(Session {
            camera,
            registry: Arc::new(RwLock::new(registry)),
            controls,
            encoder,
        });

        info!(
            "Capture pipeline initialized with {} stream(s)",
            config.streams.len()
        );
        Ok(())
    }

    /// Allocate buffers, start the device and begin delivering frames.
    ///
    /// Start-up failures are reported through `error_callback` as well as the
    /// returned error; nothing is left running when this fails.
    pub fn start(&mut self, frame_callback: FrameCallback, error_callback: ErrorCallback) -> Result<()> {
        if self.running {
            debug!("Capture already running");
            return Ok(());
        }

        let result = self.try_start(frame_callback);
        if let Err(e) = &result {
            error_callback(&e.to_string());
        }
        self.record(result)
    }

    fn try_start(&mut self, frame_callback: FrameCallback) -> Result<()> {
        let session = self.session.as_ref().ok_or(CampipeError::NotInitialized)?;
        let camera = Arc::clone(&session.camera);
        let registry = Arc::clone(&session.registry);
        let controls = Arc::clone(&session.controls);
        let encoder = Arc::clone(&session.encoder);

        registry.write().allocate_buffers()?;

        if let Err(e) = encoder.start() {
            registry.write().free_buffers();
            return Err(e.into());
        }

        let completions = camera.subscribe();

        if let Err(e) = camera.start(&ControlList::new()) {
            error!("Failed to start camera: {}", e);
            camera.unsubscribe();
            encoder.stop();
            registry.write().free_buffers();
            return Err(e.into());
        }

        let mut initial = ControlSet {
            target_fps: Some(DEFAULT_TARGET_FPS),
            jpeg_quality: Some(DEFAULT_JPEG_QUALITY),
            ..ControlSet::default()
        };
        initial.merge(&self.initial_controls);

        for request in registry.write().requests_mut() {
            controls.apply_controls(&initial, request);
        }
        self.jpeg_quality.store(
            initial.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            Ordering::Relaxed,
        );

        let dispatcher = Dispatcher {
            camera: Arc::clone(&camera),
            registry: Arc::clone(&registry),
            controls,
            encoder: Arc::clone(&encoder),
            pending: Arc::clone(&self.pending),
            jpeg_quality: Arc::clone(&self.jpeg_quality),
            frame_callback,
            stats: Arc::clone(&self.stats),
        };
        let spawned = thread::Builder::new()
            .name("campipe-dispatch".to_string())
            .spawn(move || dispatcher.run(completions));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                camera.unsubscribe();
                camera.stop();
                encoder.stop();
                registry.write().free_buffers();
                return Err(e.into());
            }
        };
        self.dispatcher = Some(handle);
        self.running = true;

        let queued = registry.write().queue_requests();
        match queued {
            Ok(count) => {
                info!("Capture started with {} requests in flight", count);
                Ok(())
            }
            Err(e) => {
                error!("Failed to queue capture requests: {}", e);
                self.stop();
                Err(e.into())
            }
        }
    }

    /// Stop capture and release the camera. No-op when not running.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        if let Some(session) = self.session.take() {
            session.camera.unsubscribe();
            if let Some(handle) = self.dispatcher.take() {
                if handle.join().is_err() {
                    error!("Capture dispatcher panicked");
                }
            }
            session.camera.stop();
            session.encoder.stop();
            session.registry.write().free_buffers();
            session.camera.release();
            info!("Capture stopped, camera {} released", session.camera.id());
        }
    }

    /// Stop if running, then release a camera that was initialized but never started
    fn shutdown(&mut self) {
        self.stop();
        if let Some(session) = self.session.take() {
            session.registry.write().free_buffers();
            session.camera.release();
            debug!("Released camera {}", session.camera.id());
        }
    }

    /// Stash a control delta for the next completed request.
    ///
    /// JPEG quality takes effect for the next encoded frame immediately; the
    /// other controls reach the device one capture cycle later.
    pub fn set_controls(&self, controls: ControlSet) -> Result<()> {
        let result = controls.validate();
        self.record(result)?;

        if let Some(quality) = controls.jpeg_quality {
            self.jpeg_quality.store(quality, Ordering::Relaxed);
        }

        let mut pending = self.pending.lock();
        match pending.as_mut() {
            Some(existing) => existing.merge(&controls),
            None => *pending = Some(controls),
        }
        Ok(())
    }

    /// Last values applied to a request
    pub fn controls(&self) -> Result<ControlSet> {
        let session = self.session.as_ref().ok_or(CampipeError::NotInitialized)?;
        Ok(session.controls.current_controls())
    }

    pub fn capabilities(&self) -> Result<Capabilities> {
        let session = self.session.as_ref().ok_or(CampipeError::NotInitialized)?;
        Ok(session.controls.capabilities())
    }

    /// Message of the most recent failed operation
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// JPEG quality the encoder uses for the next frame
    pub fn jpeg_quality(&self) -> i32 {
        self.jpeg_quality.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CaptureStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn encoder_stats(&self) -> Option<EncoderStatsSnapshot> {
        self.session.as_ref().map(|s| s.encoder.stats())
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            error!("{}", e);
            *self.last_error.lock() = Some(e.to_string());
        }
        result
    }
}

impl Drop for CaptureOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
