use super::*;
use crate::controls::{ControlId, ControlValue};
use crate::device::sim::{SimulatedCamera, SimulatedCameraManager, SimulatedFaults};
use crate::encoder::YuvPlanes;
use crate::error::{EncoderError, StreamError};
use crate::frame::{error_callback, frame_callback, StreamConfig, StreamType};
use crossbeam::channel::{unbounded, Receiver};
use std::sync::atomic::AtomicUsize;
use std::time::{Duration, Instant};

type Delivery = (StreamType, usize, u32, bool);

/// Records input size and quality, returns a fixed marker
struct RecordingCodec {
    input_len: Arc<AtomicUsize>,
    quality: Arc<AtomicI32>,
}

impl BlockEncoder for RecordingCodec {
    fn compress(
        &mut self,
        planes: &YuvPlanes<'_>,
        quality: i32,
        output: &mut [u8],
    ) -> std::result::Result<usize, EncoderError> {
        self.input_len.store(
            planes.y.len() + planes.u.len() + planes.v.len(),
            Ordering::SeqCst,
        );
        self.quality.store(quality, Ordering::SeqCst);
        output[..2].copy_from_slice(&[0xFF, 0xD8]);
        Ok(2)
    }
}

/// Reports the dimensions of every frame it compresses
struct SizeRecordingCodec {
    sizes: crossbeam::channel::Sender<(u32, u32)>,
}

impl BlockEncoder for SizeRecordingCodec {
    fn compress(
        &mut self,
        planes: &YuvPlanes<'_>,
        _quality: i32,
        output: &mut [u8],
    ) -> std::result::Result<usize, EncoderError> {
        let _ = self.sizes.send((planes.width, planes.height));
        output[..2].copy_from_slice(&[0xFF, 0xD8]);
        Ok(2)
    }
}

fn create_test_camera() -> Arc<SimulatedCamera> {
    Arc::new(SimulatedCamera::new("sim-orchestrator"))
}

fn create_test_orchestrator(camera: &Arc<SimulatedCamera>) -> CaptureOrchestrator {
    let manager = SimulatedCameraManager::single(Arc::clone(camera));
    CaptureOrchestrator::new(Arc::new(manager))
}

fn config_with(streams: Vec<StreamConfig>) -> CampipeConfig {
    CampipeConfig {
        streams,
        ..CampipeConfig::default()
    }
}

fn recording_callback() -> (FrameCallback, Receiver<Delivery>) {
    let (tx, rx) = unbounded();
    let callback = frame_callback(move |stream_type, frame| {
        let _ = tx.send((stream_type, frame.len(), frame.sequence(), frame.is_zero_copy()));
    });
    (callback, rx)
}

fn recording_error_callback() -> (ErrorCallback, Receiver<String>) {
    let (tx, rx) = unbounded();
    let callback = error_callback(move |message| {
        let _ = tx.send(message.to_string());
    });
    (callback, rx)
}

fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn start_rgb(camera: &Arc<SimulatedCamera>, width: u32, height: u32) -> (CaptureOrchestrator, Receiver<Delivery>) {
    let mut orchestrator = create_test_orchestrator(camera);
    orchestrator
        .initialize(&config_with(vec![StreamConfig::new(StreamType::Rgb, width, height)]))
        .unwrap();
    let (callback, frames) = recording_callback();
    let (errors, _) = recording_error_callback();
    orchestrator.start(callback, errors).unwrap();
    (orchestrator, frames)
}

#[test]
fn test_initialize_reports_service_unavailable() {
    let mut orchestrator = CaptureOrchestrator::new(Arc::new(SimulatedCameraManager::unavailable()));

    let result = orchestrator.initialize(&CampipeConfig::default());
    assert!(matches!(
        result,
        Err(CampipeError::Camera(CameraError::ServiceUnavailable { .. }))
    ));
    assert!(orchestrator
        .last_error()
        .unwrap()
        .contains("Check if camera service is running"));
}

#[test]
fn test_initialize_reports_missing_camera() {
    let mut orchestrator = CaptureOrchestrator::new(Arc::new(SimulatedCameraManager::new(Vec::new())));

    let result = orchestrator.initialize(&CampipeConfig::default());
    assert!(matches!(result, Err(CampipeError::Camera(CameraError::NoCameraFound))));
    assert!(orchestrator.last_error().unwrap().contains("No cameras found"));
}

#[test]
fn test_initialize_reports_busy_camera() {
    let camera = create_test_camera();
    camera.acquire().unwrap();
    let mut orchestrator = create_test_orchestrator(&camera);

    let result = orchestrator.initialize(&CampipeConfig::default());
    assert!(matches!(result, Err(CampipeError::Camera(CameraError::Busy { .. }))));
    assert!(orchestrator.last_error().unwrap().contains("in use by another process"));
}

#[test]
fn test_configuration_failure_releases_camera() {
    let camera = create_test_camera();
    let mut orchestrator = create_test_orchestrator(&camera);

    let config = config_with(vec![StreamConfig::new(StreamType::Rgb, 9000, 9000)]);
    let result = orchestrator.initialize(&config);

    assert!(matches!(result, Err(CampipeError::Stream(StreamError::Validation))));
    assert!(!camera.is_acquired());
    assert!(!orchestrator.is_initialized());
}

#[test]
fn test_start_before_initialize_fails() {
    let camera = create_test_camera();
    let mut orchestrator = create_test_orchestrator(&camera);
    let (callback, _frames) = recording_callback();
    let (errors, messages) = recording_error_callback();

    let result = orchestrator.start(callback, errors);
    assert!(matches!(result, Err(CampipeError::NotInitialized)));
    assert_eq!(messages.try_iter().count(), 1);
    assert!(!orchestrator.is_running());
}

#[test]
fn test_allocation_failure_goes_to_error_callback() {
    let camera = Arc::new(SimulatedCamera::new("sim-alloc").with_faults(SimulatedFaults {
        fail_allocation: true,
        ..Default::default()
    }));
    let mut orchestrator = create_test_orchestrator(&camera);
    orchestrator.initialize(&CampipeConfig::default()).unwrap();

    let (callback, _frames) = recording_callback();
    let (errors, messages) = recording_error_callback();
    assert!(orchestrator.start(callback, errors).is_err());

    let message = messages.try_recv().unwrap();
    assert!(message.contains("failed to allocate buffers"));
    assert!(!orchestrator.is_running());
    assert!(!camera.is_running());

    orchestrator.stop();
    orchestrator.stop();
}

#[test]
fn test_device_start_failure_leaves_nothing_running() {
    let camera = Arc::new(SimulatedCamera::new("sim-start").with_faults(SimulatedFaults {
        fail_start: true,
        ..Default::default()
    }));
    let mut orchestrator = create_test_orchestrator(&camera);
    orchestrator.initialize(&CampipeConfig::default()).unwrap();

    let (callback, _frames) = recording_callback();
    let (errors, messages) = recording_error_callback();
    assert!(orchestrator.start(callback, errors).is_err());

    assert_eq!(messages.try_iter().count(), 1);
    assert!(!orchestrator.is_running());
    assert!(!camera.is_subscribed());
    assert_eq!(camera.allocated_buffers(1), 0);
    assert!(orchestrator.last_error().is_some());

    drop(orchestrator);
    assert!(!camera.is_acquired());
}

#[test]
fn test_rgb_frame_delivered_zero_copy() {
    let camera = create_test_camera();
    let (mut orchestrator, frames) = start_rgb(&camera, 1280, 720);
    assert_eq!(camera.queued_requests(), 6);

    assert!(camera.complete_next());
    let (stream_type, len, sequence, zero_copy) =
        frames.recv_timeout(Duration::from_secs(5)).unwrap();

    assert_eq!(stream_type, StreamType::Rgb);
    assert_eq!(len, 1280 * 720 * 3);
    assert_eq!(sequence, 0);
    assert!(zero_copy);
    assert!(frames.recv_timeout(Duration::from_millis(50)).is_err());

    // The request goes straight back to the device
    assert!(wait_until(|| camera.queued_requests() == 6));
    assert_eq!(orchestrator.stats().rgb_delivered, 1);

    orchestrator.stop();
}

#[test]
fn test_jpeg_frame_goes_through_encoder() {
    let camera = create_test_camera();
    let input_len = Arc::new(AtomicUsize::new(0));
    let quality = Arc::new(AtomicI32::new(0));
    let factory: CodecFactory = {
        let input_len = Arc::clone(&input_len);
        let quality = Arc::clone(&quality);
        Box::new(move || {
            Box::new(RecordingCodec {
                input_len: Arc::clone(&input_len),
                quality: Arc::clone(&quality),
            }) as Box<dyn BlockEncoder>
        })
    };
    let manager = SimulatedCameraManager::single(Arc::clone(&camera));
    let mut orchestrator = CaptureOrchestrator::with_codec(Arc::new(manager), factory);
    orchestrator
        .initialize(&config_with(vec![StreamConfig::new(StreamType::Jpeg, 1280, 720)]))
        .unwrap();
    let (callback, frames) = recording_callback();
    let (errors, _) = recording_error_callback();
    orchestrator.start(callback, errors).unwrap();

    assert!(camera.complete_next());
    let (stream_type, len, sequence, zero_copy) =
        frames.recv_timeout(Duration::from_secs(5)).unwrap();

    assert_eq!(stream_type, StreamType::Jpeg);
    assert_eq!(len, 2);
    assert_eq!(sequence, 0);
    assert!(!zero_copy);
    assert_eq!(input_len.load(Ordering::SeqCst), 1280 * 720 * 3 / 2);
    assert_eq!(quality.load(Ordering::SeqCst), DEFAULT_JPEG_QUALITY);
    assert!(frames.recv_timeout(Duration::from_millis(50)).is_err());
    assert_eq!(orchestrator.stats().jpeg_submitted, 1);

    orchestrator.stop();
}

#[test]
fn test_each_jpeg_stream_is_encoded_at_its_own_size() {
    let camera = create_test_camera();
    let (sizes_tx, sizes) = unbounded();
    let factory: CodecFactory = Box::new(move || {
        Box::new(SizeRecordingCodec {
            sizes: sizes_tx.clone(),
        }) as Box<dyn BlockEncoder>
    });
    let manager = SimulatedCameraManager::single(Arc::clone(&camera));
    let mut orchestrator = CaptureOrchestrator::with_codec(Arc::new(manager), factory);
    orchestrator
        .initialize(&config_with(vec![
            StreamConfig::new(StreamType::Jpeg, 640, 480),
            StreamConfig::new(StreamType::Jpeg, 320, 240),
        ]))
        .unwrap();
    let (callback, frames) = recording_callback();
    let (errors, _) = recording_error_callback();
    orchestrator.start(callback, errors).unwrap();

    assert!(camera.complete_next());
    let mut encoded: Vec<(u32, u32)> = (0..2)
        .map(|_| sizes.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    encoded.sort_unstable();
    assert_eq!(encoded, vec![(320, 240), (640, 480)]);
    for _ in 0..2 {
        frames.recv_timeout(Duration::from_secs(5)).unwrap();
    }
    assert_eq!(orchestrator.stats().jpeg_submitted, 2);

    orchestrator.stop();
}

#[test]
fn test_raw_stream_is_never_delivered() {
    let camera = create_test_camera();
    let mut orchestrator = create_test_orchestrator(&camera);
    let config = CampipeConfig {
        raw_stream: Some(StreamConfig::new(StreamType::Raw, 1152, 648)),
        streams: vec![
            StreamConfig::new(StreamType::Raw, 640, 480),
            StreamConfig::new(StreamType::Rgb, 64, 48),
        ],
        ..CampipeConfig::default()
    };
    orchestrator.initialize(&config).unwrap();
    let (callback, frames) = recording_callback();
    let (errors, _) = recording_error_callback();
    orchestrator.start(callback, errors).unwrap();

    for _ in 0..3 {
        assert!(camera.complete_next());
    }
    assert!(wait_until(|| orchestrator.stats().completed == 3));

    let delivered: Vec<Delivery> = frames.try_iter().collect();
    assert_eq!(delivered.len(), 3);
    assert!(delivered.iter().all(|(t, len, _, _)| *t == StreamType::Rgb && *len == 64 * 48 * 3));
    assert_eq!(orchestrator.stats().missing_data, 0);

    orchestrator.stop();
}

#[test]
fn test_initial_controls_reach_every_request() {
    let camera = create_test_camera();
    let (mut orchestrator, _frames) = start_rgb(&camera, 64, 48);

    assert!(camera.start_controls().unwrap().is_empty());

    for _ in 0..6 {
        assert!(camera.complete_next());
    }
    let completed = camera.completed_controls();
    assert_eq!(completed.len(), 6);
    for controls in &completed {
        assert_eq!(
            controls.get(ControlId::FrameDurationLimits),
            Some(ControlValue::I64Pair([33_333, 33_333]))
        );
    }

    assert!(wait_until(|| orchestrator.controls().unwrap().target_fps == Some(30)));
    assert_eq!(orchestrator.controls().unwrap().jpeg_quality, Some(85));
    orchestrator.stop();
}

#[test]
fn test_controls_take_effect_one_cycle_later() {
    let camera = create_test_camera();
    let (mut orchestrator, _frames) = start_rgb(&camera, 64, 48);

    orchestrator
        .set_controls(ControlSet {
            brightness: Some(0.25),
            ..ControlSet::default()
        })
        .unwrap();
    assert_eq!(orchestrator.controls().unwrap().brightness, None);

    // Request 0 completes and is requeued carrying the new value
    assert!(camera.complete_next());
    assert!(wait_until(|| orchestrator.controls().unwrap().brightness == Some(0.25)));
    assert!(wait_until(|| camera.queued_requests() == 6));

    for _ in 0..5 {
        assert!(camera.complete_next());
    }
    assert!(wait_until(|| camera.queued_requests() == 6));
    assert!(camera.complete_next());

    let completed = camera.completed_controls();
    assert_eq!(completed.len(), 7);
    assert!(completed[..6].iter().all(|c| !c.contains(ControlId::Brightness)));
    assert_eq!(
        completed[6].get(ControlId::Brightness),
        Some(ControlValue::F32(0.25))
    );

    orchestrator.stop();
}

#[test]
fn test_jpeg_quality_updates_immediately_and_never_reaches_device() {
    let camera = create_test_camera();
    let (mut orchestrator, _frames) = start_rgb(&camera, 64, 48);

    orchestrator
        .set_controls(ControlSet {
            jpeg_quality: Some(90),
            ..ControlSet::default()
        })
        .unwrap();
    assert_eq!(orchestrator.jpeg_quality(), 90);

    assert!(camera.complete_next());
    assert!(wait_until(|| orchestrator.controls().unwrap().jpeg_quality == Some(90)));
    assert!(wait_until(|| camera.queued_requests() == 6));

    // Pending now holds the start-up frame rate and the new quality; only the
    // frame rate is written to the request
    for _ in 0..6 {
        assert!(camera.complete_next());
    }
    let completed = camera.completed_controls();
    assert_eq!(completed[6].len(), 1);
    assert!(completed[6].contains(ControlId::FrameDurationLimits));

    orchestrator.stop();
}

#[test]
fn test_invalid_controls_are_rejected() {
    let camera = create_test_camera();
    let orchestrator = create_test_orchestrator(&camera);

    let result = orchestrator.set_controls(ControlSet {
        jpeg_quality: Some(0),
        ..ControlSet::default()
    });
    assert!(matches!(
        result,
        Err(CampipeError::InvalidControl {
            control: "jpeg_quality",
            ..
        })
    ));
    assert!(orchestrator.last_error().unwrap().contains("jpeg_quality"));
    assert_eq!(orchestrator.jpeg_quality(), DEFAULT_JPEG_QUALITY);
}

#[test]
fn test_cancelled_requests_are_ignored() {
    let camera = create_test_camera();
    let (mut orchestrator, frames) = start_rgb(&camera, 64, 48);

    assert!(camera.cancel_next());
    assert!(wait_until(|| orchestrator.stats().cancelled == 1));

    assert!(frames.try_recv().is_err());
    assert_eq!(orchestrator.stats().completed, 0);
    assert_eq!(camera.queued_requests(), 5);

    orchestrator.stop();
}

#[test]
fn test_panicking_callback_still_requeues() {
    let camera = create_test_camera();
    let mut orchestrator = create_test_orchestrator(&camera);
    orchestrator
        .initialize(&config_with(vec![StreamConfig::new(StreamType::Rgb, 64, 48)]))
        .unwrap();
    let (errors, _) = recording_error_callback();
    orchestrator
        .start(frame_callback(|_, _| panic!("consumer failure")), errors)
        .unwrap();

    assert!(camera.complete_next());
    assert!(wait_until(|| orchestrator.stats().completed == 1));
    assert!(wait_until(|| camera.queued_requests() == 6));
    assert_eq!(orchestrator.stats().rgb_delivered, 0);

    orchestrator.stop();
}

#[test]
fn test_stop_is_idempotent_and_releases_camera() {
    let camera = create_test_camera();
    let (mut orchestrator, _frames) = start_rgb(&camera, 64, 48);
    assert!(orchestrator.is_running());
    assert!(camera.is_running());

    orchestrator.stop();
    orchestrator.stop();

    assert!(!orchestrator.is_running());
    assert!(!camera.is_running());
    assert!(!camera.is_acquired());
    assert!(!camera.is_subscribed());
    assert_eq!(camera.allocated_buffers(1), 0);
    assert!(matches!(orchestrator.controls(), Err(CampipeError::NotInitialized)));
}

#[test]
fn test_restart_after_stop_requires_initialize() {
    let camera = create_test_camera();
    let (mut orchestrator, _frames) = start_rgb(&camera, 64, 48);
    orchestrator.stop();

    orchestrator
        .initialize(&config_with(vec![StreamConfig::new(StreamType::Rgb, 64, 48)]))
        .unwrap();
    let (callback, frames) = recording_callback();
    let (errors, _) = recording_error_callback();
    orchestrator.start(callback, errors).unwrap();

    assert!(camera.complete_next());
    assert!(frames.recv_timeout(Duration::from_secs(5)).is_ok());
    orchestrator.stop();
}

#[test]
fn test_capabilities_from_device() {
    let camera = create_test_camera();
    let mut orchestrator = create_test_orchestrator(&camera);
    assert!(orchestrator.capabilities().is_err());

    orchestrator.initialize(&CampipeConfig::default()).unwrap();
    let capabilities = orchestrator.capabilities().unwrap();

    let exposure = capabilities.exposure_time.unwrap();
    assert_eq!(exposure.min, 26.0);
    assert_eq!(exposure.max, 1_000_000.0);
    assert_eq!(capabilities.analogue_gain.unwrap().max, 16.0);
    assert_eq!(capabilities.af_modes, vec!["manual", "auto", "continuous"]);
    assert_eq!(capabilities.awb_modes.len(), 8);
}
