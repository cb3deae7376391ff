use super::*;
use crate::controls::ControlList;
use crate::device::sim::{SimulatedCamera, SimulatedFaults};
use crate::device::PixelFormat;
use crate::error::CampipeError;

fn create_test_camera() -> Arc<SimulatedCamera> {
    let camera = Arc::new(SimulatedCamera::new("sim-registry"));
    camera.acquire().unwrap();
    camera
}

fn create_test_registry(camera: &Arc<SimulatedCamera>) -> StreamRegistry {
    StreamRegistry::new(Arc::clone(camera) as Arc<dyn Camera>)
}

fn small_streams() -> Vec<StreamConfig> {
    vec![
        StreamConfig::new(StreamType::Rgb, 64, 48),
        StreamConfig::new(StreamType::Jpeg, 32, 24),
    ]
}

#[test]
fn test_default_raw_stream_comes_first() {
    let camera = create_test_camera();
    let mut registry = create_test_registry(&camera);

    registry.configure(None, &small_streams()).unwrap();

    assert_eq!(registry.stream_count(), 3);
    assert_eq!(registry.stream_type(0), StreamType::Raw);
    assert_eq!(registry.stream_type(1), StreamType::Rgb);
    assert_eq!(registry.stream_type(2), StreamType::Jpeg);

    let applied = camera.configuration().unwrap();
    let raw = applied.get(0).unwrap();
    assert_eq!(raw.role, StreamRole::Raw);
    assert_eq!(raw.size, Size::new(2304, 1296));
    assert_eq!(raw.pixel_format, PixelFormat::Sbggr10);

    let rgb = applied.get(1).unwrap();
    assert_eq!(rgb.role, StreamRole::StillCapture);
    assert_eq!(rgb.pixel_format, PixelFormat::Bgr888);
    assert_eq!(rgb.size, Size::new(64, 48));

    for stream in applied.iter() {
        assert_eq!(stream.buffer_count, BUFFER_COUNT);
    }
}

#[test]
fn test_explicit_raw_and_duplicate_raw_requests() {
    let camera = create_test_camera();
    let mut registry = create_test_registry(&camera);

    let raw = StreamConfig::new(StreamType::Raw, 1152, 648);
    let streams = vec![
        StreamConfig::new(StreamType::Raw, 640, 480),
        StreamConfig::new(StreamType::Rgb, 64, 48),
    ];
    registry.configure(Some(&raw), &streams).unwrap();

    assert_eq!(registry.stream_count(), 2);
    let applied = camera.configuration().unwrap();
    assert_eq!(applied.get(0).unwrap().size, Size::new(1152, 648));
    assert_eq!(applied.get(1).unwrap().pixel_format, PixelFormat::Bgr888);
}

#[test]
fn test_zero_dimensions_keep_device_defaults() {
    let camera = create_test_camera();
    let mut registry = create_test_registry(&camera);

    registry
        .configure(None, &[StreamConfig::new(StreamType::Jpeg, 0, 0)])
        .unwrap();

    let applied = camera.configuration().unwrap();
    assert_eq!(applied.get(1).unwrap().size, Size::new(1920, 1080));
    assert_eq!(registry.stream_size(1), Some(Size::new(1920, 1080)));
}

#[test]
fn test_jpeg_size_reflects_device_adjustment() {
    let camera = create_test_camera();
    let mut registry = create_test_registry(&camera);

    registry
        .configure(None, &[StreamConfig::new(StreamType::Jpeg, 33, 25)])
        .unwrap();

    assert_eq!(registry.stream_size(1), Some(Size::new(32, 24)));
}

#[test]
fn test_each_jpeg_stream_keeps_its_own_size() {
    let camera = create_test_camera();
    let mut registry = create_test_registry(&camera);

    registry
        .configure(
            None,
            &[
                StreamConfig::new(StreamType::Jpeg, 640, 480),
                StreamConfig::new(StreamType::Jpeg, 320, 240),
            ],
        )
        .unwrap();

    assert_eq!(registry.stream_size(1), Some(Size::new(640, 480)));
    assert_eq!(registry.stream_size(2), Some(Size::new(320, 240)));
    assert_eq!(registry.stream_size(3), None);
}

#[test]
fn test_oversized_stream_fails_validation() {
    let camera = create_test_camera();
    let mut registry = create_test_registry(&camera);

    let result = registry.configure(None, &[StreamConfig::new(StreamType::Rgb, 10_000, 10_000)]);
    assert!(matches!(result, Err(CampipeError::Stream(StreamError::Validation))));
    assert!(camera.configuration().is_none());
}

#[test]
fn test_configuration_generation_failure() {
    let camera = Arc::new(SimulatedCamera::new("sim-reject").with_faults(SimulatedFaults {
        reject_configuration: true,
        ..Default::default()
    }));
    camera.acquire().unwrap();
    let mut registry = create_test_registry(&camera);

    let result = registry.configure(None, &small_streams());
    assert!(matches!(
        result,
        Err(CampipeError::Stream(StreamError::ConfigurationGeneration { roles: 3 }))
    ));
}

#[test]
fn test_configure_failure_maps_to_apply_error() {
    let camera = Arc::new(SimulatedCamera::new("sim-configure").with_faults(SimulatedFaults {
        fail_configure: true,
        ..Default::default()
    }));
    camera.acquire().unwrap();
    let mut registry = create_test_registry(&camera);

    let result = registry.configure(None, &small_streams());
    assert!(matches!(result, Err(CampipeError::Stream(StreamError::Apply { .. }))));
}

#[test]
fn test_allocate_before_configure_fails() {
    let camera = create_test_camera();
    let mut registry = create_test_registry(&camera);

    let result = registry.allocate_buffers();
    assert!(matches!(result, Err(CampipeError::Stream(StreamError::NotConfigured))));
    assert!(registry.requests().is_empty());
}

#[test]
fn test_allocation_maps_everything_but_raw() {
    let camera = create_test_camera();
    let mut registry = create_test_registry(&camera);
    registry.configure(None, &small_streams()).unwrap();
    registry.allocate_buffers().unwrap();

    assert_eq!(registry.requests().len(), BUFFER_COUNT as usize);
    for stream in 0..3 {
        assert_eq!(camera.allocated_buffers(stream), BUFFER_COUNT as usize);
    }

    for index in 0..BUFFER_COUNT as usize {
        assert!(registry.mapped_data(BufferSlot { stream: 0, index }).is_none());
        assert_eq!(registry.mapped_len(BufferSlot { stream: 1, index }), 64 * 48 * 3);
        assert_eq!(registry.mapped_len(BufferSlot { stream: 2, index }), 32 * 24 * 3 / 2);
        assert!(registry.buffer(0, index).is_some());
    }
    assert!(registry.mapped_data(BufferSlot { stream: 7, index: 0 }).is_none());
}

#[test]
fn test_requests_carry_one_buffer_per_stream() {
    let camera = create_test_camera();
    let mut registry = create_test_registry(&camera);
    registry.configure(None, &small_streams()).unwrap();
    registry.allocate_buffers().unwrap();

    for (index, request) in registry.requests().iter().enumerate() {
        assert_eq!(request.cookie(), index as u64);
        assert_eq!(request.buffers().len(), 3);
        for stream in 0..3 {
            assert_eq!(request.buffer(stream), Some(BufferSlot { stream, index }));
        }
    }
}

#[test]
fn test_allocation_failure_leaves_nothing_behind() {
    let camera = Arc::new(SimulatedCamera::new("sim-alloc").with_faults(SimulatedFaults {
        fail_allocation: true,
        ..Default::default()
    }));
    camera.acquire().unwrap();
    let mut registry = create_test_registry(&camera);
    registry.configure(None, &small_streams()).unwrap();

    let result = registry.allocate_buffers();
    assert!(matches!(
        result,
        Err(CampipeError::Stream(StreamError::Allocation { stream: 0, .. }))
    ));
    assert!(registry.requests().is_empty());
    assert!(registry.buffer(0, 0).is_none());
}

#[test]
fn test_reallocation_and_free_are_idempotent() {
    let camera = create_test_camera();
    let mut registry = create_test_registry(&camera);
    registry.configure(None, &small_streams()).unwrap();

    registry.allocate_buffers().unwrap();
    registry.allocate_buffers().unwrap();
    assert_eq!(registry.requests().len(), BUFFER_COUNT as usize);

    registry.free_buffers();
    registry.free_buffers();
    assert!(registry.requests().is_empty());
    assert_eq!(camera.allocated_buffers(1), 0);
    assert!(registry.mapped_data(BufferSlot { stream: 1, index: 0 }).is_none());
}

#[test]
fn test_mapped_data_sees_device_writes() {
    let camera = create_test_camera();
    let mut registry = create_test_registry(&camera);
    registry.configure(None, &small_streams()).unwrap();
    registry.allocate_buffers().unwrap();

    let rx = camera.subscribe();
    camera.start(&ControlList::new()).unwrap();
    assert_eq!(registry.queue_requests().unwrap(), BUFFER_COUNT as usize);
    assert!(registry.requests().is_empty());

    // Sequence 0 fills with zeros, sequence 1 with ones
    assert!(camera.complete_next());
    assert!(camera.complete_next());
    let _first = rx.recv().unwrap();
    let second = rx.recv().unwrap();

    let slot = second.buffer(1).unwrap();
    let data = registry.mapped_data(slot).unwrap();
    assert!(data.iter().all(|&b| b == 1));

    camera.stop();
}

#[test]
fn test_unknown_stream_is_treated_as_raw() {
    let camera = create_test_camera();
    let registry = create_test_registry(&camera);
    assert_eq!(registry.stream_type(42), StreamType::Raw);
}
