use super::CaptureStats;
use crate::controls::{ControlPipeline, ControlSet};
use crate::device::{Camera, CaptureRequest, RequestStatus};
use crate::encoder::AsyncEncoder;
use crate::frame::{Frame, FrameCallback, StreamType};
use crate::registry::StreamRegistry;
use crossbeam::channel::Receiver;
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Per-completion hot path, run on the dispatcher thread
pub(super) struct Dispatcher {
    pub(super) camera: Arc<dyn Camera>,
    pub(super) registry: Arc<RwLock<StreamRegistry>>,
    pub(super) controls: Arc<ControlPipeline>,
    pub(super) encoder: Arc<AsyncEncoder>,
    pub(super) pending: Arc<Mutex<Option<ControlSet>>>,
    pub(super) jpeg_quality: Arc<AtomicI32>,
    pub(super) frame_callback: FrameCallback,
    pub(super) stats: Arc<CaptureStats>,
}

impl Dispatcher {
    /// Handle completions until the device drops its sender
    pub(super) fn run(self, completions: Receiver<CaptureRequest>) {
        debug!("Capture dispatcher running");
        for request in completions.iter() {
            self.handle(request);
        }
        debug!("Capture dispatcher exiting");
    }

    fn handle(&self, mut request: CaptureRequest) {
        if request.status() == RequestStatus::Cancelled {
            self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            trace!("Ignoring cancelled request {}", request.cookie());
            return;
        }
        self.stats.completed.fetch_add(1, Ordering::Relaxed);

        let sequence = request.sequence();
        let timestamp = request.metadata().sensor_timestamp.unwrap_or(0);

        self.deliver(&request, timestamp, sequence);

        request.reuse();

        // Pending controls ride on the request being requeued, so they take
        // effect one capture cycle after they were set.
        if let Some(delta) = self.pending.lock().take() {
            self.controls.apply_controls(&delta, &mut request);
            debug!("Applied pending controls to request {}", request.cookie());
        }

        let cookie = request.cookie();
        if let Err(e) = self.camera.queue_request(request) {
            warn!("Failed to requeue request {}: {}", cookie, e);
            self.stats.requeue_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn deliver(&self, request: &CaptureRequest, timestamp: u64, sequence: u32) {
        let quality = self.jpeg_quality.load(Ordering::Relaxed);
        let registry = self.registry.read();

        for slot in request.buffers() {
            let stream_type = registry.stream_type(slot.stream);
            if stream_type == StreamType::Raw {
                continue;
            }

            let Some(data) = registry.mapped_data(*slot) else {
                warn!(
                    "No mapped data for buffer {} of stream {}, dropping frame {}",
                    slot.index, slot.stream, sequence
                );
                self.stats.missing_data.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            match stream_type {
                StreamType::Rgb => {
                    let frame = Frame::mapped(StreamType::Rgb, data, timestamp, sequence);
                    let callback = &self.frame_callback;
                    let delivered =
                        panic::catch_unwind(AssertUnwindSafe(|| callback(StreamType::Rgb, &frame)));
                    match delivered {
                        Ok(()) => {
                            self.stats.rgb_delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => error!("Frame callback panicked on RGB frame {}", sequence),
                    }
                }
                StreamType::Jpeg => {
                    let Some(size) = registry.stream_size(slot.stream) else {
                        self.stats.missing_data.fetch_add(1, Ordering::Relaxed);
                        continue;
                    };
                    match self.encoder.encode(
                        data,
                        size.width,
                        size.height,
                        quality,
                        timestamp,
                        sequence,
                        Arc::clone(&self.frame_callback),
                    ) {
                        Ok(()) => {
                            self.stats.jpeg_submitted.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => warn!("Dropping JPEG frame {}: {}", sequence, e),
                    }
                }
                StreamType::Raw => {}
            }
        }
    }
}
