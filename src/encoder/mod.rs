//! Bounded asynchronous JPEG encoding.
//!
//! The capture dispatcher copies each YUV 4:2:0 frame into a task and returns
//! its buffer to the device immediately. One worker thread compresses tasks in
//! FIFO order and hands the result to the frame callback. When the queue is
//! full the producer blocks until the worker frees a slot.

mod jpeg;

pub use jpeg::{BlockEncoder, JpegCodec, YuvPlanes};

use crate::error::EncoderError;
use crate::frame::{Frame, FrameCallback, StreamType};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Maximum queued encode tasks unless configured otherwise
pub const DEFAULT_QUEUE_SIZE: usize = 33;

/// One copied frame waiting to be compressed
struct EncodeTask {
    data: Vec<u8>,
    width: u32,
    height: u32,
    quality: i32,
    timestamp: u64,
    sequence: u32,
    callback: FrameCallback,
}

struct QueueState {
    tasks: VecDeque<EncodeTask>,
    running: bool,
}

struct SharedQueue {
    state: Mutex<QueueState>,
    /// Signalled when a task leaves the queue
    space: Condvar,
    /// Signalled when a task arrives or the encoder stops
    ready: Condvar,
}

/// Codec and output buffer, owned by the worker thread while it runs
struct EncodeWorker {
    codec: Box<dyn BlockEncoder>,
    output: Vec<u8>,
}

impl EncodeWorker {
    fn process(&mut self, task: EncodeTask, stats: &EncoderStats) {
        let planes = match YuvPlanes::from_i420(&task.data, task.width, task.height) {
            Ok(planes) => planes,
            Err(e) => {
                error!("Dropping frame {}: {}", task.sequence, e);
                stats.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let size = self.codec.buffer_size(task.width, task.height);
        if self.output.len() < size {
            self.output.resize(size, 0);
        }

        let written = match self.codec.compress(&planes, task.quality, &mut self.output[..size]) {
            Ok(written) => written,
            Err(e) => {
                error!("JPEG compression failed for frame {}: {}", task.sequence, e);
                stats.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let frame = Frame::owned(
            StreamType::Jpeg,
            Bytes::copy_from_slice(&self.output[..written]),
            task.timestamp,
            task.sequence,
        );
        stats.encoded.fetch_add(1, Ordering::Relaxed);
        trace!("Encoded frame {} into {} bytes", task.sequence, written);

        let callback = &task.callback;
        if panic::catch_unwind(AssertUnwindSafe(|| callback(StreamType::Jpeg, &frame))).is_err() {
            error!("Frame callback panicked on JPEG frame {}", task.sequence);
        }
    }
}

/// Counters for the encode queue
#[derive(Debug, Default)]
pub struct EncoderStats {
    /// Tasks accepted into the queue
    pub queued: AtomicU64,
    /// Frames compressed and delivered
    pub encoded: AtomicU64,
    /// Frames dropped because decoding or compression failed or panicked
    pub failed: AtomicU64,
    /// Tasks thrown away by `stop`
    pub discarded: AtomicU64,
}

impl EncoderStats {
    pub fn snapshot(&self) -> EncoderStatsSnapshot {
        EncoderStatsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            encoded: self.encoded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderStatsSnapshot {
    pub queued: u64,
    pub encoded: u64,
    pub failed: u64,
    pub discarded: u64,
}

/// Single-worker JPEG encoder with a bounded FIFO queue
pub struct AsyncEncoder {
    queue: Arc<SharedQueue>,
    capacity: usize,
    worker: Mutex<Option<EncodeWorker>>,
    handle: Mutex<Option<JoinHandle<EncodeWorker>>>,
    stats: Arc<EncoderStats>,
}

impl AsyncEncoder {
    pub fn new(codec: Box<dyn BlockEncoder>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Arc::new(SharedQueue {
                state: Mutex::new(QueueState {
                    tasks: VecDeque::with_capacity(capacity),
                    running: false,
                }),
                space: Condvar::new(),
                ready: Condvar::new(),
            }),
            capacity,
            worker: Mutex::new(Some(EncodeWorker {
                codec,
                output: Vec::new(),
            })),
            handle: Mutex::new(None),
            stats: Arc::new(EncoderStats::default()),
        }
    }

    /// Spawn the worker thread. Starting a running encoder is a no-op.
    pub fn start(&self) -> Result<(), EncoderError> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }

        let worker = self
            .worker
            .lock()
            .take()
            .ok_or(EncoderError::WorkerUnavailable)?;

        self.queue.state.lock().running = true;

        let queue = Arc::clone(&self.queue);
        let stats = Arc::clone(&self.stats);
        let spawned = thread::Builder::new()
            .name("campipe-jpeg".to_string())
            .spawn(move || run_worker(queue, worker, stats));

        match spawned {
            Ok(join) => {
                *handle = Some(join);
                info!("JPEG encoder started (queue size {})", self.capacity);
                Ok(())
            }
            Err(e) => {
                self.queue.state.lock().running = false;
                Err(EncoderError::Spawn(e))
            }
        }
    }

    /// Copy a YUV 4:2:0 frame and queue it for compression.
    ///
    /// Blocks while the queue is full. Fails if the encoder is not running or
    /// `data` holds fewer than `width * height * 3 / 2` bytes.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        quality: i32,
        timestamp: u64,
        sequence: u32,
        callback: FrameCallback,
    ) -> Result<(), EncoderError> {
        let expected = width as usize * height as usize * 3 / 2;
        if data.len() < expected {
            return Err(EncoderError::ShortFrame {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }

        if !self.queue.state.lock().running {
            return Err(EncoderError::NotRunning);
        }

        let task = EncodeTask {
            data: data[..expected].to_vec(),
            width,
            height,
            quality,
            timestamp,
            sequence,
            callback,
        };

        let mut state = self.queue.state.lock();
        while state.running && state.tasks.len() >= self.capacity {
            self.queue.space.wait(&mut state);
        }
        if !state.running {
            return Err(EncoderError::NotRunning);
        }

        if state.tasks.len() + 2 >= self.capacity {
            warn!(
                "JPEG encode queue nearly full ({}/{})",
                state.tasks.len() + 1,
                self.capacity
            );
        }

        state.tasks.push_back(task);
        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        drop(state);
        self.queue.ready.notify_one();
        Ok(())
    }

    /// Stop the worker and discard queued tasks. Safe to call repeatedly.
    pub fn stop(&self) {
        {
            let mut state = self.queue.state.lock();
            state.running = false;
        }
        self.queue.ready.notify_all();
        self.queue.space.notify_all();

        if let Some(join) = self.handle.lock().take() {
            match join.join() {
                Ok(worker) => *self.worker.lock() = Some(worker),
                Err(_) => error!("JPEG encoder worker panicked"),
            }
        }

        let discarded = {
            let mut state = self.queue.state.lock();
            let count = state.tasks.len();
            state.tasks.clear();
            count
        };
        if discarded > 0 {
            warn!("Discarded {} pending JPEG encode tasks", discarded);
            self.stats
                .discarded
                .fetch_add(discarded as u64, Ordering::Relaxed);
        }
    }

    pub fn is_running(&self) -> bool {
        self.queue.state.lock().running
    }

    pub fn queue_len(&self) -> usize {
        self.queue.state.lock().tasks.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> EncoderStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for AsyncEncoder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(queue: Arc<SharedQueue>, mut worker: EncodeWorker, stats: Arc<EncoderStats>) -> EncodeWorker {
    debug!("JPEG encoder worker running");

    loop {
        let task = {
            let mut state = queue.state.lock();
            while state.running && state.tasks.is_empty() {
                queue.ready.wait(&mut state);
            }
            if !state.running {
                break;
            }
            state.tasks.pop_front()
        };
        queue.space.notify_one();

        if let Some(task) = task {
            let sequence = task.sequence;
            let processed =
                panic::catch_unwind(AssertUnwindSafe(|| worker.process(task, &stats)));
            if processed.is_err() {
                error!("JPEG codec panicked on frame {}, dropping it", sequence);
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    debug!("JPEG encoder worker exiting");
    worker
}
