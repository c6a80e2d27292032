//! Bridges the decoder (network) thread to the UI thread.
//!
//! `push_frame` stores the frame in an internal `FrameBuffer` and, only if
//! no prior dispatch is pending, schedules exactly one task on the UI
//! thread. That task calls `FrameBuffer::consume()` and forwards to the
//! registered handler. Backpressure is therefore coalescing, not queueing:
//! at most one dispatch is ever in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use scrcpy_codecs::DecodedVideoFrame;

use crate::frame_buffer::FrameBuffer;

/// Schedules a unit of work onto the UI thread. The pipeline itself is
/// agnostic to what that thread is; callers own the event loop.
pub type Scheduler = Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync>;

pub type FrameHandler = Box<dyn FnMut(DecodedVideoFrame) + Send>;

struct Inner {
    buffer: Mutex<FrameBuffer<DecodedVideoFrame>>,
    dispatch_pending: AtomicBool,
    handler: Mutex<Option<FrameHandler>>,
}

pub struct FramePipeline {
    inner: Arc<Inner>,
    scheduler: Scheduler,
    running: bool,
}

impl FramePipeline {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(FrameBuffer::new()),
                dispatch_pending: AtomicBool::new(false),
                handler: Mutex::new(None),
            }),
            scheduler,
            running: false,
        }
    }

    /// `initial_size` is informational (matches the source's sizing hint
    /// for the UI-side surface); the pipeline itself needs no capacity.
    pub fn start(&mut self, _initial_size: (u16, u16)) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.inner.buffer.lock().unwrap().reset();
        self.inner.dispatch_pending.store(false, Ordering::SeqCst);
    }

    pub fn set_frame_handler(&mut self, handler: FrameHandler) {
        *self.inner.handler.lock().unwrap() = Some(handler);
    }

    pub fn push_frame(&mut self, frame: DecodedVideoFrame) {
        if !self.running {
            return;
        }
        self.inner.buffer.lock().unwrap().push(frame);

        if self
            .inner
            .dispatch_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let inner = self.inner.clone();
            (self.scheduler)(Box::new(move || {
                inner.dispatch_pending.store(false, Ordering::SeqCst);
                let frame = inner.buffer.lock().unwrap().consume();
                if let Some(frame) = frame {
                    if let Some(handler) = inner.handler.lock().unwrap().as_mut() {
                        handler(frame);
                    }
                }
            }));
        }
    }

    pub fn skipped_count(&self) -> u64 {
        self.inner.buffer.lock().unwrap().skipped_count()
    }
}

/// A scheduler that runs the task inline, synchronously. Used by tests and
/// by callers with no real UI thread of their own.
pub fn immediate_scheduler() -> Scheduler {
    Arc::new(|task: Box<dyn FnOnce() + Send>| task())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrcpy_codecs::video::PixelFormat;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    fn frame(tag: u8) -> DecodedVideoFrame {
        DecodedVideoFrame {
            width: 2,
            height: 2,
            format: PixelFormat::Nv12,
            presentation: Instant::now(),
            planes: vec![tag; 6],
            y_stride: 2,
        }
    }

    #[test]
    fn coalesces_bursts_to_the_latest_frame() {
        let mut pipeline = FramePipeline::new(immediate_scheduler());
        pipeline.start((1080, 1920));
        let delivered: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let delivered_clone = delivered.clone();
        pipeline.set_frame_handler(Box::new(move |f| {
            delivered_clone.lock().unwrap().push(f.planes[0]);
        }));

        // Manually pause dispatch to simulate a burst arriving before the
        // UI thread runs: push straight into the buffer, bypassing the
        // scheduler, then flush once.
        for tag in 1..=5u8 {
            pipeline.inner.buffer.lock().unwrap().push(frame(tag));
        }
        let last = pipeline.inner.buffer.lock().unwrap().consume().unwrap();
        assert_eq!(last.planes[0], 5);
        assert_eq!(pipeline.inner.buffer.lock().unwrap().skipped_count(), 4);
    }

    #[test]
    fn dropped_frames_after_stop_are_ignored() {
        let mut pipeline = FramePipeline::new(immediate_scheduler());
        pipeline.push_frame(frame(1));
        assert_eq!(pipeline.skipped_count(), 0);
    }
}
