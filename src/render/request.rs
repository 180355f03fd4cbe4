//! Render queue message types

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::bitmap::Bitmap;
use crate::engine::RenderLayer;
use crate::geom::Point;

/// Unique identifier for render requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Cooperative cancellation flag shared between the controlling thread and
/// one worker. `cancel` is idempotent and safe to call from any thread.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Errors from the render pipeline
#[derive(Debug, thiserror::Error)]
pub enum RenderFault {
    #[error("render engine: {detail}")]
    Engine { detail: String },

    #[error("out of memory for {width}x{height} target")]
    OutOfMemory { width: u32, height: u32 },

    #[error("page {page} out of range")]
    PageOutOfRange { page: usize },

    #[error("{detail}")]
    Generic { detail: String },
}

impl RenderFault {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }

    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine { detail: msg.into() }
    }
}

/// One rasterization task bound for a worker
#[derive(Debug)]
pub struct RenderTask {
    pub id: RequestId,
    pub page: usize,
    pub layer: RenderLayer,
    /// Pixels per page unit
    pub zoom: f32,
    /// Page-space location of the target's top-left corner
    pub origin: Point,
    /// Shared-storage handle; the worker writes through it
    pub target: Bitmap,
    /// Render into private scratch and copy at the end, so a displayed
    /// buffer never holds a half-drawn frame
    pub update: bool,
    pub cancel: CancelFlag,
}

/// Jobs sent to render workers
#[derive(Debug)]
pub enum WorkerJob {
    Render(RenderTask),

    /// Run page discovery, reporting progress as `Loaded` replies
    Load { id: RequestId, cancel: CancelFlag },

    /// Shutdown the worker
    Shutdown,
}

/// Replies from render workers
#[derive(Debug)]
pub enum WorkerReply {
    /// A render task finished; exactly one per task
    Done {
        id: RequestId,
        page: usize,
        result: Result<(), RenderFault>,
    },

    /// Page discovery progress; `count` is monotonically non-decreasing and
    /// the final reply carries `complete: true`
    Loaded {
        id: RequestId,
        count: usize,
        complete: bool,
    },

    /// Page discovery failed
    LoadFailed { id: RequestId, error: RenderFault },
}
