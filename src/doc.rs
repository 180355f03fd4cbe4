//! Document handle: open, progressive load, and the per-page render contract
//!
//! A `Doc` owns the render service and a controlling-side engine instance
//! for metadata and synchronous renders. All async completions surface as
//! `DocEvent`s from `pump_events`, which the owner calls from its
//! controlling thread; nothing here invokes callbacks from worker threads.

use std::sync::{Arc, Mutex};

use crate::bitmap::{Bitmap, BitmapKind, ColorProfile};
use crate::engine::{EngineSource, RasterRequest, RenderEngine, RenderLayer};
use crate::geom::{Point, Size};
use crate::render::request::{RenderTask, WorkerJob, WorkerReply};
use crate::render::service::RenderService;
use crate::render::{RenderFault, RenderHandle, RequestId};

/// Default number of worker render threads
pub const DEFAULT_WORKERS: usize = 2;

#[derive(Clone, Debug)]
pub struct DocOptions {
    pub workers: usize,
    pub bitmap_kind: BitmapKind,
    pub color_profile: ColorProfile,
}

impl Default for DocOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            bitmap_kind: BitmapKind::Rgba8888,
            color_profile: ColorProfile::Srgb,
        }
    }
}

/// Completion delivered by `Doc::pump_events`
#[derive(Debug)]
pub enum DocEvent {
    /// A render or update request finished. Failures arrive here as
    /// values; cancelled requests produce no event at all.
    RenderDone {
        id: RequestId,
        page: usize,
        result: Result<(), RenderFault>,
    },
    /// Page discovery progressed
    PagesLoaded { count: usize, complete: bool },
    /// Page discovery failed
    LoadFailed { error: RenderFault },
}

#[derive(Debug)]
struct DocInfo {
    page_count: usize,
    load_complete: bool,
    load_in_flight: Option<RenderHandle>,
}

struct DocInner {
    service: RenderService,
    meta: Mutex<Box<dyn RenderEngine>>,
    info: Mutex<DocInfo>,
    bitmap_kind: BitmapKind,
    color_profile: ColorProfile,
}

/// Shared document handle. Cloning is cheap; all clones drive the same
/// worker pool and see the same load state.
#[derive(Clone)]
pub struct Doc {
    inner: Arc<DocInner>,
}

impl std::fmt::Debug for Doc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = self.inner.info.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f.debug_struct("Doc")
            .field("page_count", &info.page_count)
            .field("load_complete", &info.load_complete)
            .finish_non_exhaustive()
    }
}

impl Doc {
    pub fn open(source: &dyn EngineSource, options: DocOptions) -> Result<Self, RenderFault> {
        let service = RenderService::start(source, options.workers)?;
        let meta = source.open()?;
        let page_count = meta.page_count();

        Ok(Self {
            inner: Arc::new(DocInner {
                service,
                meta: Mutex::new(meta),
                info: Mutex::new(DocInfo {
                    page_count,
                    load_complete: false,
                    load_in_flight: None,
                }),
                bitmap_kind: options.bitmap_kind,
                color_profile: options.color_profile,
            }),
        })
    }

    fn info(&self) -> std::sync::MutexGuard<'_, DocInfo> {
        self.inner
            .info
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn meta(&self) -> std::sync::MutexGuard<'_, Box<dyn RenderEngine>> {
        self.inner
            .meta
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Start background page discovery. A second call while one is in
    /// flight is ignored.
    pub fn load(&self) {
        let mut info = self.info();
        if info.load_in_flight.is_some() {
            log::debug!("load already in flight, ignoring");
            return;
        }
        let handle = self
            .inner
            .service
            .submit(|id, cancel| WorkerJob::Load { id, cancel });
        info.load_in_flight = Some(handle);
    }

    /// Abort an in-flight load. Counts reported so far stay valid; no
    /// further load events are delivered.
    pub fn abort_load(&self) {
        if let Some(handle) = self.info().load_in_flight.take() {
            handle.cancel();
        }
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.info().page_count
    }

    #[must_use]
    pub fn loading_complete(&self) -> bool {
        self.info().load_complete
    }

    /// Drain worker completions into events, updating load state along the
    /// way. Call this from the controlling thread; completion closures in
    /// higher layers run during this call, never on a worker.
    pub fn pump_events(&self) -> Vec<DocEvent> {
        let mut events = vec![];

        for reply in self.inner.service.drain() {
            match reply {
                WorkerReply::Done { id, page, result } => {
                    events.push(DocEvent::RenderDone { id, page, result });
                }
                WorkerReply::Loaded { count, complete, .. } => {
                    let mut info = self.info();
                    // Counts only move forward, whatever order replies land in
                    info.page_count = info.page_count.max(count);
                    if complete {
                        info.load_complete = true;
                        info.load_in_flight = None;
                    }
                    events.push(DocEvent::PagesLoaded {
                        count: info.page_count,
                        complete,
                    });
                }
                WorkerReply::LoadFailed { error, .. } => {
                    self.info().load_in_flight = None;
                    events.push(DocEvent::LoadFailed { error });
                }
            }
        }

        events
    }

    /// Look up a page by number. None until discovery has reached it.
    #[must_use]
    pub fn page(&self, number: usize) -> Option<Page> {
        if number >= self.page_count() {
            return None;
        }
        let size = self.meta().page_size(number)?;
        Some(Page {
            doc: self.clone(),
            number,
            size,
        })
    }

    /// Allocate a bitmap in this document's pixel format
    #[must_use]
    pub fn make_bitmap(&self, size: Size) -> Bitmap {
        let mut bitmap = Bitmap::with_size(size, self.inner.bitmap_kind);
        bitmap.set_profile(self.inner.color_profile);
        bitmap
    }

    #[must_use]
    pub fn bitmap_kind(&self) -> BitmapKind {
        self.inner.bitmap_kind
    }

    /// Cancel every outstanding request on this document
    pub fn cancel_all(&self) {
        self.inner.service.cancel_all();
    }
}

/// One page of an open document. Holds the natural (zoom 1) page size;
/// render targets decide the pixel geometry.
#[derive(Clone, Debug)]
pub struct Page {
    doc: Doc,
    number: usize,
    size: Size,
}

impl Page {
    #[must_use]
    pub const fn number(&self) -> usize {
        self.number
    }

    /// Natural size in page units at zoom 1
    #[must_use]
    pub fn size(&self) -> Size {
        self.size
    }

    /// Queue an async render of every layer. `origin` is the page-space
    /// point mapped to the target's top-left corner; `zoom` is pixels per
    /// page unit. The result arrives as `DocEvent::RenderDone`.
    pub fn render(&self, zoom: f32, origin: Point, target: &Bitmap) -> RenderHandle {
        self.submit(RenderLayer::All, zoom, origin, target, false)
    }

    /// Queue an async re-render for changed content. The worker draws to a
    /// staging buffer and copies into `target` at the end, so the target
    /// never shows a half-drawn state.
    pub fn update(&self, zoom: f32, origin: Point, target: &Bitmap) -> RenderHandle {
        self.submit(RenderLayer::All, zoom, origin, target, true)
    }

    /// Queue an async render restricted to one layer
    pub fn render_layer(
        &self,
        layer: RenderLayer,
        zoom: f32,
        origin: Point,
        target: &Bitmap,
    ) -> RenderHandle {
        self.submit(layer, zoom, origin, target, false)
    }

    /// Render on the calling thread, bypassing the queue. Meant for
    /// thumbnails and export paths that want the pixels before returning.
    pub fn render_sync(&self, zoom: f32, origin: Point, target: &Bitmap) -> Result<(), RenderFault> {
        let cancel = crate::render::CancelFlag::new();
        self.doc.meta().render(&RasterRequest {
            page: self.number,
            layer: RenderLayer::All,
            zoom,
            origin,
            target,
            cancel: &cancel,
        })?;
        target.apply_dark_mode();
        Ok(())
    }

    fn submit(
        &self,
        layer: RenderLayer,
        zoom: f32,
        origin: Point,
        target: &Bitmap,
        update: bool,
    ) -> RenderHandle {
        let page = self.number;
        let target = target.clone();
        self.doc.inner.service.submit(move |id, cancel| {
            WorkerJob::Render(RenderTask {
                id,
                page,
                layer,
                zoom,
                origin,
                target,
                update,
                cancel,
            })
        })
    }
}
