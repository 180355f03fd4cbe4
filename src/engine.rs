//! Engine boundary for page rasterization
//!
//! Documents are rasterized by an engine behind these traits. The pipeline
//! never touches document bytes itself; it hands the engine a page number,
//! a zoom, an origin and a target bitmap.

use crate::bitmap::Bitmap;
use crate::geom::{Point, Size};
use crate::render::{CancelFlag, RenderFault};

/// Restricts a render to one semantic layer of the page
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderLayer {
    /// Everything the page draws
    #[default]
    All,
    /// Page content without annotations
    Content,
    /// Annotations only
    Annotations,
}

/// Opens engine instances. Each worker thread opens its own instance, plus
/// one on the controlling thread for metadata and synchronous renders.
pub trait EngineSource: Send + Sync + 'static {
    fn open(&self) -> Result<Box<dyn RenderEngine>, RenderFault>;
}

/// One engine instance. Instances are confined to the thread that opened
/// them; cross-thread coordination happens through the render queue.
pub trait RenderEngine: Send {
    /// Number of pages known so far. May grow during `load` for engines
    /// that discover pages incrementally.
    fn page_count(&self) -> usize;

    /// Natural page size in page units; None for out-of-range pages.
    fn page_size(&self, page: usize) -> Option<Size>;

    /// Run page discovery. `progress(count, complete)` must be called with
    /// non-decreasing counts and exactly once with `complete = true` unless
    /// cancelled or failed. The default covers engines that know their page
    /// count at open.
    fn load(
        &mut self,
        progress: &mut dyn FnMut(usize, bool),
        cancel: &CancelFlag,
    ) -> Result<(), RenderFault> {
        if !cancel.is_cancelled() {
            progress(self.page_count(), true);
        }
        Ok(())
    }

    /// Rasterize into `req.target`. Long renders should poll `req.cancel`
    /// and may return early (with Ok) once it is raised; the completion is
    /// suppressed on the controlling side either way.
    fn render(&mut self, req: &RasterRequest<'_>) -> Result<(), RenderFault>;
}

/// One rasterization call at the engine boundary
pub struct RasterRequest<'a> {
    pub page: usize,
    pub layer: RenderLayer,
    /// Pixels per page unit
    pub zoom: f32,
    /// Page-space location of the target's top-left corner
    pub origin: Point,
    pub target: &'a Bitmap,
    pub cancel: &'a CancelFlag,
}
