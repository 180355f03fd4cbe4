//! Viewport virtualization and tiled page rendering for document viewers.
//!
//! A [`doc::Doc`] opens a render engine and owns a worker pool; a
//! [`controller::PageController`] maps a scrollable viewport onto a bounded
//! set of recyclable page cells; a [`renderer::ViewRenderer`] turns the
//! visible cells into background render requests and folds the completed
//! pixels into per-cell tile matrices. All public types are driven from one
//! controlling thread; only rasterization happens elsewhere.

pub mod bitmap;
pub mod cell;
pub mod controller;
pub mod doc;
pub mod engine;
pub mod geom;
pub mod layout;
pub mod render;
pub mod renderer;
pub mod tiles;
pub mod viewing;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use bitmap::{Bitmap, BitmapKind, ColorProfile};
pub use controller::{ControllerOptions, PageController, PageControllerDelegate};
pub use doc::{Doc, DocEvent, DocOptions, Page};
pub use engine::{EngineSource, RasterRequest, RenderEngine, RenderLayer};
pub use geom::{Point, Rect, Size};
pub use render::{RenderFault, RenderHandle, RequestId};
pub use renderer::{CellProvider, ViewRenderer};
pub use viewing::{ViewingArchive, ViewingState, ViewingStateStack};
