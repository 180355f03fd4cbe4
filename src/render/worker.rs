//! Render worker - runs in separate thread(s)

use flume::{Receiver, Sender};

use crate::bitmap::Bitmap;
use crate::engine::{RasterRequest, RenderEngine};
use crate::render::request::{CancelFlag, RenderFault, RenderTask, RequestId, WorkerJob, WorkerReply};

/// Main worker function. Each worker owns its engine instance and a scratch
/// bitmap reused across update renders.
pub(crate) fn render_worker(
    mut engine: Box<dyn RenderEngine>,
    jobs: Receiver<WorkerJob>,
    replies: Sender<WorkerReply>,
) {
    let mut scratch: Option<Bitmap> = None;

    for job in jobs {
        match job {
            WorkerJob::Render(task) => {
                handle_render(engine.as_mut(), &mut scratch, task, &replies);
            }

            WorkerJob::Load { id, cancel } => {
                handle_load(engine.as_mut(), id, &cancel, &replies);
            }

            WorkerJob::Shutdown => break,
        }
    }
}

fn handle_render(
    engine: &mut dyn RenderEngine,
    scratch: &mut Option<Bitmap>,
    task: RenderTask,
    replies: &Sender<WorkerReply>,
) {
    // A task cancelled before we picked it up still gets its one reply; the
    // controlling side has already dropped the pending entry and will
    // discard it.
    if task.cancel.is_cancelled() {
        let _ = replies.send(WorkerReply::Done {
            id: task.id,
            page: task.page,
            result: Ok(()),
        });
        return;
    }

    let result = if task.update {
        render_staged(engine, scratch, &task)
    } else {
        render_direct(engine, &task)
    };

    if let Err(ref fault) = result {
        log::warn!("render of page {} failed: {fault}", task.page);
    }

    let _ = replies.send(WorkerReply::Done {
        id: task.id,
        page: task.page,
        result,
    });
}

fn render_direct(engine: &mut dyn RenderEngine, task: &RenderTask) -> Result<(), RenderFault> {
    engine.render(&RasterRequest {
        page: task.page,
        layer: task.layer,
        zoom: task.zoom,
        origin: task.origin,
        target: &task.target,
        cancel: &task.cancel,
    })?;
    task.target.apply_dark_mode();
    Ok(())
}

/// Update path: rasterize into worker-private scratch, then copy into the
/// live target in one pass. The displayed buffer never holds a half-drawn
/// frame.
fn render_staged(
    engine: &mut dyn RenderEngine,
    scratch: &mut Option<Bitmap>,
    task: &RenderTask,
) -> Result<(), RenderFault> {
    let width = task.target.width();
    let height = task.target.height();

    let buf = scratch.get_or_insert_with(|| Bitmap::new(width, height, task.target.kind()));
    if buf.kind() != task.target.kind() {
        *buf = Bitmap::new(width, height, task.target.kind());
    } else {
        buf.adjust_to_size(width, height);
    }
    buf.set_dark_mode(task.target.dark_mode());

    engine.render(&RasterRequest {
        page: task.page,
        layer: task.layer,
        zoom: task.zoom,
        origin: task.origin,
        target: buf,
        cancel: &task.cancel,
    })?;
    buf.apply_dark_mode();

    if task.cancel.is_cancelled() {
        return Ok(());
    }
    task.target.copy_from(buf);
    Ok(())
}

fn handle_load(
    engine: &mut dyn RenderEngine,
    id: RequestId,
    cancel: &CancelFlag,
    replies: &Sender<WorkerReply>,
) {
    let mut report = |count: usize, complete: bool| {
        let _ = replies.send(WorkerReply::Loaded {
            id,
            count,
            complete,
        });
    };

    if let Err(error) = engine.load(&mut report, cancel) {
        log::warn!("page discovery failed: {error}");
        let _ = replies.send(WorkerReply::LoadFailed { id, error });
    }
}
