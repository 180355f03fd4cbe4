//! Render service - worker pool and pending-request bookkeeping

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flume::{Receiver, Sender};

use crate::engine::EngineSource;
use crate::render::request::{CancelFlag, RenderFault, RequestId, WorkerJob, WorkerReply};
use crate::render::worker::render_worker;

/// Bookkeeping shared with outstanding `RenderHandle`s
#[derive(Debug)]
pub(crate) struct QueueShared {
    pending: Mutex<HashMap<RequestId, CancelFlag>>,
    next_id: AtomicU64,
}

impl QueueShared {
    fn remove(&self, id: RequestId) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    fn contains(&self, id: RequestId) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(&id)
    }
}

/// Owns the worker pool and the reply queue.
///
/// Cancellation is a pending-map removal on the controlling side plus a
/// worker-visible flag. Replies whose id is no longer pending are dropped
/// during `drain`, so once `RenderHandle::cancel` returns the completion is
/// guaranteed not to be delivered.
pub struct RenderService {
    job_tx: Sender<WorkerJob>,
    reply_rx: Receiver<WorkerReply>,
    shared: Arc<QueueShared>,
    num_workers: usize,
}

impl RenderService {
    /// Spawn `num_workers` threads, each with its own engine instance.
    pub(crate) fn start(
        source: &dyn EngineSource,
        num_workers: usize,
    ) -> Result<Self, RenderFault> {
        // Flume gives us MPMC: multiple workers pull from one shared job
        // queue, which std::sync::mpsc receivers cannot do.
        let (job_tx, job_rx) = flume::unbounded();
        let (reply_tx, reply_rx) = flume::unbounded();

        let num_workers = num_workers.max(1);
        for _ in 0..num_workers {
            let engine = source.open()?;
            let rx = job_rx.clone();
            let tx = reply_tx.clone();

            std::thread::spawn(move || {
                render_worker(engine, rx, tx);
            });
        }

        Ok(Self {
            job_tx,
            reply_rx,
            shared: Arc::new(QueueShared {
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
            num_workers,
        })
    }

    /// Assign an id and cancel flag, register the request as pending, and
    /// enqueue the job `build` produces for them.
    pub(crate) fn submit(
        &self,
        build: impl FnOnce(RequestId, CancelFlag) -> WorkerJob,
    ) -> RenderHandle {
        let id = RequestId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancelFlag::new();

        self.shared
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id, cancel.clone());

        let _ = self.job_tx.send(build(id, cancel.clone()));

        RenderHandle {
            id,
            cancel,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Drain worker replies, dropping those whose request was cancelled.
    /// Load progress keeps its pending entry until the final reply.
    pub(crate) fn drain(&self) -> Vec<WorkerReply> {
        let mut replies = vec![];

        while let Ok(reply) = self.reply_rx.try_recv() {
            let deliver = match &reply {
                WorkerReply::Done { id, .. } | WorkerReply::LoadFailed { id, .. } => {
                    self.shared.remove(*id)
                }
                WorkerReply::Loaded { id, complete, .. } => {
                    if *complete {
                        self.shared.remove(*id)
                    } else {
                        self.shared.contains(*id)
                    }
                }
            };

            if deliver {
                replies.push(reply);
            } else {
                log::debug!("dropping reply for cancelled request: {reply:?}");
            }
        }

        replies
    }

    /// Cancel every outstanding request.
    pub(crate) fn cancel_all(&self) {
        let mut pending = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for flag in pending.values() {
            flag.cancel();
        }
        pending.clear();
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Ask every worker to exit once the queue empties.
    pub(crate) fn shutdown(&self) {
        for _ in 0..self.num_workers {
            let _ = self.job_tx.send(WorkerJob::Shutdown);
        }
    }
}

impl Drop for RenderService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cancellable token for one in-flight request.
///
/// Dropping the handle does not cancel the request; the completion is still
/// delivered. `cancel` may be called before, during, or after completion.
#[derive(Clone, Debug)]
pub struct RenderHandle {
    id: RequestId,
    cancel: CancelFlag,
    shared: Arc<QueueShared>,
}

impl RenderHandle {
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Cancel the request. Idempotent. After this returns, the completion
    /// will not be delivered, even if the worker already finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.shared.remove(self.id);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
