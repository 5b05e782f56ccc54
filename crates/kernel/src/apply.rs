//! Single-writer apply queue.
//!
//! Every mutation from the classifier and the sync reader runs as a job on one
//! thread, so a network batch never interleaves with a proximity pass.

use crate::store::VisibilityStore;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce(&VisibilityStore) + Send>;

enum Command {
    Run(Job),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("apply queue is closed")]
    Closed,
}

/// Cloneable submitter for the apply thread.
#[derive(Clone)]
pub struct ApplyHandle {
    sender: Sender<Command>,
}

impl ApplyHandle {
    pub fn submit<F>(&self, job: F) -> Result<(), ApplyError>
    where
        F: FnOnce(&VisibilityStore) + Send + 'static,
    {
        self.sender
            .send(Command::Run(Box::new(job)))
            .map_err(|_| ApplyError::Closed)
    }

    /// Run `job` on the apply thread and wait for its result.
    ///
    /// Must not be called from inside another job.
    pub fn run<F, R>(&self, job: F) -> Result<R, ApplyError>
    where
        F: FnOnce(&VisibilityStore) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.submit(move |store| {
            let _ = tx.send(job(store));
        })?;
        rx.recv().map_err(|_| ApplyError::Closed)
    }
}

pub struct ApplyQueue {
    handle: ApplyHandle,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ApplyQueue {
    pub fn spawn(store: Arc<VisibilityStore>) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded();
        let worker = std::thread::Builder::new()
            .name("fog-apply".into())
            .spawn(move || worker_loop(&store, receiver))?;
        Ok(Self {
            handle: ApplyHandle { sender },
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn handle(&self) -> ApplyHandle {
        self.handle.clone()
    }

    /// Run every job already queued, then stop the thread.
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = self.handle.sender.send(Command::Stop);
        if worker.join().is_err() {
            tracing::error!("apply thread panicked");
        }
    }
}

impl Drop for ApplyQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(store: &VisibilityStore, receiver: Receiver<Command>) {
    let mut jobs = 0u64;
    for command in receiver.iter() {
        match command {
            Command::Run(job) => {
                jobs += 1;
                if catch_unwind(AssertUnwindSafe(|| job(store))).is_err() {
                    tracing::error!("apply job panicked, continuing");
                }
            }
            Command::Stop => break,
        }
    }
    tracing::debug!(jobs, "apply thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use fogwar_common::{TilePosition, VisibilityState};

    #[test]
    fn jobs_run_in_order() {
        let store = Arc::new(VisibilityStore::default());
        let queue = ApplyQueue::spawn(store.clone()).unwrap();
        let handle = queue.handle();
        let pos = TilePosition::new(1, 1);
        handle
            .submit(move |s| {
                s.set_state(pos, VisibilityState::Hidden);
            })
            .unwrap();
        let state = handle.run(move |s| s.get_state(pos)).unwrap();
        assert_eq!(state, VisibilityState::Hidden);
    }

    #[test]
    fn shutdown_drains_pending_jobs() {
        let store = Arc::new(VisibilityStore::default());
        let queue = ApplyQueue::spawn(store.clone()).unwrap();
        let handle = queue.handle();
        for x in 0..100 {
            handle
                .submit(move |s| {
                    s.set_state(TilePosition::new(x, 0), VisibilityState::Hidden);
                })
                .unwrap();
        }
        queue.shutdown();
        assert_eq!(store.len(), 100);
        assert_eq!(handle.submit(|_| {}), Err(ApplyError::Closed));
        assert_eq!(handle.run(|_| ()), Err(ApplyError::Closed));
    }

    #[test]
    fn panicking_job_does_not_stop_queue() {
        let store = Arc::new(VisibilityStore::default());
        let queue = ApplyQueue::spawn(store).unwrap();
        let handle = queue.handle();
        handle.submit(|_| panic!("boom")).unwrap();
        assert_eq!(handle.run(|s| s.len()).unwrap(), 0);
    }
}
