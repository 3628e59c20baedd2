//! Tracking and reclamation of connection handler tasks.
//!
//! Every handler spawned by the acceptor is registered here together with a
//! finished flag. A dedicated reaper task joins handlers as they finish, and
//! [`Registry::stop`] joins whatever is still running during shutdown, so the
//! server never returns while a handler task is alive.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::error;

/// Initial capacity of the handler table. Grows by doubling.
const INITIAL_CAPACITY: usize = 64;

/// Wakeups delivered to the reaper.
#[derive(Debug)]
enum Notice {
    /// A handler has marked itself finished and can be joined.
    Finish,
    /// The reaper should exit; shutdown takes over the joining.
    Stop,
}

/// A registered handler task.
#[derive(Debug)]
struct Entry {
    id: u64,
    finished: bool,
    /// Taken out by whoever performs the join.
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct Shared {
    /// The handler table. Held only for bookkeeping; joins happen outside.
    entries: Mutex<Vec<Entry>>,
    notices: mpsc::UnboundedSender<Notice>,
    next_id: AtomicU64,
}

/// The set of live connection handlers plus the reaper that reclaims them.
///
/// Created by the acceptor at startup and consumed by [`Registry::stop`]
/// during shutdown.
#[derive(Debug)]
pub(crate) struct Registry {
    shared: Arc<Shared>,
    reaper: JoinHandle<()>,
}

/// Cloneable spawn capability handed to the accept loop.
#[derive(Debug, Clone)]
pub(crate) struct Spawner {
    shared: Arc<Shared>,
}

impl Registry {
    /// Allocates the handler table and starts the reaper task.
    pub(crate) fn new() -> Self {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            entries: Mutex::new(Vec::with_capacity(INITIAL_CAPACITY)),
            notices: notice_tx,
            next_id: AtomicU64::new(0),
        });
        let reaper = tokio::spawn(reap(Arc::clone(&shared), notice_rx));

        Registry { shared, reaper }
    }

    pub(crate) fn spawner(&self) -> Spawner {
        Spawner {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stops the reaper and joins every handler that is still registered.
    ///
    /// The reaper is joined first, so the drain below is the only activity
    /// touching the table and a plain oldest-first join loop suffices.
    /// Handlers are expected to return promptly once the shutdown signal
    /// has fired; a handler that ignores it delays this call indefinitely.
    pub(crate) async fn stop(self) {
        let _ = self.shared.notices.send(Notice::Stop);
        if let Err(err) = self.reaper.await {
            error!(cause = %err, "registry: failed to join reaper");
        }

        loop {
            let claimed = {
                let mut entries = self.shared.entries.lock().unwrap();
                entries
                    .first_mut()
                    .map(|entry| (entry.id, entry.handle.take()))
            };

            let Some((id, handle)) = claimed else { break };

            if let Some(handle) = handle {
                if let Err(err) = handle.await {
                    error!(cause = %err, "registry: failed to join handler");
                }
            }

            self.shared.remove(id);
        }
    }
}

impl Spawner {
    /// Spawns `task` as a tracked handler.
    ///
    /// The task is held back until its entry is in the table, so a handler
    /// can never finish before the reaper is able to find it. When the task
    /// completes it marks its entry finished and wakes the reaper.
    pub(crate) fn spawn<T>(&self, task: T)
    where
        T: Future<Output = ()> + Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (registered_tx, registered_rx) = oneshot::channel();

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            if registered_rx.await.is_err() {
                return;
            }

            task.await;

            shared.mark_finished(id);
        });

        let mut entries = self.shared.entries.lock().unwrap();
        entries.push(Entry {
            id,
            finished: false,
            handle: Some(handle),
        });
        drop(entries);

        let _ = registered_tx.send(());
    }
}

impl Shared {
    /// Marks `id` as finished and wakes the reaper.
    ///
    /// The flag is set before the notice is sent, both under the lock, so a
    /// received `Finish` always has a finished entry to claim. A send to a
    /// closed channel means the reaper has already exited; the drain in
    /// [`Registry::stop`] joins such handlers instead.
    fn mark_finished(&self, id: u64) {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.iter_mut().find(|entry| entry.id == id) else {
            return;
        };
        entry.finished = true;
        let _ = self.notices.send(Notice::Finish);
    }

    fn remove(&self, id: u64) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(index) = entries.iter().position(|entry| entry.id == id) {
            entries.remove(index);
        }
    }
}

/// Joins handlers as they signal completion.
///
/// Consumes exactly one notice per iteration, pairing each `Finish` with a
/// single scan of the table. The join happens outside the lock.
async fn reap(shared: Arc<Shared>, mut notices: mpsc::UnboundedReceiver<Notice>) {
    while let Some(notice) = notices.recv().await {
        match notice {
            Notice::Stop => break,
            Notice::Finish => {
                let claimed = {
                    let mut entries = shared.entries.lock().unwrap();
                    entries
                        .iter_mut()
                        .find(|entry| entry.finished && entry.handle.is_some())
                        .map(|entry| (entry.id, entry.handle.take()))
                };

                let Some((id, Some(handle))) = claimed else {
                    continue;
                };

                if let Err(err) = handle.await {
                    error!(cause = %err, "reaper: failed to join handler");
                }

                shared.remove(id);
            }
        }
    }
}
