use tokio::sync::watch;

/// Creates a connected trigger / observer pair.
///
/// The trigger side is held by the server supervisor; observer clones are
/// handed to the acceptor and to every connection handler.
pub(crate) fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { fired: tx }, Shutdown { fired: rx })
}

/// Requests server shutdown.
///
/// Firing is a one-way transition. The first call flips the channel, every
/// later call is a no-op, and any number of [`Shutdown`] observers wake up
/// once it happens.
#[derive(Debug)]
pub(crate) struct ShutdownTrigger {
    fired: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signals every observer to begin shutting down. Idempotent.
    pub(crate) fn fire(&self) {
        let already_fired = self.fired.send_replace(true);
        if !already_fired {
            tracing::debug!("shutdown requested");
        }
    }
}

/// Listens for the server shutdown signal.
///
/// Each observer holds its own receive handle, so a `Shutdown` can be
/// polled or awaited independently by the acceptor and by every connection
/// handler. Callers may query whether the signal has been received without
/// consuming it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// The receive half of the channel used to listen for shutdown signals.
    fired: watch::Receiver<bool>,
}

impl Shutdown {
    /// Returns `true` if the shutdown signal has been received.
    pub fn is_shutdown(&self) -> bool {
        *self.fired.borrow()
    }

    /// Receive the shutdown notice, waiting if necessary.
    ///
    /// Completes immediately if the signal has already been fired. Safe to
    /// use inside `select!` alongside connection I/O; a cancelled wait
    /// consumes nothing.
    pub async fn recv(&mut self) {
        loop {
            if *self.fired.borrow_and_update() {
                return;
            }

            // A dropped trigger releases waiters as well. The supervisor
            // always fires before dropping, so this only matters to
            // handlers that outlive an aborted server.
            if self.fired.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn recv_completes_after_fire() {
        let (trigger, mut shutdown) = channel();
        assert!(!shutdown.is_shutdown());

        trigger.fire();

        shutdown.recv().await;
        assert!(shutdown.is_shutdown());
    }

    #[tokio::test]
    async fn fire_is_idempotent() {
        let (trigger, mut shutdown) = channel();

        trigger.fire();
        trigger.fire();
        trigger.fire();

        shutdown.recv().await;
        // A second receive on the same observer must not block.
        shutdown.recv().await;
        assert!(shutdown.is_shutdown());
    }

    #[tokio::test]
    async fn all_observers_wake() {
        let (trigger, shutdown) = channel();

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move { shutdown.recv().await })
            })
            .collect();

        trigger.fire();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("observer did not wake after fire")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn poll_does_not_consume_the_signal() {
        let (trigger, shutdown) = channel();
        trigger.fire();

        let mut first = shutdown.clone();
        let mut second = shutdown;
        assert!(first.is_shutdown());
        assert!(second.is_shutdown());
        first.recv().await;
        second.recv().await;
    }
}
