//! The accept loop task.
//!
//! A single background task waits for inbound connections and for the
//! shutdown signal in one `select!`, so it can never sleep through a
//! shutdown request. Each accepted connection is handed to the handler
//! registry as a tracked task.

use std::future::Future;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::registry::{Registry, Spawner};
use crate::shutdown::Shutdown;

/// The running accept loop and the handler registry it feeds.
#[derive(Debug)]
pub(crate) struct Acceptor {
    accept_loop: JoinHandle<TcpListener>,
    registry: Registry,
}

impl Acceptor {
    /// Starts the registry and the accept loop; returns immediately.
    pub(crate) fn start<F, Fut>(listener: TcpListener, shutdown: Shutdown, handler: F) -> Self
    where
        F: Fn(TcpStream, Shutdown) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let registry = Registry::new();
        let accept_loop = tokio::spawn(accept_loop(
            listener,
            shutdown,
            registry.spawner(),
            Arc::new(handler),
        ));

        Acceptor {
            accept_loop,
            registry,
        }
    }

    /// Joins the accept loop, then drains the handlers.
    ///
    /// Stopping the loop first guarantees no new handler appears in the
    /// registry while it is being drained. The listening socket is closed
    /// last, once every handler is gone.
    pub(crate) async fn stop(self) {
        let listener = match self.accept_loop.await {
            Ok(listener) => Some(listener),
            Err(err) => {
                error!(cause = %err, "acceptor: failed to join accept loop");
                None
            }
        };

        self.registry.stop().await;

        drop(listener);
    }
}

/// Accepts connections until the shutdown signal fires.
///
/// Per-connection failures are logged and skipped; only the shutdown signal
/// ends the loop. Returns the listener so the caller controls when the
/// socket closes.
async fn accept_loop<F, Fut>(
    listener: TcpListener,
    mut shutdown: Shutdown,
    handlers: Spawner,
    handler: Arc<F>,
) -> TcpListener
where
    F: Fn(TcpStream, Shutdown) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let (socket, peer) = tokio::select! {
            // Shutdown wins when both are ready, so no handler is spawned
            // from an accept that races the signal.
            biased;
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!(cause = %err, "acceptor: failed to accept connection");
                    continue;
                }
            },
        };

        info!("accepted connection from {peer}");

        let handler = Arc::clone(&handler);
        let connection_shutdown = shutdown.clone();
        handlers.spawn(async move { handler(socket, connection_shutdown).await });
    }

    listener
}
