//! TCP server supervisor.
//!
//! Provides an async `run` entry point that binds a listening socket and
//! dispatches inbound connections to per-connection handler tasks. On
//! shutdown it drains every in-flight handler before returning control to
//! the caller.

use std::future::Future;
use std::net::SocketAddr;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::info;

use crate::acceptor::Acceptor;
use crate::shutdown::{self, Shutdown};
use crate::{Error, Result};

/// Listen backlog passed to the OS.
const BACKLOG: u32 = 1024;

/// Runs the server on `service` until the operator requests shutdown.
///
/// `service` is a TCP port number; the listening socket is bound on all
/// interfaces with address reuse enabled. `handler` is invoked once per
/// accepted connection in its own task. It owns the stream for its
/// duration (the socket closes when the handler returns) and must fold the
/// provided [`Shutdown`] observer into any blocking wait it performs, since
/// shutdown is cooperative and nothing cancels a handler that ignores it.
///
/// Shutdown is requested by SIGINT or by end-of-file on standard input.
/// Errors are returned only for setup failures before the accept loop has
/// started; once the server is accepting, `run` converges to `Ok` on every
/// shutdown path.
pub async fn run<F, Fut>(service: &str, handler: F) -> Result<()>
where
    F: Fn(TcpStream, Shutdown) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = listen(service)?;
    // Installed before the accept loop starts, so an interrupt arriving
    // during setup is already routed to the graceful path.
    let interrupt = signal(SignalKind::interrupt())?;
    info!("listening on {}", listener.local_addr()?);

    serve(listener, operator_shutdown(interrupt), handler).await;

    Ok(())
}

/// Runs the server on an already bound listener until `shutdown` completes.
///
/// The embeddable form of [`run`]: the caller supplies the listener and the
/// shutdown trigger as a future. Once that future completes, the quit
/// signal is fired, the accept loop is joined, every live handler is
/// drained, and the listening socket is closed, in that order. Teardown is
/// best-effort throughout; join failures are logged and never cut the
/// sequence short.
pub async fn serve<F, Fut>(listener: TcpListener, shutdown: impl Future<Output = ()>, handler: F)
where
    F: Fn(TcpStream, Shutdown) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (trigger, observer) = shutdown::channel();
    let acceptor = Acceptor::start(listener, observer, handler);

    shutdown.await;
    info!("shutting down");

    trigger.fire();
    acceptor.stop().await;
}

/// Creates the listening socket: all interfaces, address reuse, a generous
/// backlog.
fn listen(service: &str) -> Result<TcpListener> {
    let port: u16 = service
        .parse()
        .map_err(|_| Error::InvalidService(service.to_string()))?;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;

    Ok(socket.listen(BACKLOG)?)
}

/// Completes when the operator requests shutdown: SIGINT, or end-of-file on
/// standard input.
async fn operator_shutdown(mut interrupt: Signal) {
    tokio::select! {
        received = interrupt.recv() => {
            if received.is_some() {
                // The newline moves the shell prompt off the echoed "^C".
                println!();
            }
        }
        _ = stdin_closed() => {}
    }
}

/// Completes once standard input reaches end-of-file. Input bytes are read
/// and discarded.
async fn stdin_closed() {
    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; 256];

    loop {
        match stdin.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
