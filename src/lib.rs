//! An embeddable TCP server framework.
//!
//! The single contribution of this crate is a correct connection lifecycle.
//! A caller supplies a service port and a per-connection handler; the
//! framework accepts connections and dispatches each to its own task. On
//! shutdown, every in-flight handler is notified and fully drained before
//! control returns to the caller.
//!
//! The bundled [`echo`] module and the `echo-server` / `echo-client`
//! binaries show the intended usage:
//!
//! ```no_run
//! #[tokio::main]
//! async fn main() -> moorage::Result<()> {
//!     moorage::run("7878", moorage::echo::echo).await
//! }
//! ```

mod acceptor;
mod registry;

pub mod client;
pub mod echo;
pub mod error;
pub mod server;
pub mod shutdown;

pub use client::EchoClient;
pub use error::Error;
pub use server::{run, serve};
pub use shutdown::Shutdown;

pub type Result<T> = std::result::Result<T, crate::error::Error>;
