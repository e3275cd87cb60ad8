//! Server-side types.
//!
//! The [`RpcRouter`] owns the handler table. For each accepted connection it
//! reads the call header, opens a server session with the deadline the client
//! sent, and runs the registered handler on its own task.

mod config;
mod handler;
mod router;
mod session;

pub use config::RpcRouterConfig;
pub use router::RpcRouter;
pub use session::{SessionGuard, SessionMap};
