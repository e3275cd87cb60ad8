//! # rpc
//!
//! Streaming RPC over any ordered byte connection.
//!
//! Every call runs on its own connection as a [`Session`] with two
//! independently driven directions. Four exchange shapes are built on it:
//!
//! - unary: one request, one response
//! - server streaming: one request, a finite ordered sequence of responses
//! - client streaming: a finite ordered sequence of requests, one response
//!   sent only after the client half-closes
//! - bidirectional streaming: both sequences progress concurrently with no
//!   required pairing
//!
//! ## Server Side
//!
//! ```ignore
//! use greet_rpc::rpc::{RpcRouter, RpcRouterConfig};
//!
//! let mut router = RpcRouter::new(RpcRouterConfig::builder().build());
//!
//! router.register_unary::<Request, Response, _, _>(
//!     "package.Service/Method",
//!     |ctx, request| async move {
//!         ctx.checkpoint()?;
//!         Ok(Response::from(request))
//!     },
//! )?;
//!
//! router.serve(listener).await?;
//! ```
//!
//! ## Client Side
//!
//! ```ignore
//! use greet_rpc::rpc::{CallOptions, RpcClient, RpcClientConfig, TcpConnector};
//!
//! let client = RpcClient::new(TcpConnector::new(addr), RpcClientConfig::builder().build());
//!
//! let (options, cancel) = CallOptions::with_deadline(Duration::from_secs(1));
//! match client.unary::<Request, Response>("package.Service/Method", request, options).await {
//!     Ok(response) => println!("{response:?}"),
//!     Err(e) if e.is_expected() => println!("gave up: {e}"),
//!     Err(e) => return Err(e.into()),
//! }
//! ```
//!
//! ## Deadlines
//!
//! A caller's timeout is fixed into an absolute deadline when the call opens
//! and carried to the handler in the call header. Handlers observe it, and
//! any cancellation, cooperatively through [`CallContext::checkpoint`].

mod deadline;
mod error;
mod frame;
mod session;

pub mod client;
pub mod server;

pub use deadline::{CallContext, CallOptions, CancelHandle, CancelSignal, Deadline};
pub use error::RpcError;
pub use session::{Role, RpcReceiver, RpcSender, Session, SessionId};

pub use client::{
    BidiStreaming, ClientStreaming, Connector, InProcessConnector, RpcClient, RpcClientConfig,
    ServerStreaming, TcpConnector,
};
pub use server::{RpcRouter, RpcRouterConfig, SessionGuard, SessionMap};

/// Default upper bound on a single encoded frame.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Default number of messages buffered per direction.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;
