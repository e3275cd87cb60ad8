//! Client-side types.
//!
//! # Example
//!
//! ```ignore
//! use greet_rpc::rpc::client::{RpcClient, RpcClientConfig, TcpConnector};
//!
//! let client = RpcClient::new(TcpConnector::new(addr), RpcClientConfig::default());
//!
//! // Split a bidirectional call for separate send/receive tasks
//! let (mut sender, mut receiver) = client
//!     .bidi_streaming::<Request, Response>("package.Service/Method", CallOptions::default())
//!     .await?
//!     .split();
//! ```

mod config;
mod connector;
mod exchange;
mod rpc_client;

pub use config::RpcClientConfig;
pub use connector::{Connector, InProcessConnector, TcpConnector};
pub use exchange::{BidiStreaming, ClientStreaming, ServerStreaming};
pub use rpc_client::RpcClient;
