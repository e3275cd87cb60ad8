use std::time::Duration;

use bon::Builder;

use crate::rpc::session::ChannelOptions;
use crate::rpc::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_MESSAGE_SIZE};

/// Configuration for the RPC router.
#[derive(Debug, Clone, Builder)]
pub struct RpcRouterConfig {
    /// Largest frame accepted from a client.
    #[builder(default = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,

    /// Messages buffered per direction before senders wait.
    #[builder(default = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// How long a new connection may take to send its call header.
    #[builder(default = Duration::from_secs(10))]
    pub handshake_timeout: Duration,
}

impl RpcRouterConfig {
    pub(crate) fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            max_message_size: self.max_message_size,
            channel_capacity: self.channel_capacity,
        }
    }
}

impl Default for RpcRouterConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
