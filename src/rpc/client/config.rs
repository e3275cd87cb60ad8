use std::time::Duration;

use bon::Builder;

use crate::rpc::session::ChannelOptions;
use crate::rpc::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_MESSAGE_SIZE};

/// Configuration for the RPC client.
#[derive(Debug, Clone, Builder)]
pub struct RpcClientConfig {
    /// Largest frame accepted from the server.
    #[builder(default = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,

    /// Messages buffered per direction before senders wait.
    #[builder(default = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// Timeout applied to calls whose options carry none.
    pub default_timeout: Option<Duration>,
}

impl RpcClientConfig {
    pub(crate) fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            max_message_size: self.max_message_size,
            channel_capacity: self.channel_capacity,
        }
    }
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
