use std::time::Duration;

use crate::greet::{GREET, GREET_EVERYONE, GREET_MANY_TIMES, GREET_WITH_DEADLINE, LONG_GREET};
use crate::greet_proto::{
    GreetEveryoneRequest, GreetEveryoneResponse, GreetManyTimesRequest, GreetManyTimesResponse,
    GreetRequest, GreetResponse, GreetWithDeadlineRequest, GreetWithDeadlineResponse,
    LongGreetRequest, LongGreetResponse,
};
use crate::rpc::{
    BidiStreaming, CallOptions, ClientStreaming, Connector, RpcClient, RpcError, ServerStreaming,
};

/// Typed client for `greet.GreetService`.
#[derive(Debug, Clone)]
pub struct GreetClient<C> {
    inner: RpcClient<C>,
}

impl<C: Connector> GreetClient<C> {
    pub fn new(inner: RpcClient<C>) -> Self {
        Self { inner }
    }

    pub async fn greet(&self, request: GreetRequest) -> Result<GreetResponse, RpcError> {
        self.inner
            .unary(GREET, request, CallOptions::default())
            .await
    }

    pub async fn greet_many_times(
        &self,
        request: GreetManyTimesRequest,
    ) -> Result<ServerStreaming<GreetManyTimesResponse>, RpcError> {
        self.inner
            .server_streaming(GREET_MANY_TIMES, request, CallOptions::default())
            .await
    }

    pub async fn long_greet(
        &self,
    ) -> Result<ClientStreaming<LongGreetRequest, LongGreetResponse>, RpcError> {
        self.inner
            .client_streaming(LONG_GREET, CallOptions::default())
            .await
    }

    pub async fn greet_everyone(
        &self,
    ) -> Result<BidiStreaming<GreetEveryoneRequest, GreetEveryoneResponse>, RpcError> {
        self.inner
            .bidi_streaming(GREET_EVERYONE, CallOptions::default())
            .await
    }

    /// Call `GreetWithDeadline`, giving up with `DeadlineExceeded` after `timeout`.
    pub async fn greet_with_deadline(
        &self,
        request: GreetWithDeadlineRequest,
        timeout: Duration,
    ) -> Result<GreetWithDeadlineResponse, RpcError> {
        let (options, _cancel) = CallOptions::with_deadline(timeout);
        self.inner
            .unary(GREET_WITH_DEADLINE, request, options)
            .await
    }

    /// Call `GreetWithDeadline` with caller-chosen options, e.g. to cancel it
    /// from another task.
    pub async fn greet_with_options(
        &self,
        request: GreetWithDeadlineRequest,
        options: CallOptions,
    ) -> Result<GreetWithDeadlineResponse, RpcError> {
        self.inner
            .unary(GREET_WITH_DEADLINE, request, options)
            .await
    }

    pub fn inner(&self) -> &RpcClient<C> {
        &self.inner
    }
}
