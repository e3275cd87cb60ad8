use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use bon::Builder;
use futures::Stream;
use tonic::Status;
use tracing::{debug, info};

use crate::greet::{
    GREET, GREET_EVERYONE, GREET_MANY_TIMES, GREET_WITH_DEADLINE, LONG_GREET, hello,
};
use crate::greet_proto::{
    GreetEveryoneRequest, GreetEveryoneResponse, GreetManyTimesRequest, GreetManyTimesResponse,
    GreetRequest, GreetResponse, GreetWithDeadlineRequest, GreetWithDeadlineResponse,
    GreetingRequest, LongGreetRequest, LongGreetResponse,
};
use crate::rpc::{CallContext, RpcError, RpcReceiver, RpcRouter};

/// Pacing of the greeting service's slow methods.
#[derive(Debug, Clone, Builder)]
pub struct GreetServiceConfig {
    /// Responses produced by `GreetManyTimes`.
    #[builder(default = 10)]
    pub stream_count: u32,

    /// Pause between two `GreetManyTimes` responses.
    #[builder(default = Duration::from_secs(1))]
    pub stream_interval: Duration,

    /// Units of work `GreetWithDeadline` performs before answering.
    #[builder(default = 3)]
    pub deadline_steps: u32,

    #[builder(default = Duration::from_secs(1))]
    pub deadline_step: Duration,
}

impl Default for GreetServiceConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GreetService {
    config: GreetServiceConfig,
}

impl GreetService {
    pub fn new(config: GreetServiceConfig) -> Self {
        Self { config }
    }

    pub async fn greet(
        &self,
        _ctx: CallContext,
        request: GreetRequest,
    ) -> Result<GreetResponse, Status> {
        debug!(first_name = %request.first_name(), "Greet invoked");
        Ok(GreetResponse::new(hello(request.first_name())))
    }

    pub fn greet_many_times(
        &self,
        ctx: CallContext,
        request: GreetManyTimesRequest,
    ) -> impl Stream<Item = Result<GreetManyTimesResponse, Status>> + Send + use<> {
        let count = self.config.stream_count;
        let interval = self.config.stream_interval;
        let first_name = request.first_name().to_string();

        try_stream! {
            for i in 0..count {
                if i > 0 {
                    ctx.sleep(interval).await.map_err(Status::from)?;
                }
                ctx.checkpoint().map_err(Status::from)?;
                yield GreetManyTimesResponse::new(format!("Hello #{i}, {first_name}"));
            }
        }
    }

    /// Answers once the client has finished sending, naming every request in order.
    pub async fn long_greet(
        &self,
        ctx: CallContext,
        mut requests: RpcReceiver<LongGreetRequest>,
    ) -> Result<LongGreetResponse, Status> {
        let mut result = String::new();
        while let Some(request) = requests.message().await? {
            ctx.checkpoint()?;
            let _ = write!(result, "{}! ", request.first_name());
        }

        Ok(LongGreetResponse::new(result.trim_end()))
    }

    pub fn greet_everyone(
        &self,
        ctx: CallContext,
        mut requests: RpcReceiver<GreetEveryoneRequest>,
    ) -> impl Stream<Item = Result<GreetEveryoneResponse, Status>> + Send + use<> {
        try_stream! {
            while let Some(request) = requests.message().await.map_err(Status::from)? {
                ctx.checkpoint().map_err(Status::from)?;
                yield GreetEveryoneResponse::new(hello(request.first_name()));
            }
        }
    }

    /// A deliberately slow unary call that abandons its work once the
    /// caller's deadline passes or the caller cancels.
    pub async fn greet_with_deadline(
        &self,
        ctx: CallContext,
        request: GreetWithDeadlineRequest,
    ) -> Result<GreetWithDeadlineResponse, Status> {
        for step in 0..self.config.deadline_steps {
            let progress = match ctx.checkpoint() {
                Ok(()) => ctx.sleep(self.config.deadline_step).await,
                Err(e) => Err(e),
            };

            if let Err(e) = progress {
                info!(step, error = %e, "Abandoning greeting, caller gave up");
                return Err(e.into());
            }
        }

        Ok(GreetWithDeadlineResponse::new(hello(request.first_name())))
    }

    /// Register every method of the service on `router`.
    pub fn register(self, router: &mut RpcRouter) -> Result<(), RpcError> {
        let service = Arc::new(self);

        let svc = Arc::clone(&service);
        router.register_unary(GREET, move |ctx: CallContext, request: GreetRequest| {
            let svc = Arc::clone(&svc);
            async move { svc.greet(ctx, request).await }
        })?;

        let svc = Arc::clone(&service);
        router.register_server_streaming(
            GREET_MANY_TIMES,
            move |ctx: CallContext, request: GreetManyTimesRequest| {
                let stream = svc.greet_many_times(ctx, request);
                async move { Ok(stream) }
            },
        )?;

        let svc = Arc::clone(&service);
        router.register_client_streaming(
            LONG_GREET,
            move |ctx: CallContext, requests: RpcReceiver<LongGreetRequest>| {
                let svc = Arc::clone(&svc);
                async move { svc.long_greet(ctx, requests).await }
            },
        )?;

        let svc = Arc::clone(&service);
        router.register_bidi_streaming(
            GREET_EVERYONE,
            move |ctx: CallContext, requests: RpcReceiver<GreetEveryoneRequest>| {
                let stream = svc.greet_everyone(ctx, requests);
                async move { Ok(stream) }
            },
        )?;

        let svc = service;
        router.register_unary(
            GREET_WITH_DEADLINE,
            move |ctx: CallContext, request: GreetWithDeadlineRequest| {
                let svc = Arc::clone(&svc);
                async move { svc.greet_with_deadline(ctx, request).await }
            },
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::greet_proto::Greeting;
    use crate::rpc::{CallOptions, CancelSignal, Deadline};
    use futures::StreamExt;

    fn fast_service() -> GreetService {
        GreetService::new(
            GreetServiceConfig::builder()
                .stream_count(3)
                .stream_interval(Duration::from_millis(1))
                .deadline_steps(3)
                .deadline_step(Duration::from_millis(20))
                .build(),
        )
    }

    #[tokio::test]
    async fn test_greet() {
        let response = fast_service()
            .greet(
                CallContext::default(),
                GreetRequest::new(Greeting::new("Wembley")),
            )
            .await
            .unwrap();
        assert_eq!(response.result, "Hello Wembley");
    }

    #[tokio::test]
    async fn test_greet_many_times_numbers_responses() {
        let request = GreetManyTimesRequest::new(Greeting::new("Wembley"));
        let results: Vec<String> = fast_service()
            .greet_many_times(CallContext::default(), request)
            .map(|item| item.unwrap().result)
            .collect()
            .await;

        assert_eq!(
            results,
            ["Hello #0, Wembley", "Hello #1, Wembley", "Hello #2, Wembley"]
        );
    }

    #[tokio::test]
    async fn test_response_stream_outlives_service() {
        let service = fast_service();
        let stream = service.greet_many_times(
            CallContext::default(),
            GreetManyTimesRequest::new(Greeting::new("Reggie")),
        );
        drop(service);

        let handle = tokio::spawn(stream.map(|item| item.unwrap().result).collect::<Vec<_>>());
        let results = handle.await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[2], "Hello #2, Reggie");
    }

    #[tokio::test]
    async fn test_greet_many_times_stops_when_cancelled() {
        let (options, cancel) = CallOptions::cancellable();
        cancel.cancel();

        let request = GreetManyTimesRequest::new(Greeting::new("Wembley"));
        let mut stream = Box::pin(fast_service().greet_many_times(options.into_context(), request));

        let first = stream.next().await.unwrap();
        assert_eq!(first.unwrap_err().code(), tonic::Code::Cancelled);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_greet_with_deadline_gives_up() {
        let ctx = CallContext::new(
            Some(Deadline::after(Duration::from_millis(30))),
            CancelSignal::new(),
        );
        let request = GreetWithDeadlineRequest::new(Greeting::new("Wembley"));

        let status = fast_service()
            .greet_with_deadline(ctx, request)
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_greet_with_deadline_completes_in_time() {
        let ctx = CallContext::new(
            Some(Deadline::after(Duration::from_secs(5))),
            CancelSignal::new(),
        );
        let request = GreetWithDeadlineRequest::new(Greeting::new("Wembley"));

        let response = fast_service()
            .greet_with_deadline(ctx, request)
            .await
            .unwrap();
        assert_eq!(response.result, "Hello Wembley");
    }

    #[test]
    fn test_register_every_method() {
        let mut router = RpcRouter::new(Default::default());
        fast_service().register(&mut router).unwrap();

        for method in crate::greet::METHODS {
            assert!(router.has_handler(method));
        }

        let again = fast_service().register(&mut router);
        assert!(matches!(again, Err(RpcError::DuplicateHandler(_))));
    }
}
