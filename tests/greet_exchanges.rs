use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use greet_rpc::greet::{self, GreetClient, GreetService, GreetServiceConfig};
use greet_rpc::greet_proto::{
    GreetEveryoneRequest, GreetManyTimesRequest, GreetRequest, GreetResponse,
    GreetWithDeadlineRequest, Greeting, LongGreetRequest, LongGreetResponse,
};
use greet_rpc::rpc::{
    CallOptions, InProcessConnector, RpcClient, RpcClientConfig, RpcError, RpcRouter,
    RpcRouterConfig,
};
use tokio::sync::oneshot;
use tonic::Code;

fn test_config() -> GreetServiceConfig {
    GreetServiceConfig::builder()
        .stream_count(10)
        .stream_interval(Duration::from_millis(5))
        .deadline_steps(3)
        .deadline_step(Duration::from_millis(50))
        .build()
}

fn setup() -> (Arc<RpcRouter>, GreetClient<InProcessConnector>) {
    setup_with(test_config())
}

fn setup_with(config: GreetServiceConfig) -> (Arc<RpcRouter>, GreetClient<InProcessConnector>) {
    let mut router = RpcRouter::new(RpcRouterConfig::builder().build());
    GreetService::new(config).register(&mut router).unwrap();
    let router = Arc::new(router);

    let client = GreetClient::new(RpcClient::new(
        InProcessConnector::new(Arc::clone(&router)),
        RpcClientConfig::builder().build(),
    ));
    (router, client)
}

fn slow_config() -> GreetServiceConfig {
    GreetServiceConfig::builder()
        .stream_count(10)
        .stream_interval(Duration::from_millis(200))
        .deadline_steps(10)
        .deadline_step(Duration::from_millis(200))
        .build()
}

/// The router drops its session entry just after the trailer is written.
async fn wait_for_idle(router: &RpcRouter) {
    wait_for_idle_within(router, Duration::from_millis(500)).await;
}

async fn wait_for_idle_within(router: &RpcRouter, bound: Duration) {
    let started = tokio::time::Instant::now();
    while started.elapsed() < bound {
        if router.active_sessions() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "{} sessions still active after {bound:?}",
        router.active_sessions()
    );
}

#[tokio::test]
async fn test_unary_greet() {
    let (router, client) = setup();

    let response = client
        .greet(GreetRequest::new(Greeting::new("Wembley")))
        .await
        .unwrap();

    assert_eq!(response.result, "Hello Wembley");
    wait_for_idle(&router).await;
}

#[tokio::test]
async fn test_server_streaming_is_ordered_and_ends() {
    let (_router, client) = setup();

    let mut stream = client
        .greet_many_times(GreetManyTimesRequest::new(Greeting::new("Wembley")))
        .await
        .unwrap();

    let mut results = Vec::new();
    while let Some(response) = stream.message().await.unwrap() {
        results.push(response.result);
    }

    let expected: Vec<String> = (0..10).map(|i| format!("Hello #{i}, Wembley")).collect();
    assert_eq!(results, expected);

    // End of stream is sticky, not an error.
    assert!(stream.message().await.unwrap().is_none());
    assert!(stream.message().await.unwrap().is_none());
}

#[tokio::test]
async fn test_server_streaming_as_stream() {
    let (_router, client) = setup();

    let stream = client
        .greet_many_times(GreetManyTimesRequest::new(Greeting::new("Archie")))
        .await
        .unwrap();

    let results: Vec<String> = stream
        .into_stream()
        .map(|item| item.unwrap().result)
        .collect()
        .await;
    assert_eq!(results.len(), 10);
    assert_eq!(results[9], "Hello #9, Archie");
}

#[tokio::test]
async fn test_client_streaming_concatenates_in_order() {
    let (router, client) = setup();

    let mut call = client.long_greet().await.unwrap();
    for name in ["Archie", "Reggie", "Veronica"] {
        call.send(LongGreetRequest::new(Greeting::new(name)))
            .await
            .unwrap();
    }

    let response = call.close_and_receive().await.unwrap();
    assert_eq!(response.result, "Archie! Reggie! Veronica!");
    wait_for_idle(&router).await;
}

#[tokio::test]
async fn test_client_streaming_without_requests() {
    let (_router, client) = setup();

    let call = client.long_greet().await.unwrap();
    let response = call.close_and_receive().await.unwrap();
    assert_eq!(response.result, "");
}

#[tokio::test]
async fn test_receive_final_before_close_send() {
    let (_router, client) = setup();

    let mut call = client.long_greet().await.unwrap();
    call.send(LongGreetRequest::new(Greeting::new("Archie")))
        .await
        .unwrap();

    let result = call.receive_final().await;
    assert!(matches!(result, Err(RpcError::InvalidState(_))));

    // The call is still usable afterwards.
    call.close_send().await.unwrap();
    assert_eq!(call.receive_final().await.unwrap().result, "Archie!");
}

#[tokio::test]
async fn test_send_after_close_send() {
    let (_router, client) = setup();

    let mut call = client.long_greet().await.unwrap();
    call.close_send().await.unwrap();

    let result = call.send(LongGreetRequest::new(Greeting::new("late"))).await;
    assert!(matches!(result, Err(RpcError::InvalidState(_))));
}

#[tokio::test]
async fn test_bidi_receive_progresses_before_send_finishes() {
    let (router, client) = setup();

    let (mut sender, mut receiver) = client.greet_everyone().await.unwrap().split();

    // The first response arrives while the send direction is still open.
    sender
        .send(GreetEveryoneRequest::new(Greeting::new("Archie")))
        .await
        .unwrap();
    let first = receiver.message().await.unwrap().unwrap();
    assert_eq!(first.result, "Hello Archie");
    assert!(!sender.is_send_closed());

    let (sent_tx, sent_rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = async {
            for name in ["Reggie", "Veronica"] {
                sender
                    .send(GreetEveryoneRequest::new(Greeting::new(name)))
                    .await?;
            }
            sender.close_send().await
        }
        .await;
        let _ = sent_tx.send(result);
    });

    let mut rest = Vec::new();
    while let Some(response) = receiver.message().await.unwrap() {
        rest.push(response.result);
    }

    sent_rx.await.unwrap().unwrap();
    assert_eq!(rest, ["Hello Reggie", "Hello Veronica"]);
    wait_for_idle(&router).await;
}

#[tokio::test]
async fn test_bidi_exchange() {
    let (router, client) = setup();

    let requests = ["Wembley", "Archie", "Reggie", "Veronica", "Betty"]
        .map(|name| GreetEveryoneRequest::new(Greeting::new(name)));

    let responses = client
        .greet_everyone()
        .await
        .unwrap()
        .exchange(requests)
        .await
        .unwrap();

    let results: Vec<&str> = responses.iter().map(|r| r.result.as_str()).collect();
    assert_eq!(
        results,
        [
            "Hello Wembley",
            "Hello Archie",
            "Hello Reggie",
            "Hello Veronica",
            "Hello Betty"
        ]
    );
    wait_for_idle(&router).await;
}

#[tokio::test]
async fn test_deadline_exceeded() {
    let (router, client) = setup();

    // Three 50ms steps cannot finish within 80ms.
    let result = client
        .greet_with_deadline(
            GreetWithDeadlineRequest::new(Greeting::new("Wembley")),
            Duration::from_millis(80),
        )
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, RpcError::DeadlineExceeded));
    assert!(err.is_expected());
    assert_eq!(err.code(), Code::DeadlineExceeded);
    wait_for_idle(&router).await;
}

#[tokio::test]
async fn test_deadline_met() {
    let (_router, client) = setup();

    let response = client
        .greet_with_deadline(
            GreetWithDeadlineRequest::new(Greeting::new("Wembley")),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(response.result, "Hello Wembley");
}

#[tokio::test]
async fn test_cancel_reaches_handler() {
    let (router, client) = setup();

    let (options, cancel) = CallOptions::cancellable();
    let call = tokio::spawn(async move {
        client
            .greet_with_options(
                GreetWithDeadlineRequest::new(Greeting::new("Wembley")),
                options,
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, RpcError::Cancelled));
    assert!(err.is_expected());
    wait_for_idle(&router).await;
}

#[tokio::test]
async fn test_unknown_method() {
    let (router, client) = setup();

    let result = client
        .inner()
        .unary::<GreetRequest, GreetResponse>(
            "greet.GreetService/Missing",
            GreetRequest::new(Greeting::new("Wembley")),
            CallOptions::default(),
        )
        .await;

    match result {
        Err(RpcError::Status(status)) => assert_eq!(status.code(), Code::Unimplemented),
        other => panic!("expected unimplemented status, got {other:?}"),
    }
    assert!(!router.has_handler("greet.GreetService/Missing"));
}

#[tokio::test]
async fn test_unary_rejects_streamed_requests() {
    let (_router, client) = setup();

    let mut session = client
        .inner()
        .open::<GreetRequest, GreetResponse>(greet::GREET, CallOptions::default())
        .await
        .unwrap();
    session
        .send(GreetRequest::new(Greeting::new("one")))
        .await
        .unwrap();
    session
        .send(GreetRequest::new(Greeting::new("two")))
        .await
        .unwrap();
    session.close_send().await.unwrap();

    match session.receive().await {
        Err(RpcError::Status(status)) => assert_eq!(status.code(), Code::InvalidArgument),
        other => panic!("expected invalid argument, got {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_calls_are_isolated() {
    let (router, client) = setup();

    let calls = ["Archie", "Reggie", "Veronica", "Betty"].map(|name| {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .greet(GreetRequest::new(Greeting::new(name)))
                .await
                .map(|response| response.result)
        })
    });

    for (call, name) in calls.into_iter().zip(["Archie", "Reggie", "Veronica", "Betty"]) {
        assert_eq!(call.await.unwrap().unwrap(), format!("Hello {name}"));
    }
    wait_for_idle(&router).await;
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (_router, client) = setup();

    let mut stream = client
        .greet_many_times(GreetManyTimesRequest::new(Greeting::new("Wembley")))
        .await
        .unwrap();
    stream.close();
    stream.close();

    assert!(matches!(
        stream.message().await,
        Err(RpcError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_long_greet_answers_only_after_close_send() {
    let (_router, client) = setup();

    let mut session = client
        .inner()
        .open::<LongGreetRequest, LongGreetResponse>(greet::LONG_GREET, CallOptions::default())
        .await
        .unwrap();
    for name in ["Archie", "Reggie", "Veronica"] {
        session
            .send(LongGreetRequest::new(Greeting::new(name)))
            .await
            .unwrap();
    }

    let early = tokio::time::timeout(Duration::from_millis(100), session.receive()).await;
    assert!(early.is_err(), "response arrived before close_send: {early:?}");

    session.close_send().await.unwrap();
    let response = session.receive().await.unwrap().unwrap();
    assert_eq!(response.result, "Archie! Reggie! Veronica!");
    assert!(session.receive().await.unwrap().is_none());
}

#[tokio::test]
async fn test_dropping_server_stream_stops_handler() {
    let (router, client) = setup_with(slow_config());

    let mut stream = client
        .greet_many_times(GreetManyTimesRequest::new(Greeting::new("Wembley")))
        .await
        .unwrap();
    let first = stream.message().await.unwrap().unwrap();
    assert_eq!(first.result, "Hello #0, Wembley");
    assert_eq!(router.active_calls(greet::GREET_MANY_TIMES), 1);

    drop(stream);

    // The remaining nine responses would take 1.8s.
    wait_for_idle_within(&router, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_abandoned_unary_stops_handler() {
    let (router, client) = setup_with(slow_config());

    let call = client.greet_with_options(
        GreetWithDeadlineRequest::new(Greeting::new("Wembley")),
        CallOptions::default(),
    );
    let result = tokio::time::timeout(Duration::from_millis(50), call).await;
    assert!(result.is_err());

    wait_for_idle_within(&router, Duration::from_millis(200)).await;
    assert_eq!(router.active_calls(greet::GREET_WITH_DEADLINE), 0);
}
