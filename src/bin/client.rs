use std::time::Duration;

use anyhow::{Result, bail};
use greet_rpc::config::{DEMO_VAR, TransportConfig};
use greet_rpc::greet::GreetClient;
use greet_rpc::greet_proto::{
    GreetEveryoneRequest, GreetManyTimesRequest, GreetRequest, GreetWithDeadlineRequest, Greeting,
    LongGreetRequest,
};
use greet_rpc::rpc::{Connector, RpcClient, RpcClientConfig, RpcError, TcpConnector};
use tokio::sync::oneshot;
use tracing::{error, info};

const FRIENDS: [&str; 5] = ["Wembley", "Archie", "Reggie", "Veronica", "Betty"];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let transport = TransportConfig::client_from_env()?;
    let demo = std::env::var(DEMO_VAR).unwrap_or_else(|_| "all".to_string());

    info!(address = %transport.addr, demo = %demo, "Greet client starting");

    let client = GreetClient::new(RpcClient::new(
        TcpConnector::new(transport.addr),
        RpcClientConfig::builder().build(),
    ));

    match demo.as_str() {
        "unary" => do_unary(&client).await?,
        "server-streaming" => do_server_streaming(&client).await?,
        "client-streaming" => do_client_streaming(&client).await?,
        "bidi-streaming" => do_bidi_streaming(&client).await?,
        "deadline" => do_deadlines(&client).await?,
        "all" => {
            do_unary(&client).await?;
            do_server_streaming(&client).await?;
            do_client_streaming(&client).await?;
            do_bidi_streaming(&client).await?;
            do_deadlines(&client).await?;
        }
        other => bail!("unknown demo {other:?}, expected one of unary, server-streaming, client-streaming, bidi-streaming, deadline, all"),
    }

    Ok(())
}

async fn do_unary<C: Connector>(client: &GreetClient<C>) -> Result<()> {
    println!("Starting to do a unary RPC...");
    let response = client
        .greet(GreetRequest::new(Greeting::new("Wembley").with_last_name("Smith")))
        .await?;
    println!("Response from Greet: {}", response.result);
    Ok(())
}

async fn do_server_streaming<C: Connector>(client: &GreetClient<C>) -> Result<()> {
    println!("Starting to do a server streaming RPC...");
    let mut stream = client
        .greet_many_times(GreetManyTimesRequest::new(
            Greeting::new("Wembley").with_last_name("Smith"),
        ))
        .await?;

    while let Some(response) = stream.message().await? {
        println!("Response from GreetManyTimes: {}", response.result);
    }
    Ok(())
}

async fn do_client_streaming<C: Connector>(client: &GreetClient<C>) -> Result<()> {
    println!("Starting to do a client streaming RPC...");
    let mut call = client.long_greet().await?;

    for name in ["Archie", "Reggie", "Veronica"] {
        println!("Sending request: {name}");
        call.send(LongGreetRequest::new(Greeting::new(name))).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let response = call.close_and_receive().await?;
    println!("LongGreet response: {}", response.result);
    Ok(())
}

async fn do_bidi_streaming<C: Connector>(client: &GreetClient<C>) -> Result<()> {
    println!("Starting to do a bidirectional streaming RPC...");
    let (mut sender, mut receiver) = client.greet_everyone().await?.split();
    let (sent_tx, sent_rx) = oneshot::channel();

    tokio::spawn(async move {
        let result: Result<(), RpcError> = async {
            for name in FRIENDS {
                println!("Sending message: {name}");
                sender
                    .send(GreetEveryoneRequest::new(Greeting::new(name)))
                    .await?;
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            sender.close_send().await
        }
        .await;
        let _ = sent_tx.send(result);
    });

    let receive_loop = tokio::spawn(async move {
        while let Some(response) = receiver.message().await? {
            println!("Received: {}", response.result);
        }
        Ok::<_, RpcError>(())
    });

    let received = receive_loop.await?;
    let sent = sent_rx.await?;
    received?;
    sent?;
    Ok(())
}

async fn do_deadlines<C: Connector>(client: &GreetClient<C>) -> Result<()> {
    do_unary_with_deadline(client, Duration::from_secs(5)).await?;
    do_unary_with_deadline(client, Duration::from_secs(1)).await
}

async fn do_unary_with_deadline<C: Connector>(
    client: &GreetClient<C>,
    timeout: Duration,
) -> Result<()> {
    println!("Starting to do a unary with deadline RPC ({timeout:?})...");
    let request = GreetWithDeadlineRequest::new(Greeting::new("Wembley").with_last_name("Smith"));

    match client.greet_with_deadline(request, timeout).await {
        Ok(response) => println!("Response from GreetWithDeadline: {}", response.result),
        Err(RpcError::DeadlineExceeded) => println!("Timeout was hit! Deadline was exceeded"),
        Err(e) => {
            error!(error = %e, code = ?e.code(), "Unexpected error");
            return Err(e.into());
        }
    }
    Ok(())
}
