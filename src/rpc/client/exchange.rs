//! Caller-side handles for the three streaming exchange shapes.

use futures::Stream;
use prost::Message;
use tokio::sync::oneshot;
use tracing::debug;

use crate::rpc::error::RpcError;
use crate::rpc::session::{RpcReceiver, RpcSender, Session, SessionId};

/// Receive exactly one message followed by end of stream.
pub(crate) async fn expect_single<T>(receiver: &mut RpcReceiver<T>) -> Result<T, RpcError>
where
    T: Message + Default,
{
    let message = receiver.message().await?.ok_or_else(|| {
        RpcError::Channel("call completed without a response".to_string())
    })?;

    if receiver.message().await?.is_some() {
        return Err(RpcError::Channel(
            "call produced more than one response".to_string(),
        ));
    }

    Ok(message)
}

/// The response sequence of a server-streaming call.
///
/// The sequence is finite and cannot be restarted. Read it until
/// `Ok(None)` to release the call cleanly.
#[derive(Debug)]
pub struct ServerStreaming<Resp> {
    receiver: RpcReceiver<Resp>,
}

impl<Resp> ServerStreaming<Resp>
where
    Resp: Message + Default,
{
    pub(crate) fn new(receiver: RpcReceiver<Resp>) -> Self {
        Self { receiver }
    }

    /// The next response, or `Ok(None)` once the server has finished.
    pub async fn message(&mut self) -> Result<Option<Resp>, RpcError> {
        self.receiver.message().await
    }

    pub fn session_id(&self) -> &SessionId {
        self.receiver.session_id()
    }

    /// Abandon the call, cancelling it if responses are still pending.
    pub fn close(&mut self) {
        self.receiver.close();
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Resp, RpcError>> + Send + 'static
    where
        Resp: Send + 'static,
    {
        self.receiver.into_stream()
    }
}

/// A client-streaming call: push requests, half-close, then take the one response.
#[derive(Debug)]
pub struct ClientStreaming<Req, Resp> {
    session: Session<Req, Resp>,
}

impl<Req, Resp> ClientStreaming<Req, Resp>
where
    Req: Message,
    Resp: Message + Default,
{
    pub(crate) fn new(session: Session<Req, Resp>) -> Self {
        Self { session }
    }

    pub async fn send(&mut self, request: Req) -> Result<(), RpcError> {
        self.session.send(request).await
    }

    /// Signal that no more requests follow. Call exactly once.
    pub async fn close_send(&mut self) -> Result<(), RpcError> {
        self.session.close_send().await
    }

    /// Wait for the single response.
    ///
    /// Fails with `InvalidState` if [`close_send`](Self::close_send) has not
    /// been called, since the server only answers after end of requests.
    pub async fn receive_final(&mut self) -> Result<Resp, RpcError> {
        if !self.session.sender_mut().is_send_closed() {
            return Err(RpcError::InvalidState(
                "receive_final before close_send".to_string(),
            ));
        }
        expect_single(self.session.receiver_mut()).await
    }

    pub async fn close_and_receive(mut self) -> Result<Resp, RpcError> {
        self.close_send().await?;
        self.receive_final().await
    }

    pub fn session_id(&self) -> &SessionId {
        self.session.id()
    }

    pub fn close(&mut self) {
        self.session.close();
    }
}

/// A bidirectional-streaming call.
///
/// Requests and responses progress independently. Either drive both from one
/// place with [`exchange`](Self::exchange), or [`split`](Self::split) the call
/// and run a send loop and a receive loop separately. The call is complete
/// only once the send loop has half-closed and the receive loop has seen
/// `Ok(None)`.
#[derive(Debug)]
pub struct BidiStreaming<Req, Resp> {
    session: Session<Req, Resp>,
}

impl<Req, Resp> BidiStreaming<Req, Resp>
where
    Req: Message,
    Resp: Message + Default,
{
    pub(crate) fn new(session: Session<Req, Resp>) -> Self {
        Self { session }
    }

    pub async fn send(&mut self, request: Req) -> Result<(), RpcError> {
        self.session.send(request).await
    }

    pub async fn message(&mut self) -> Result<Option<Resp>, RpcError> {
        self.session.receive().await
    }

    pub async fn close_send(&mut self) -> Result<(), RpcError> {
        self.session.close_send().await
    }

    pub fn session_id(&self) -> &SessionId {
        self.session.id()
    }

    pub fn close(&mut self) {
        self.session.close();
    }

    pub fn split(self) -> (RpcSender<Req>, RpcReceiver<Resp>) {
        self.session.split()
    }

    /// Send every request from a spawned task while collecting responses here.
    ///
    /// Returns once both loops have finished. If both fail, the receive
    /// loop's error is returned; it is the session's first failure.
    pub async fn exchange<I>(self, requests: I) -> Result<Vec<Resp>, RpcError>
    where
        I: IntoIterator<Item = Req>,
        I::IntoIter: Send + 'static,
        Req: Send + 'static,
    {
        let (mut sender, mut receiver) = self.split();
        let session_id = sender.session_id().clone();
        let (sent_tx, sent_rx) = oneshot::channel();
        let requests = requests.into_iter();

        tokio::spawn(async move {
            let result: Result<(), RpcError> = async {
                for request in requests {
                    sender.send(request).await?;
                }
                sender.close_send().await
            }
            .await;
            let _ = sent_tx.send(result);
        });

        let mut responses = Vec::new();
        let received = loop {
            match receiver.message().await {
                Ok(Some(response)) => responses.push(response),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        let sent = sent_rx
            .await
            .unwrap_or_else(|_| Err(RpcError::Channel("send loop aborted".to_string())));

        debug!(
            session_id = %session_id,
            responses = responses.len(),
            "Bidirectional exchange finished"
        );

        received?;
        sent?;
        Ok(responses)
    }
}
