//! Typed handlers behind a type-erased interface the router can store.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use prost::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tonic::Status;
use tracing::debug;

use crate::rpc::deadline::CallContext;
use crate::rpc::error::RpcError;
use crate::rpc::session::{ChannelOptions, Role, RpcReceiver, RpcSender, Session, SessionId};

/// A connection with its concrete type erased.
pub(crate) trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

pub(crate) type BoxedIo = Box<dyn Io>;

type ResponseStream<Resp> = BoxStream<'static, Result<Resp, Status>>;

type UnaryFn<Req, Resp> =
    dyn Fn(CallContext, Req) -> BoxFuture<'static, Result<Resp, Status>> + Send + Sync;
type ServerStreamingFn<Req, Resp> = dyn Fn(CallContext, Req) -> BoxFuture<'static, Result<ResponseStream<Resp>, Status>>
    + Send
    + Sync;
type ClientStreamingFn<Req, Resp> =
    dyn Fn(CallContext, RpcReceiver<Req>) -> BoxFuture<'static, Result<Resp, Status>> + Send + Sync;
type BidiStreamingFn<Req, Resp> = dyn Fn(CallContext, RpcReceiver<Req>) -> BoxFuture<'static, Result<ResponseStream<Resp>, Status>>
    + Send
    + Sync;

/// The four handler shapes, one per exchange kind.
pub(crate) enum HandlerFn<Req, Resp> {
    Unary(Arc<UnaryFn<Req, Resp>>),
    ServerStreaming(Arc<ServerStreamingFn<Req, Resp>>),
    ClientStreaming(Arc<ClientStreamingFn<Req, Resp>>),
    BidiStreaming(Arc<BidiStreamingFn<Req, Resp>>),
}

impl<Req, Resp> Clone for HandlerFn<Req, Resp> {
    fn clone(&self) -> Self {
        match self {
            HandlerFn::Unary(f) => HandlerFn::Unary(Arc::clone(f)),
            HandlerFn::ServerStreaming(f) => HandlerFn::ServerStreaming(Arc::clone(f)),
            HandlerFn::ClientStreaming(f) => HandlerFn::ClientStreaming(Arc::clone(f)),
            HandlerFn::BidiStreaming(f) => HandlerFn::BidiStreaming(Arc::clone(f)),
        }
    }
}

impl<Req, Resp> HandlerFn<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub(crate) fn unary<F, Fut>(f: F) -> Self
    where
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        HandlerFn::Unary(Arc::new(
            move |ctx: CallContext, req: Req| -> BoxFuture<'static, Result<Resp, Status>> {
                Box::pin(f(ctx, req))
            },
        ))
    }

    pub(crate) fn server_streaming<F, Fut, S>(f: F) -> Self
    where
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, Status>> + Send + 'static,
        S: Stream<Item = Result<Resp, Status>> + Send + 'static,
    {
        HandlerFn::ServerStreaming(Arc::new(
            move |ctx: CallContext,
                  req: Req|
                  -> BoxFuture<'static, Result<ResponseStream<Resp>, Status>> {
                let fut = f(ctx, req);
                Box::pin(async move { fut.await.map(|stream| stream.boxed()) })
            },
        ))
    }

    pub(crate) fn client_streaming<F, Fut>(f: F) -> Self
    where
        F: Fn(CallContext, RpcReceiver<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        HandlerFn::ClientStreaming(Arc::new(
            move |ctx: CallContext,
                  inbound: RpcReceiver<Req>|
                  -> BoxFuture<'static, Result<Resp, Status>> { Box::pin(f(ctx, inbound)) },
        ))
    }

    pub(crate) fn bidi_streaming<F, Fut, S>(f: F) -> Self
    where
        F: Fn(CallContext, RpcReceiver<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, Status>> + Send + 'static,
        S: Stream<Item = Result<Resp, Status>> + Send + 'static,
    {
        HandlerFn::BidiStreaming(Arc::new(
            move |ctx: CallContext,
                  inbound: RpcReceiver<Req>|
                  -> BoxFuture<'static, Result<ResponseStream<Resp>, Status>> {
                let fut = f(ctx, inbound);
                Box::pin(async move { fut.await.map(|stream| stream.boxed()) })
            },
        ))
    }
}

/// What the router stores per method path.
pub(crate) trait ErasedHandler: Send + Sync {
    /// Open a server session over `io` and run the call to completion.
    fn serve(
        &self,
        io: BoxedIo,
        session_id: SessionId,
        context: CallContext,
        options: ChannelOptions,
    ) -> BoxFuture<'static, ()>;
}

pub(crate) struct TypedHandler<Req, Resp> {
    handler: HandlerFn<Req, Resp>,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> TypedHandler<Req, Resp> {
    pub(crate) fn new(handler: HandlerFn<Req, Resp>) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp> ErasedHandler for TypedHandler<Req, Resp>
where
    Req: Message + Default + Send + 'static,
    Resp: Message + Send + 'static,
{
    fn serve(
        &self,
        io: BoxedIo,
        session_id: SessionId,
        context: CallContext,
        options: ChannelOptions,
    ) -> BoxFuture<'static, ()> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let session = Session::<Resp, Req>::open(
                io,
                session_id.clone(),
                Role::Server,
                context.clone(),
                options,
                None,
            );
            let (mut sender, mut receiver) = session.split();

            let outcome = match handler {
                HandlerFn::Unary(f) => {
                    serve_unary(&context, &mut sender, &mut receiver, f.as_ref()).await
                }
                HandlerFn::ServerStreaming(f) => {
                    serve_server_streaming(&context, &mut sender, &mut receiver, f.as_ref()).await
                }
                HandlerFn::ClientStreaming(f) => {
                    serve_client_streaming(&context, &mut sender, receiver, f.as_ref()).await
                }
                HandlerFn::BidiStreaming(f) => {
                    let stream = f(context.clone(), receiver).await;
                    match stream {
                        Ok(stream) => forward(&context, &mut sender, stream).await,
                        Err(status) => Err(status),
                    }
                }
            };

            let finished = match outcome {
                Ok(()) => sender.close_send().await,
                Err(status) => {
                    debug!(
                        session_id = %session_id,
                        code = ?status.code(),
                        message = %status.message(),
                        "Handler ended with error status"
                    );
                    sender.finish(status).await
                }
            };

            if let Err(e) = finished {
                // The session already failed; the peer has been told or is gone.
                debug!(session_id = %session_id, error = %e, "Could not deliver call status");
            }
        })
    }
}

/// Read exactly one request followed by the client's half-close.
async fn single_request<Req>(receiver: &mut RpcReceiver<Req>) -> Result<Req, Status>
where
    Req: Message + Default,
{
    let request = receiver
        .message()
        .await?
        .ok_or_else(|| Status::invalid_argument("expected one request, received none"))?;

    if receiver.message().await?.is_some() {
        return Err(Status::invalid_argument(
            "expected one request, received more than one",
        ));
    }

    Ok(request)
}

async fn respond<Resp: Message>(
    context: &CallContext,
    sender: &mut RpcSender<Resp>,
    response: Resp,
) -> Result<(), Status> {
    // A result computed after the deadline is not delivered.
    context.checkpoint()?;
    sender.send(response).await?;
    Ok(())
}

async fn serve_unary<Req, Resp>(
    context: &CallContext,
    sender: &mut RpcSender<Resp>,
    receiver: &mut RpcReceiver<Req>,
    f: &UnaryFn<Req, Resp>,
) -> Result<(), Status>
where
    Req: Message + Default + 'static,
    Resp: Message + 'static,
{
    let request = single_request(receiver).await?;
    let response = f(context.clone(), request).await?;
    respond(context, sender, response).await
}

async fn serve_server_streaming<Req, Resp>(
    context: &CallContext,
    sender: &mut RpcSender<Resp>,
    receiver: &mut RpcReceiver<Req>,
    f: &ServerStreamingFn<Req, Resp>,
) -> Result<(), Status>
where
    Req: Message + Default + 'static,
    Resp: Message + 'static,
{
    let request = single_request(receiver).await?;
    let stream = f(context.clone(), request).await?;
    forward(context, sender, stream).await
}

async fn serve_client_streaming<Req, Resp>(
    context: &CallContext,
    sender: &mut RpcSender<Resp>,
    receiver: RpcReceiver<Req>,
    f: &ClientStreamingFn<Req, Resp>,
) -> Result<(), Status>
where
    Req: 'static,
    Resp: Message + 'static,
{
    let response = f(context.clone(), receiver).await?;
    respond(context, sender, response).await
}

/// Send each item of a handler's response stream until it ends, fails, or
/// the call ends.
async fn forward<Resp: Message + 'static>(
    context: &CallContext,
    sender: &mut RpcSender<Resp>,
    mut stream: ResponseStream<Resp>,
) -> Result<(), Status> {
    loop {
        let item = tokio::select! {
            biased;
            fault = context.done() => return Err(RpcError::from(fault).into()),
            item = stream.next() => item,
        };

        match item {
            Some(Ok(response)) => sender.send(response).await?,
            Some(Err(status)) => return Err(status),
            None => return Ok(()),
        }
    }
}
