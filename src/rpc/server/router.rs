use futures::Stream;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tonic::{Code, Status};
use tracing::{debug, error, info, warn};

use crate::rpc::deadline::{CallContext, CancelSignal, Deadline};
use crate::rpc::error::RpcError;
use crate::rpc::frame::{CallHeader, CallStatus, Frame, read_frame, write_frame};
use crate::rpc::server::config::RpcRouterConfig;
use crate::rpc::server::handler::{BoxedIo, ErasedHandler, HandlerFn, TypedHandler};
use crate::rpc::server::session::SessionMap;
use crate::rpc::session::{RpcReceiver, SessionId};

/// The main RPC router that accepts connections and dispatches each call to
/// the handler registered for its method path.
pub struct RpcRouter {
    sessions: Arc<SessionMap>,
    handlers: HashMap<String, Arc<dyn ErasedHandler>>,
    config: RpcRouterConfig,
}

impl RpcRouter {
    /// Create a new RPC router.
    pub fn new(config: RpcRouterConfig) -> Self {
        Self {
            sessions: Arc::new(SessionMap::new()),
            handlers: HashMap::new(),
            config,
        }
    }

    /// Register a handler answering one request with one response.
    ///
    /// # Example
    /// ```ignore
    /// router.register_unary::<GreetRequest, GreetResponse, _, _>(
    ///     "greet.GreetService/Greet",
    ///     |_ctx, request| async move {
    ///         Ok(GreetResponse { result: format!("Hello {}", request.first_name()) })
    ///     },
    /// )?;
    /// ```
    pub fn register_unary<Req, Resp, F, Fut>(
        &mut self,
        method: impl Into<String>,
        handler: F,
    ) -> Result<(), RpcError>
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        self.insert(method.into(), HandlerFn::unary(handler))
    }

    /// Register a handler answering one request with a stream of responses.
    pub fn register_server_streaming<Req, Resp, F, Fut, S>(
        &mut self,
        method: impl Into<String>,
        handler: F,
    ) -> Result<(), RpcError>
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, Status>> + Send + 'static,
        S: Stream<Item = Result<Resp, Status>> + Send + 'static,
    {
        self.insert(method.into(), HandlerFn::server_streaming(handler))
    }

    /// Register a handler folding a stream of requests into one response.
    ///
    /// The response is sent once the handler returns, which it should do only
    /// after the request stream reports end of stream.
    pub fn register_client_streaming<Req, Resp, F, Fut>(
        &mut self,
        method: impl Into<String>,
        handler: F,
    ) -> Result<(), RpcError>
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
        F: Fn(CallContext, RpcReceiver<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        self.insert(method.into(), HandlerFn::client_streaming(handler))
    }

    /// Register a handler turning a stream of requests into a stream of responses.
    pub fn register_bidi_streaming<Req, Resp, F, Fut, S>(
        &mut self,
        method: impl Into<String>,
        handler: F,
    ) -> Result<(), RpcError>
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
        F: Fn(CallContext, RpcReceiver<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, Status>> + Send + 'static,
        S: Stream<Item = Result<Resp, Status>> + Send + 'static,
    {
        self.insert(method.into(), HandlerFn::bidi_streaming(handler))
    }

    fn insert<Req, Resp>(
        &mut self,
        method: String,
        handler: HandlerFn<Req, Resp>,
    ) -> Result<(), RpcError>
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
    {
        if self.handlers.contains_key(&method) {
            return Err(RpcError::DuplicateHandler(method));
        }

        info!(method = %method, "Registered RPC handler");
        self.handlers
            .insert(method, Arc::new(TypedHandler::new(handler)));
        Ok(())
    }

    /// Accept connections until the listener fails.
    ///
    /// Each connection is served on its own task and carries one call.
    pub async fn serve(self, listener: TcpListener) -> Result<(), RpcError> {
        let router = Arc::new(self);

        info!(address = ?listener.local_addr().ok(), "RPC router started, accepting connections");

        loop {
            let (stream, peer) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "Failed to disable Nagle");
            }

            let router = Arc::clone(&router);
            tokio::spawn(async move {
                if let Err(e) = router.serve_connection(stream).await {
                    warn!(peer = %peer, error = %e, "Failed to serve connection");
                }
            });
        }
    }

    /// Serve the single call carried by `io`, returning once it has finished.
    pub async fn serve_connection<IO>(&self, mut io: IO) -> Result<(), RpcError>
    where
        IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let Some(header) = self.read_header(&mut io).await? else {
            debug!("Connection closed before a call was opened");
            return Ok(());
        };
        let method = header.method;

        let Some(handler) = self.handlers.get(&method).map(Arc::clone) else {
            warn!(method = %method, "No handler registered for method");
            let status = CallStatus::new(Code::Unimplemented, format!("unknown method '{method}'"));
            let _ = write_frame(&mut io, &Frame::Trailer(status)).await;
            return Err(RpcError::NoHandler(method));
        };

        let session_id = SessionId::generate();
        let session_guard = self.sessions.register(session_id.clone(), &method);

        // The deadline is measured from when the header arrives.
        let deadline = header
            .timeout_ms
            .map(|ms| Deadline::after(Duration::from_millis(ms)));
        let context = CallContext::new(deadline, CancelSignal::new());

        info!(
            session_id = %session_id,
            method = %method,
            timeout_ms = ?header.timeout_ms,
            "Spawning handler for new call"
        );

        let boxed: BoxedIo = Box::new(io);
        let task = tokio::spawn(handler.serve(
            boxed,
            session_id.clone(),
            context,
            self.config.channel_options(),
        ));
        let joined = task.await;
        drop(session_guard);

        match joined {
            Ok(()) => {
                debug!(session_id = %session_id, method = %method, "Call finished");
                Ok(())
            }
            Err(e) if e.is_panic() => {
                error!(session_id = %session_id, method = %method, "Handler panicked");
                Err(RpcError::HandlerPanic)
            }
            Err(e) => Err(RpcError::Channel(format!("handler task failed: {e}"))),
        }
    }

    async fn read_header<IO>(&self, io: &mut IO) -> Result<Option<CallHeader>, RpcError>
    where
        IO: AsyncRead + Unpin,
    {
        let read = read_frame(io, self.config.max_message_size);
        match tokio::time::timeout(self.config.handshake_timeout, read).await {
            Err(_) => Err(RpcError::Channel(
                "timed out waiting for call header".to_string(),
            )),
            Ok(Err(fault)) => Err(fault.into()),
            Ok(Ok(None)) => Ok(None),
            Ok(Ok(Some(Frame::Header(header)))) => Ok(Some(header)),
            Ok(Ok(Some(other))) => Err(RpcError::Channel(format!(
                "expected call header, received {other:?}"
            ))),
        }
    }

    /// Get the number of calls currently being served.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Get the number of calls to `method` currently being served.
    pub fn active_calls(&self, method: &str) -> usize {
        self.sessions.calls_to(method)
    }

    /// Check if a handler is registered for the given method path.
    pub fn has_handler(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }
}
