use prost::Message;
use tracing::{debug, info};

use crate::rpc::client::config::RpcClientConfig;
use crate::rpc::client::connector::Connector;
use crate::rpc::client::exchange::{BidiStreaming, ClientStreaming, ServerStreaming, expect_single};
use crate::rpc::deadline::CallOptions;
use crate::rpc::error::RpcError;
use crate::rpc::frame::{CallHeader, Frame};
use crate::rpc::session::{Role, Session, SessionId};

/// An RPC client that opens one session per call.
///
/// The client handles:
/// - Establishing a fresh connection through its [`Connector`]
/// - Sending the call header, including the deadline
/// - Enforcing the exchange shape (how many requests and responses)
///
/// # Example
///
/// ```ignore
/// let client = RpcClient::new(TcpConnector::new(addr), RpcClientConfig::default());
///
/// let mut stream = client
///     .server_streaming::<Request, Response>("package.Service/Method", request, CallOptions::default())
///     .await?;
///
/// while let Some(response) = stream.message().await? {
///     println!("Got: {response:?}");
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RpcClient<C> {
    connector: C,
    config: RpcClientConfig,
}

impl<C: Connector> RpcClient<C> {
    pub fn new(connector: C, config: RpcClientConfig) -> Self {
        Self { connector, config }
    }

    /// Open a session for `method`.
    ///
    /// The options' timeout becomes an absolute deadline at this point.
    pub async fn open<Req, Resp>(
        &self,
        method: &str,
        options: CallOptions,
    ) -> Result<Session<Req, Resp>, RpcError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let io = self.connector.connect().await?;

        let context = options
            .or_timeout(self.config.default_timeout)
            .into_context();
        let header = CallHeader {
            method: method.to_string(),
            timeout_ms: context.deadline().map(|deadline| deadline.timeout_ms()),
        };
        let session_id = SessionId::generate();

        info!(
            session_id = %session_id,
            method = %method,
            timeout_ms = ?header.timeout_ms,
            "Opening RPC session"
        );

        Ok(Session::open(
            io,
            session_id,
            Role::Client,
            context,
            self.config.channel_options(),
            Some(Frame::Header(header)),
        ))
    }

    /// One request, one response.
    pub async fn unary<Req, Resp>(
        &self,
        method: &str,
        request: Req,
        options: CallOptions,
    ) -> Result<Resp, RpcError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let mut session = self.open::<Req, Resp>(method, options).await?;
        session.send(request).await?;
        session.close_send().await?;

        let (_sender, mut receiver) = session.split();
        let response = expect_single(&mut receiver).await?;

        debug!(session_id = %receiver.session_id(), "Unary call completed");
        Ok(response)
    }

    /// One request, then an ordered sequence of responses.
    pub async fn server_streaming<Req, Resp>(
        &self,
        method: &str,
        request: Req,
        options: CallOptions,
    ) -> Result<ServerStreaming<Resp>, RpcError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let mut session = self.open::<Req, Resp>(method, options).await?;
        session.send(request).await?;
        session.close_send().await?;

        let (_sender, receiver) = session.split();
        Ok(ServerStreaming::new(receiver))
    }

    /// An ordered sequence of requests, then one response.
    pub async fn client_streaming<Req, Resp>(
        &self,
        method: &str,
        options: CallOptions,
    ) -> Result<ClientStreaming<Req, Resp>, RpcError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let session = self.open(method, options).await?;
        Ok(ClientStreaming::new(session))
    }

    /// Independent request and response sequences over one session.
    pub async fn bidi_streaming<Req, Resp>(
        &self,
        method: &str,
        options: CallOptions,
    ) -> Result<BidiStreaming<Req, Resp>, RpcError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let session = self.open(method, options).await?;
        Ok(BidiStreaming::new(session))
    }
}
