use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;
use tracing::warn;

use crate::rpc::server::RpcRouter;

/// Establishes the connection each call runs over.
///
/// How the bytes get there (plain sockets, TLS, in-memory pipes) is up to the
/// implementation; the session only needs an ordered duplex byte stream.
pub trait Connector: Send + Sync {
    type Io: AsyncRead + AsyncWrite + Send + 'static;

    fn connect(&self) -> impl Future<Output = io::Result<Self::Io>> + Send;
}

/// Dials a TCP address for every call.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
}

impl TcpConnector {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl Connector for TcpConnector {
    type Io = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Connects straight to a router in the same process over an in-memory pipe.
#[derive(Clone)]
pub struct InProcessConnector {
    router: Arc<RpcRouter>,
    buffer_size: usize,
}

impl InProcessConnector {
    pub fn new(router: Arc<RpcRouter>) -> Self {
        Self {
            router,
            buffer_size: 64 * 1024,
        }
    }
}

impl Connector for InProcessConnector {
    type Io = DuplexStream;

    async fn connect(&self) -> io::Result<DuplexStream> {
        let (client_io, server_io) = tokio::io::duplex(self.buffer_size);
        let router = Arc::clone(&self.router);
        tokio::spawn(async move {
            if let Err(e) = router.serve_connection(server_io).await {
                warn!(error = %e, "In-process connection failed");
            }
        });
        Ok(client_io)
    }
}
