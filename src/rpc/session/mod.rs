//! The message channel underlying every exchange.
//!
//! A [`Session`] is one call over one connection. It has two independent
//! directions: an [`RpcSender`] for outgoing messages and an [`RpcReceiver`]
//! for incoming ones. Within a direction messages arrive in send order,
//! exactly once. The two directions can be split apart and driven from
//! separate tasks; they coordinate only through the session's shared terminal
//! state, so a failure seen by one direction is reported by the other.

mod pump;
mod state;

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use prost::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tonic::Status;
use uuid::Uuid;

use crate::rpc::deadline::CallContext;
use crate::rpc::error::{Fault, RpcError};
use crate::rpc::frame::{CallStatus, Frame};

use self::state::{Phase, SessionState};

/// Identifier of a single call, unique per process.
#[derive(Clone, Hash, PartialEq, Eq)]
pub struct SessionId(Arc<Uuid>);

impl SessionId {
    pub fn generate() -> Self {
        Self(Arc::new(Uuid::new_v4()))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which end of the call this session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Buffering limits applied to one session.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChannelOptions {
    pub max_message_size: usize,
    pub channel_capacity: usize,
}

/// State shared by both directions and the background tasks of one session.
#[derive(Debug)]
pub(crate) struct Shared {
    id: SessionId,
    role: Role,
    context: CallContext,
    state: SessionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Open,
    HalfClosed,
    Closed,
}

/// A live call: the paired send and receive directions over one connection.
pub struct Session<Out, In> {
    sender: RpcSender<Out>,
    receiver: RpcReceiver<In>,
}

impl<Out, In> Session<Out, In>
where
    Out: Message,
    In: Message + Default,
{
    /// Open a session over an established connection and start its
    /// reader and writer tasks.
    ///
    /// `preamble` is written before anything else; a client passes its call
    /// header here.
    pub(crate) fn open<IO>(
        io: IO,
        id: SessionId,
        role: Role,
        context: CallContext,
        options: ChannelOptions,
        preamble: Option<Frame>,
    ) -> Self
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let shared = Arc::new(Shared {
            id,
            role,
            context,
            state: SessionState::new(),
        });

        let capacity = options.channel_capacity.max(1);
        let (frames_tx, frames_rx) = mpsc::channel(capacity + 1);
        if let Some(frame) = preamble {
            // Fresh channel with spare capacity, cannot be full.
            let _ = frames_tx.try_send(frame);
        }
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);

        let (read_half, write_half) = tokio::io::split(io);
        tokio::spawn(pump::run_writer(write_half, frames_rx, Arc::clone(&shared)));
        tokio::spawn(pump::run_reader(
            read_half,
            inbound_tx,
            Arc::clone(&shared),
            options.max_message_size,
        ));

        Self {
            sender: RpcSender {
                shared: Arc::clone(&shared),
                frames: frames_tx.clone(),
                direction: Direction::Open,
                max_message_size: options.max_message_size,
                _marker: PhantomData,
            },
            receiver: RpcReceiver {
                shared,
                inbound: inbound_rx,
                _writer: frames_tx,
                finished: false,
                closed: false,
                _marker: PhantomData,
            },
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.sender.shared.id
    }

    pub fn context(&self) -> &CallContext {
        &self.sender.shared.context
    }

    /// Send one message. Fails with `InvalidState` after [`close_send`](Self::close_send).
    pub async fn send(&mut self, message: Out) -> Result<(), RpcError> {
        self.sender.send(message).await
    }

    /// Receive the next message, or `Ok(None)` once the peer has finished sending.
    pub async fn receive(&mut self) -> Result<Option<In>, RpcError> {
        self.receiver.message().await
    }

    /// Half-close: no further messages will be sent in this direction.
    pub async fn close_send(&mut self) -> Result<(), RpcError> {
        self.sender.close_send().await
    }

    /// Release the session. A call still in flight is cancelled.
    ///
    /// Closing an already-closed session does nothing.
    pub fn close(&mut self) {
        self.sender.close();
        self.receiver.close();
    }

    /// Separate the two directions so each can be driven by its own task.
    pub fn split(self) -> (RpcSender<Out>, RpcReceiver<In>) {
        (self.sender, self.receiver)
    }

    pub(crate) fn sender_mut(&mut self) -> &mut RpcSender<Out> {
        &mut self.sender
    }

    pub(crate) fn receiver_mut(&mut self) -> &mut RpcReceiver<In> {
        &mut self.receiver
    }
}

impl<Out, In> fmt::Debug for Session<Out, In> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.sender.shared.id)
            .field("role", &self.sender.shared.role)
            .field("send", &self.sender.direction)
            .field("phase", &self.sender.shared.state.phase())
            .finish()
    }
}

fn abandon(shared: &Shared) {
    if shared.state.phase() == Phase::Active {
        shared.context.cancel_signal().cancel();
    }
}

/// The sending direction of a session.
///
/// On the client, dropping a sender that has not been half-closed abandons
/// the call, the same as [`close`](Self::close).
pub struct RpcSender<T> {
    shared: Arc<Shared>,
    frames: mpsc::Sender<Frame>,
    direction: Direction,
    max_message_size: usize,
    _marker: PhantomData<fn(T)>,
}

impl<T: Message> RpcSender<T> {
    pub async fn send(&mut self, message: T) -> Result<(), RpcError> {
        match self.direction {
            Direction::Open => {}
            Direction::HalfClosed => {
                return Err(RpcError::InvalidState("send after close_send".to_string()));
            }
            Direction::Closed => {
                return Err(RpcError::InvalidState("send on a closed session".to_string()));
            }
        }
        self.ensure_live()?;

        let len = message.encoded_len();
        if len > self.max_message_size {
            return Err(RpcError::Channel(format!(
                "message of {len} bytes exceeds the {} byte limit",
                self.max_message_size
            )));
        }

        self.push(Frame::Message(Bytes::from(message.encode_to_vec())))
            .await
    }

    /// Close the send direction.
    ///
    /// A client signals end of requests; a server ends the call with an OK status.
    pub async fn close_send(&mut self) -> Result<(), RpcError> {
        let frame = match self.shared.role {
            Role::Client => Frame::HalfClose,
            Role::Server => Frame::Trailer(CallStatus::ok()),
        };
        self.close_with(frame).await
    }

    /// End the call with `status`. Server side only.
    pub(crate) async fn finish(&mut self, status: Status) -> Result<(), RpcError> {
        debug_assert_eq!(self.shared.role, Role::Server);
        self.close_with(Frame::Trailer(CallStatus::new(status.code(), status.message())))
            .await
    }

    /// Whether [`close_send`](Self::close_send) has been called.
    pub fn is_send_closed(&self) -> bool {
        self.direction != Direction::Open
    }

    pub fn session_id(&self) -> &SessionId {
        &self.shared.id
    }

    /// Release this direction, cancelling the call if it is still in flight.
    pub fn close(&mut self) {
        if self.direction == Direction::Closed {
            return;
        }
        if self.direction == Direction::Open {
            abandon(&self.shared);
        }
        self.direction = Direction::Closed;
    }

    async fn close_with(&mut self, frame: Frame) -> Result<(), RpcError> {
        match self.direction {
            Direction::Open => {}
            Direction::HalfClosed => {
                return Err(RpcError::InvalidState("send direction already closed".to_string()));
            }
            Direction::Closed => {
                return Err(RpcError::InvalidState("close_send on a closed session".to_string()));
            }
        }
        self.direction = Direction::HalfClosed;
        self.ensure_live()?;
        self.push(frame).await
    }

    fn ensure_live(&self) -> Result<(), RpcError> {
        match self.shared.state.phase() {
            Phase::Active => Ok(()),
            Phase::Completed => Err(RpcError::InvalidState("call already completed".to_string())),
            Phase::Failed(fault) => Err(fault.into()),
        }
    }

    async fn push(&self, frame: Frame) -> Result<(), RpcError> {
        self.frames.send(frame).await.map_err(|_| {
            self.shared
                .state
                .fault()
                .map(RpcError::from)
                .unwrap_or_else(|| RpcError::Channel("session writer stopped".to_string()))
        })
    }
}

/// The receiving direction of a session.
///
/// On the client, dropping a receiver before end of stream abandons the call.
pub struct RpcReceiver<T> {
    shared: Arc<Shared>,
    inbound: mpsc::Receiver<Bytes>,
    // Keeps the writer task alive while only this half remains, so a deadline
    // or cancel can still be delivered to the peer.
    _writer: mpsc::Sender<Frame>,
    finished: bool,
    closed: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Message + Default> RpcReceiver<T> {
    /// Receive the next message.
    ///
    /// Returns `Ok(None)` once the peer has finished sending and every
    /// buffered message has been delivered, and keeps returning it after that.
    pub async fn message(&mut self) -> Result<Option<T>, RpcError> {
        if self.closed {
            return Err(RpcError::InvalidState("receive on a closed session".to_string()));
        }
        if self.finished {
            return Ok(None);
        }

        match self.inbound.recv().await {
            Some(payload) => T::decode(payload).map(Some).map_err(|e| {
                let fault = Fault::Channel(format!("malformed message: {e}"));
                self.shared.state.fail(fault.clone());
                self.shared.state.fault().unwrap_or(fault).into()
            }),
            None => match self.shared.state.fault() {
                Some(fault) => Err(fault.into()),
                None => {
                    self.finished = true;
                    Ok(None)
                }
            },
        }
    }

    /// Whether end of stream has been observed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn session_id(&self) -> &SessionId {
        &self.shared.id
    }

    /// Release this direction, cancelling the call if it is still in flight.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if !self.finished {
            abandon(&self.shared);
        }
        self.closed = true;
        self.inbound.close();
    }

    /// Consume the receiver as a stream that ends at end of stream or after
    /// the first error.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<T, RpcError>> + Send + 'static
    where
        T: Send + 'static,
    {
        async_stream::stream! {
            loop {
                match self.message().await {
                    Ok(Some(message)) => yield Ok(message),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        }
    }
}

impl<T> Drop for RpcReceiver<T> {
    fn drop(&mut self) {
        if self.shared.role == Role::Client && !self.closed && !self.finished {
            abandon(&self.shared);
        }
    }
}

impl<T> Drop for RpcSender<T> {
    fn drop(&mut self) {
        if self.shared.role == Role::Client && self.direction == Direction::Open {
            abandon(&self.shared);
        }
    }
}

impl<T> fmt::Debug for RpcReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcReceiver")
            .field("session_id", &self.shared.id)
            .field("finished", &self.finished)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<T> fmt::Debug for RpcSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcSender")
            .field("session_id", &self.shared.id)
            .field("direction", &self.direction)
            .finish()
    }
}
