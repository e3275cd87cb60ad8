//! Background tasks moving frames between a connection and a session.
//!
//! Each session owns exactly one reader and one writer task. They share
//! nothing with other sessions.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::rpc::error::Fault;
use crate::rpc::frame::{CallStatus, Frame, read_frame, write_frame};
use crate::rpc::session::{Role, Shared};

/// Drain queued frames onto the connection.
///
/// The writer also enforces the local deadline and cancel flag: when either
/// fires it fails the session and tells the peer, with a cancel frame from a
/// client or a trailer from a server.
pub(crate) async fn run_writer<W>(mut writer: W, mut frames: mpsc::Receiver<Frame>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            frame = frames.recv() => {
                let Some(frame) = frame else {
                    // Every handle is gone before the call finished.
                    if shared.state.fail(Fault::Cancelled) {
                        debug!(session_id = %shared.id, "Session dropped while in flight");
                        let notice = match shared.role {
                            Role::Client => Frame::Cancel,
                            Role::Server => Frame::Trailer(CallStatus::new(
                                tonic::Code::Internal,
                                "handler ended without a status",
                            )),
                        };
                        let _ = write_frame(&mut writer, &notice).await;
                    }
                    break;
                };

                let closing = matches!(frame, Frame::Trailer(_));
                if let Err(fault) = write_frame(&mut writer, &frame).await {
                    warn!(session_id = %shared.id, fault = ?fault, "Session write failed");
                    shared.state.fail(fault);
                    break;
                }

                if closing {
                    shared.state.complete();
                    break;
                }
            }

            _ = shared.state.terminated() => break,

            fault = shared.context.done() => {
                debug!(session_id = %shared.id, fault = ?fault, "Call ended locally");
                shared.state.fail(fault.clone());

                let notice = match shared.role {
                    Role::Client => Frame::Cancel,
                    Role::Server => Frame::Trailer(terminal_status(&fault)),
                };
                // The peer may already be gone; the session has failed either way.
                let _ = write_frame(&mut writer, &notice).await;
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
}

/// Read frames off the connection, forwarding messages to the receiver.
///
/// Dropping `inbound` is what ends the receive direction, so every terminal
/// state is recorded before the loop exits.
pub(crate) async fn run_reader<R>(
    mut reader: R,
    inbound: mpsc::Sender<Bytes>,
    shared: Arc<Shared>,
    max_message_size: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut inbound = Some(inbound);

    loop {
        let frame = tokio::select! {
            biased;
            _ = shared.state.terminated() => break,
            frame = read_frame(&mut reader, max_message_size) => frame,
        };

        match (shared.role, frame) {
            (_, Ok(Some(Frame::Message(payload)))) => {
                let Some(tx) = &inbound else {
                    shared.state.fail(Fault::Channel(
                        "message received after half-close".to_string(),
                    ));
                    break;
                };

                tokio::select! {
                    biased;
                    _ = shared.state.terminated() => break,
                    sent = tx.send(payload) => {
                        if sent.is_err() {
                            debug!(session_id = %shared.id, "Receiver dropped, discarding message");
                        }
                    }
                }
            }

            (Role::Server, Ok(Some(Frame::HalfClose))) => {
                debug!(session_id = %shared.id, "Peer half-closed");
                inbound = None;
            }

            (Role::Server, Ok(Some(Frame::Cancel))) => {
                debug!(session_id = %shared.id, "Peer cancelled the call");
                shared.context.cancel_signal().cancel();
            }

            (Role::Client, Ok(Some(Frame::Trailer(status)))) => {
                match status.into_fault() {
                    None => shared.state.complete(),
                    Some(fault) => shared.state.fail(fault),
                };
                break;
            }

            (_, Ok(Some(other))) => {
                shared.state.fail(Fault::Channel(format!("unexpected frame: {other:?}")));
                break;
            }

            (Role::Client, Ok(None)) => {
                shared.state.fail(Fault::Channel(
                    "connection closed before call status".to_string(),
                ));
                break;
            }

            (Role::Server, Ok(None)) => {
                if inbound.is_some() {
                    shared.state.fail(Fault::Channel(
                        "connection closed before half-close".to_string(),
                    ));
                    shared.context.cancel_signal().cancel();
                }
                break;
            }

            (role, Err(fault)) => {
                warn!(session_id = %shared.id, fault = ?fault, "Session read failed");
                shared.state.fail(fault);
                if role == Role::Server {
                    shared.context.cancel_signal().cancel();
                }
                break;
            }
        }
    }
}

fn terminal_status(fault: &Fault) -> CallStatus {
    match fault {
        Fault::DeadlineExceeded => CallStatus::new(tonic::Code::DeadlineExceeded, "deadline exceeded"),
        Fault::Cancelled => CallStatus::new(tonic::Code::Cancelled, "call cancelled"),
        Fault::Channel(message) => CallStatus::new(tonic::Code::Unavailable, message.clone()),
        Fault::Status { code, message } => CallStatus::new(*code, message.clone()),
    }
}
