//! Wire framing for a session.
//!
//! Every frame on a connection is enveloped the same way:
//!
//! ```text
//! [kind:1][length:4 big-endian][payload:length]
//! ```
//!
//! The first frame a client writes is always a call header. The last frame a
//! server writes is always a trailer carrying the call status.

use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tonic::Code;

use crate::rpc::error::Fault;

/// Frame kind tags.
pub mod frame_kind {
    /// An encoded request or response message.
    pub const MESSAGE: u8 = 0x00;
    /// Call header opening a session.
    pub const HEADER: u8 = 0x01;
    /// The sender will not send further messages.
    pub const HALF_CLOSE: u8 = 0x02;
    /// Final call status from the server.
    pub const TRAILER: u8 = 0x03;
    /// The client abandoned the call.
    pub const CANCEL: u8 = 0x04;
}

/// Size of the frame envelope header (kind + length).
pub const FRAME_HEADER_SIZE: usize = 5;

/// Call header sent by the client as the first frame of a session.
#[derive(Clone, PartialEq, Message)]
pub struct CallHeader {
    /// Fully qualified method path, e.g. `greet.GreetService/Greet`.
    #[prost(string, tag = "1")]
    pub method: String,
    /// Remaining time budget at the moment the call was opened.
    #[prost(uint64, optional, tag = "2")]
    pub timeout_ms: Option<u64>,
}

/// Final status written by the server.
#[derive(Clone, PartialEq, Message)]
pub struct CallStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

impl CallStatus {
    pub fn ok() -> Self {
        Self {
            code: Code::Ok as i32,
            message: String::new(),
        }
    }

    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Code {
        Code::from_i32(self.code)
    }

    /// The fault this status represents, or `None` for `Ok`.
    pub(crate) fn into_fault(self) -> Option<Fault> {
        match self.code() {
            Code::Ok => None,
            code => Some(Fault::from_status(code, self.message)),
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(Bytes),
    Header(CallHeader),
    HalfClose,
    Trailer(CallStatus),
    Cancel,
}

impl Frame {
    fn kind(&self) -> u8 {
        match self {
            Frame::Message(_) => frame_kind::MESSAGE,
            Frame::Header(_) => frame_kind::HEADER,
            Frame::HalfClose => frame_kind::HALF_CLOSE,
            Frame::Trailer(_) => frame_kind::TRAILER,
            Frame::Cancel => frame_kind::CANCEL,
        }
    }

    /// Encode the frame including its envelope.
    pub fn encode(&self) -> Bytes {
        let payload: Bytes = match self {
            Frame::Message(payload) => payload.clone(),
            Frame::Header(header) => header.encode_to_vec().into(),
            Frame::Trailer(status) => status.encode_to_vec().into(),
            Frame::HalfClose | Frame::Cancel => Bytes::new(),
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        buf.put_u8(self.kind());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);
        buf.freeze()
    }

    fn decode(kind: u8, payload: Bytes) -> Result<Self, Fault> {
        let frame = match kind {
            frame_kind::MESSAGE => Frame::Message(payload),
            frame_kind::HEADER => Frame::Header(
                CallHeader::decode(payload)
                    .map_err(|e| Fault::Channel(format!("malformed call header: {e}")))?,
            ),
            frame_kind::HALF_CLOSE => Frame::HalfClose,
            frame_kind::TRAILER => Frame::Trailer(
                CallStatus::decode(payload)
                    .map_err(|e| Fault::Channel(format!("malformed trailer: {e}")))?,
            ),
            frame_kind::CANCEL => Frame::Cancel,
            other => {
                return Err(Fault::Channel(format!("unknown frame kind 0x{other:02x}")));
            }
        };
        Ok(frame)
    }
}

/// Read one frame.
///
/// Returns `Ok(None)` if the connection closed cleanly on a frame boundary.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<Frame>, Fault>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    let mut filled = 0;
    while filled < FRAME_HEADER_SIZE {
        let n = reader
            .read(&mut header[filled..])
            .await
            .map_err(|e| Fault::Channel(format!("read failed: {e}")))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Fault::Channel("connection closed mid-frame".to_string()));
        }
        filled += n;
    }

    let kind = header[0];
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > max_size {
        return Err(Fault::Channel(format!(
            "frame of {len} bytes exceeds limit of {max_size}"
        )));
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| Fault::Channel(format!("read failed: {e}")))?;

    Frame::decode(kind, payload.into()).map(Some)
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), Fault>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&frame.encode())
        .await
        .map_err(|e| Fault::Channel(format!("write failed: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| Fault::Channel(format!("flush failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_envelope_layout() {
        let encoded = Frame::Message(Bytes::from_static(b"hello")).encode();
        assert_eq!(encoded[0], frame_kind::MESSAGE);
        assert_eq!(&encoded[1..5], &[0, 0, 0, 5]);
        assert_eq!(&encoded[5..], b"hello");

        let encoded = Frame::HalfClose.encode();
        assert_eq!(encoded.as_ref(), &[frame_kind::HALF_CLOSE, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_header_carries_deadline() {
        let frame = Frame::Header(CallHeader {
            method: "greet.GreetService/Greet".to_string(),
            timeout_ms: Some(1500),
        });
        let mut reader = Cursor::new(frame.encode().to_vec());

        let decoded = read_frame(&mut reader, 1024).await.unwrap();
        assert_eq!(decoded, Some(frame));
        assert_eq!(read_frame(&mut reader, 1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_trailer_status() {
        let frame = Frame::Trailer(CallStatus::new(Code::DeadlineExceeded, "slow"));
        let mut reader = Cursor::new(frame.encode().to_vec());

        match read_frame(&mut reader, 1024).await.unwrap() {
            Some(Frame::Trailer(status)) => {
                assert_eq!(status.code(), Code::DeadlineExceeded);
                assert_eq!(status.into_fault(), Some(Fault::DeadlineExceeded));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(CallStatus::ok().into_fault(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let frame = Frame::Message(Bytes::from(vec![7u8; 64]));
        let mut reader = Cursor::new(frame.encode().to_vec());

        let result = read_frame(&mut reader, 16).await;
        assert!(matches!(result, Err(Fault::Channel(_))));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_channel_error() {
        let encoded = Frame::Message(Bytes::from_static(b"hello")).encode();
        let mut reader = Cursor::new(encoded[..3].to_vec());

        let result = read_frame(&mut reader, 1024).await;
        assert!(matches!(result, Err(Fault::Channel(_))));
    }

    #[tokio::test]
    async fn test_unknown_kind_rejected() {
        let mut reader = Cursor::new(vec![0x7f, 0, 0, 0, 0]);
        let result = read_frame(&mut reader, 1024).await;
        assert!(matches!(result, Err(Fault::Channel(_))));
    }
}
