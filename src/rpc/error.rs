use thiserror::Error;
use tonic::{Code, Status};

/// Errors that can occur while driving an RPC session.
///
/// A clean end of a receive direction is not an error: it is reported as
/// `Ok(None)` by [`RpcReceiver::message`](crate::rpc::RpcReceiver::message).
#[derive(Debug, Error)]
pub enum RpcError {
    /// The operation is not allowed in the session's current direction state.
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// The transport failed or the peer violated the protocol.
    #[error("channel error: {0}")]
    Channel(String),

    /// Failed to establish the underlying connection.
    #[error("connection I/O error")]
    Io(#[from] std::io::Error),

    /// The call's time budget expired.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The call was cancelled before completion.
    #[error("call cancelled")]
    Cancelled,

    /// The remote handler finished the call with a non-OK status.
    #[error("call failed: {0}")]
    Status(Status),

    /// No handler registered for the given method path.
    #[error("no handler registered for '{0}'")]
    NoHandler(String),

    /// A handler is already registered for the given method path.
    #[error("handler already registered for '{0}'")]
    DuplicateHandler(String),

    /// A handler panicked during execution.
    #[error("handler panicked")]
    HandlerPanic,
}

impl RpcError {
    /// The status code this error is reported under.
    pub fn code(&self) -> Code {
        match self {
            RpcError::InvalidState(_) => Code::FailedPrecondition,
            RpcError::Channel(_) | RpcError::Io(_) => Code::Unavailable,
            RpcError::DeadlineExceeded => Code::DeadlineExceeded,
            RpcError::Cancelled => Code::Cancelled,
            RpcError::Status(status) => status.code(),
            RpcError::NoHandler(_) => Code::Unimplemented,
            RpcError::DuplicateHandler(_) => Code::AlreadyExists,
            RpcError::HandlerPanic => Code::Internal,
        }
    }

    /// Whether the caller should treat this as an anticipated outcome rather
    /// than a failure of the calling flow.
    pub fn is_expected(&self) -> bool {
        matches!(self, RpcError::DeadlineExceeded | RpcError::Cancelled)
    }
}

impl From<RpcError> for Status {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Status(status) => status,
            other => Status::new(other.code(), other.to_string()),
        }
    }
}

/// The terminal condition of a session, shared between its two directions.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Fault {
    Channel(String),
    DeadlineExceeded,
    Cancelled,
    Status { code: Code, message: String },
}

impl Fault {
    /// Classify a non-OK status received from the peer.
    pub(crate) fn from_status(code: Code, message: String) -> Self {
        match code {
            Code::DeadlineExceeded => Fault::DeadlineExceeded,
            Code::Cancelled => Fault::Cancelled,
            code => Fault::Status { code, message },
        }
    }
}

impl From<Fault> for RpcError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Channel(message) => RpcError::Channel(message),
            Fault::DeadlineExceeded => RpcError::DeadlineExceeded,
            Fault::Cancelled => RpcError::Cancelled,
            Fault::Status { code, message } => RpcError::Status(Status::new(code, message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_outcomes() {
        assert!(RpcError::DeadlineExceeded.is_expected());
        assert!(RpcError::Cancelled.is_expected());
        assert!(!RpcError::Channel("reset".into()).is_expected());
        assert!(!RpcError::InvalidState("closed".into()).is_expected());
    }

    #[test]
    fn test_remote_status_classification() {
        let fault = Fault::from_status(Code::DeadlineExceeded, "too slow".into());
        assert_eq!(fault, Fault::DeadlineExceeded);

        let err = RpcError::from(Fault::from_status(Code::Internal, "boom".into()));
        assert_eq!(err.code(), Code::Internal);
        assert!(matches!(err, RpcError::Status(_)));
    }

    #[test]
    fn test_into_status_keeps_code() {
        let status = Status::from(RpcError::Cancelled);
        assert_eq!(status.code(), Code::Cancelled);

        let status = Status::from(RpcError::Status(Status::not_found("missing")));
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "missing");
    }
}
