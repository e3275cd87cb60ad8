//! Deadlines and cooperative cancellation.
//!
//! A handler body is a sequence of checkpoints. At each checkpoint it asks its
//! [`CallContext`] whether the call is still live and stops with
//! [`RpcError::DeadlineExceeded`] or [`RpcError::Cancelled`] when it is not.
//! Nothing interrupts a handler between checkpoints.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::rpc::error::{Fault, RpcError};

/// An absolute point in time after which a call must be abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    /// Convert a relative time budget into an absolute deadline from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Remaining budget in whole milliseconds, as carried in the call header.
    pub(crate) fn timeout_ms(&self) -> u64 {
        self.remaining().as_millis().try_into().unwrap_or(u64::MAX)
    }
}

/// A one-way cancellation flag shared by every clone.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the flag. Raising it again has no effect.
    pub fn cancel(&self) {
        self.tx.send_if_modified(|cancelled| !std::mem::replace(cancelled, true));
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is raised.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `wait_for` can only fail if it is dropped.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller-side handle used to abort an in-flight call.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    signal: CancelSignal,
}

impl CancelHandle {
    pub(crate) fn new(signal: CancelSignal) -> Self {
        Self { signal }
    }

    /// Cancel the call. The peer handler observes this at its next checkpoint.
    pub fn cancel(&self) {
        self.signal.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }
}

/// The lifetime bounds of one call: an optional deadline and a cancel flag.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Deadline>,
    cancel: CancelSignal,
}

impl CallContext {
    pub fn new(deadline: Option<Deadline>, cancel: CancelSignal) -> Self {
        Self { deadline, cancel }
    }

    pub fn deadline(&self) -> Option<Deadline> {
        self.deadline
    }

    pub(crate) fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns an error if the call has been cancelled or its deadline has passed.
    ///
    /// Cancellation is reported in preference to expiry when both hold.
    pub fn checkpoint(&self) -> Result<(), RpcError> {
        if self.cancel.is_cancelled() {
            return Err(RpcError::Cancelled);
        }
        if self.deadline.is_some_and(|d| d.is_expired()) {
            return Err(RpcError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolves when the call is cancelled or its deadline passes.
    pub(crate) async fn done(&self) -> Fault {
        let expiry = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline.instant()).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Fault::Cancelled,
            _ = expiry => Fault::DeadlineExceeded,
        }
    }

    /// Sleep for `duration`, waking early with an error if the call ends first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), RpcError> {
        tokio::select! {
            fault = self.done() => Err(fault.into()),
            _ = tokio::time::sleep(duration) => self.checkpoint(),
        }
    }
}

/// Per-call settings chosen by the caller.
///
/// The relative timeout is turned into an absolute [`Deadline`] when the call
/// is opened, and travels to the handler in the call header.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    timeout: Option<Duration>,
    cancel: CancelSignal,
}

impl CallOptions {
    /// Options bounding the call to `timeout`, plus a handle to cancel it sooner.
    pub fn with_deadline(timeout: Duration) -> (Self, CancelHandle) {
        let options = Self {
            timeout: Some(timeout),
            cancel: CancelSignal::new(),
        };
        let handle = CancelHandle::new(options.cancel.clone());
        (options, handle)
    }

    /// Options without a deadline that can still be cancelled.
    pub fn cancellable() -> (Self, CancelHandle) {
        let options = Self::default();
        let handle = CancelHandle::new(options.cancel.clone());
        (options, handle)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Fill in `timeout` only if none was set.
    pub(crate) fn or_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = self.timeout.or(timeout);
        self
    }

    /// Fix the deadline relative to now.
    pub(crate) fn into_context(self) -> CallContext {
        CallContext::new(self.timeout.map(Deadline::after), self.cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with_deadline(timeout: Duration) -> (CallContext, CancelHandle) {
        let (options, handle) = CallOptions::with_deadline(timeout);
        (options.into_context(), handle)
    }

    #[tokio::test]
    async fn test_checkpoint_within_budget() {
        let (ctx, _handle) = context_with_deadline(Duration::from_secs(60));
        assert!(ctx.checkpoint().is_ok());
        assert!(ctx.deadline().unwrap().remaining() > Duration::from_secs(59));
    }

    #[tokio::test]
    async fn test_checkpoint_after_expiry() {
        let (ctx, _handle) = context_with_deadline(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(ctx.checkpoint(), Err(RpcError::DeadlineExceeded)));
        assert_eq!(ctx.deadline().unwrap().remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_cancel_is_observed_by_clones() {
        let (options, handle) = CallOptions::cancellable();
        let ctx = options.into_context();
        let observer = ctx.clone();

        handle.cancel();
        handle.cancel();

        assert!(handle.is_cancelled());
        assert!(matches!(observer.checkpoint(), Err(RpcError::Cancelled)));
        assert_eq!(observer.done().await, Fault::Cancelled);
    }

    #[tokio::test]
    async fn test_sleep_interrupted_by_deadline() {
        let (ctx, _handle) = context_with_deadline(Duration::from_millis(10));
        let started = Instant::now();

        let result = ctx.sleep(Duration::from_secs(30)).await;

        assert!(matches!(result, Err(RpcError::DeadlineExceeded)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_default_timeout_does_not_override() {
        let (options, _handle) = CallOptions::with_deadline(Duration::from_secs(1));
        let options = options.or_timeout(Some(Duration::from_secs(30)));
        assert_eq!(options.timeout(), Some(Duration::from_secs(1)));

        let options = CallOptions::default().or_timeout(Some(Duration::from_secs(30)));
        assert_eq!(options.timeout(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_sleep_completes_without_deadline() {
        let ctx = CallContext::default();
        assert!(ctx.sleep(Duration::from_millis(1)).await.is_ok());
    }
}
