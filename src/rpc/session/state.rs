use tokio::sync::watch;

use crate::rpc::error::Fault;

/// Lifecycle of a session as a whole.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Phase {
    Active,
    Completed,
    Failed(Fault),
}

/// Terminal state shared by both directions of one session.
///
/// Only the first transition out of [`Phase::Active`] takes effect, so the
/// first failure observed by either direction is the one both report.
#[derive(Debug)]
pub(crate) struct SessionState {
    phase: watch::Sender<Phase>,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        let (phase, _rx) = watch::channel(Phase::Active);
        Self { phase }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase.borrow().clone()
    }

    pub(crate) fn fault(&self) -> Option<Fault> {
        match &*self.phase.borrow() {
            Phase::Failed(fault) => Some(fault.clone()),
            _ => None,
        }
    }

    /// Record a failure. Returns whether this call set the terminal state.
    pub(crate) fn fail(&self, fault: Fault) -> bool {
        self.transition(Phase::Failed(fault))
    }

    /// Record clean completion. Returns whether this call set the terminal state.
    pub(crate) fn complete(&self) -> bool {
        self.transition(Phase::Completed)
    }

    fn transition(&self, next: Phase) -> bool {
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Active {
                *phase = next;
                true
            } else {
                false
            }
        })
    }

    /// Resolves once the session leaves [`Phase::Active`].
    pub(crate) async fn terminated(&self) {
        let mut rx = self.phase.subscribe();
        let _ = rx.wait_for(|phase| *phase != Phase::Active).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_failure_wins() {
        let state = SessionState::new();

        assert!(state.fail(Fault::Channel("reset".into())));
        assert!(!state.fail(Fault::DeadlineExceeded));
        assert!(!state.complete());

        assert_eq!(state.fault(), Some(Fault::Channel("reset".into())));
    }

    #[test]
    fn test_completion_is_terminal() {
        let state = SessionState::new();

        assert!(state.complete());
        assert!(!state.fail(Fault::Cancelled));
        assert_eq!(state.phase(), Phase::Completed);
        assert_eq!(state.fault(), None);
    }

    #[tokio::test]
    async fn test_terminated_wakes_waiters() {
        let state = std::sync::Arc::new(SessionState::new());
        let waiter = {
            let state = std::sync::Arc::clone(&state);
            tokio::spawn(async move { state.terminated().await })
        };

        state.fail(Fault::Cancelled);
        waiter.await.unwrap();
    }
}
