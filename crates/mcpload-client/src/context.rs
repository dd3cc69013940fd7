//! Per-call cancellation and deadline.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The caller's scope for one or more calls.
///
/// Cloning shares the cancellation token. A call made with a cancelled or
/// expired context fails with [`crate::Error::Cancelled`], and its metric
/// samples are dropped.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that never expires on its own.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel calls when `token` is cancelled.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Expire `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Expire at `deadline`, keeping an earlier deadline if one is set.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// The token calls made with this context observe.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel every call using this context.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the context is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled or `deadline` (or the
    /// context's own deadline, whichever is earlier) passes.
    pub(crate) async fn done_by(&self, deadline: Option<Instant>) {
        let deadline = match (self.deadline, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        match deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_context_is_live() {
        let ctx = CallContext::new();
        assert!(!ctx.is_done());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_cancel_is_shared_by_clones() {
        let ctx = CallContext::new();
        let clone = ctx.clone();
        ctx.cancel();
        assert!(clone.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_earliest_deadline_wins() {
        let ctx = CallContext::new()
            .with_timeout(Duration::from_secs(10))
            .with_timeout(Duration::from_secs(60));
        let deadline = ctx.deadline().unwrap();
        assert!(deadline <= Instant::now() + Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_by_fires_on_call_deadline() {
        let ctx = CallContext::new();
        let started = Instant::now();
        ctx.done_by(Some(started + Duration::from_millis(250))).await;
        assert!(Instant::now() >= started + Duration::from_millis(250));
    }
}
