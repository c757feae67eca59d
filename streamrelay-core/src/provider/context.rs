//! Provider execution context, per spec §5 "every network operation, cache
//! write, and resolver step accepts a cancellation/context value".

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Carried into every [`super::ProviderAdapter`] call. Honoring
/// `cancellation` is mandatory: a provider that ignores it can hold up the
/// aggregator's global deadline (§4.7).
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub cancellation: CancellationToken,
    deadline: Instant,
    pub user_id: Option<String>,
}

impl ProviderContext {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            deadline: Instant::now() + timeout,
            user_id: None,
        }
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn child(&self, timeout: Duration) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline.min(Instant::now() + timeout),
            user_id: self.user_id.clone(),
        }
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled() || self.remaining().is_zero()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_context_cannot_outlive_parent_deadline() {
        let parent = ProviderContext::new(Duration::from_millis(50));
        let child = parent.child(Duration::from_secs(10));
        assert!(child.remaining() <= parent.remaining());
    }

    #[test]
    fn cancelling_parent_cancels_child() {
        let parent = ProviderContext::new(Duration::from_secs(10));
        let child = parent.child(Duration::from_secs(10));
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
