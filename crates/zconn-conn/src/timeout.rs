use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Maps the previous deadline duration to the next one.
///
/// A connection loop seeds the policy with its default timeout and calls
/// it once per attempt, retries included. After a successful operation
/// the seed goes back to the default.
#[derive(Clone)]
pub struct TimeoutPolicy {
    next: Arc<dyn Fn(Duration) -> Duration + Send + Sync>,
}

impl TimeoutPolicy {
    /// Every attempt gets the same duration.
    pub fn fixed() -> Self {
        Self::from_fn(|last| last)
    }

    /// Multiply the previous duration by `factor`, capped at `max`.
    pub fn backoff(factor: u32, max: Duration) -> Self {
        Self::from_fn(move |last| last.saturating_mul(factor).min(max))
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Duration) -> Duration + Send + Sync + 'static,
    {
        Self { next: Arc::new(f) }
    }

    pub fn apply(&self, last: Duration) -> Duration {
        (self.next)(last)
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::fixed()
    }
}

impl fmt::Debug for TimeoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutPolicy").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_is_identity() {
        let policy = TimeoutPolicy::fixed();
        assert_eq!(policy.apply(Duration::from_millis(50)), Duration::from_millis(50));
    }

    #[test]
    fn backoff_grows_then_caps() {
        let policy = TimeoutPolicy::backoff(2, Duration::from_millis(300));
        let mut t = Duration::from_millis(50);
        let mut seen = Vec::new();
        for _ in 0..4 {
            t = policy.apply(t);
            seen.push(t.as_millis());
        }
        assert_eq!(seen, vec![100, 200, 300, 300]);
    }

    #[test]
    fn custom_policy() {
        let policy = TimeoutPolicy::from_fn(|last| last + Duration::from_millis(10));
        assert_eq!(policy.apply(Duration::ZERO), Duration::from_millis(10));
    }
}
