//! Retry policy for registration calls, kept apart from any timer.

use crate::error::TransportError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// HTTP 429.
    RateLimited,
    /// Network trouble, timeouts, unreadable bodies, gateway errors.
    Transient,
    /// Any other HTTP error status; not retried.
    Fatal,
}

pub fn classify(err: &TransportError) -> FailureClass {
    match err {
        TransportError::Status(429) => FailureClass::RateLimited,
        TransportError::Status(502 | 503 | 504) => FailureClass::Transient,
        TransportError::Status(_) => FailureClass::Fatal,
        TransportError::Timeout | TransportError::Network(_) | TransportError::Body(_) => FailureClass::Transient,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    /// Rate-limit waits are `rate_limit_base * 2^attempt`.
    pub rate_limit_base: Duration,
    pub transient_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            max_attempts: 5,
            rate_limit_base: Duration::from_secs(1),
            transient_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffPolicy {
    /// Wait before retrying after attempt `attempt` (0-based) failed.
    /// `None` means stop: the failure is fatal or no attempts remain.
    pub fn delay(&self, attempt: u32, class: FailureClass) -> Option<Duration> {
        if class == FailureClass::Fatal || attempt + 1 >= self.max_attempts {
            return None;
        }
        match class {
            FailureClass::RateLimited => Some(self.rate_limit_base.saturating_mul(1u32 << attempt.min(16))),
            FailureClass::Transient => Some(self.transient_delay),
            FailureClass::Fatal => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_grows_exponentially_and_stops_at_last_attempt() {
        let p = BackoffPolicy::default();
        let waits: Vec<_> = (0..5).map(|a| p.delay(a, FailureClass::RateLimited)).collect();
        assert_eq!(
            waits,
            vec![
                Some(Duration::from_secs(1)),
                Some(Duration::from_secs(2)),
                Some(Duration::from_secs(4)),
                Some(Duration::from_secs(8)),
                None,
            ]
        );
        let total: Duration = waits.iter().flatten().sum();
        assert_eq!(total, Duration::from_secs(15));
    }

    #[test]
    fn transient_is_flat() {
        let p = BackoffPolicy::default();
        for a in 0..4 {
            assert_eq!(p.delay(a, FailureClass::Transient), Some(Duration::from_secs(1)));
        }
        assert_eq!(p.delay(4, FailureClass::Transient), None);
    }

    #[test]
    fn fatal_never_waits() {
        assert_eq!(BackoffPolicy::default().delay(0, FailureClass::Fatal), None);
    }

    #[test]
    fn classification() {
        assert_eq!(classify(&TransportError::Status(429)), FailureClass::RateLimited);
        assert_eq!(classify(&TransportError::Status(503)), FailureClass::Transient);
        assert_eq!(classify(&TransportError::Status(400)), FailureClass::Fatal);
        assert_eq!(classify(&TransportError::Status(500)), FailureClass::Fatal);
        assert_eq!(classify(&TransportError::Timeout), FailureClass::Transient);
        assert_eq!(classify(&TransportError::Body("eof".into())), FailureClass::Transient);
    }
}
