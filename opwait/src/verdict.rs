//! Outcome of a single probe.

use crate::error::PollError;

/// What one status check observed.
///
/// `Success` and `Failure` are terminal. `Pending` always carries a reason so
/// the poll loop can log what it is waiting for.
#[derive(Debug, Clone)]
pub enum PollVerdict<T = ()> {
    Success(T),
    Pending(String),
    Failure(PollError),
}

impl<T> PollVerdict<T> {
    pub fn pending(reason: impl Into<String>) -> Self {
        PollVerdict::Pending(reason.into())
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollVerdict::Pending(_))
    }

    /// Map the success payload, keeping pending and failure as they are.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PollVerdict<U> {
        match self {
            PollVerdict::Success(v) => PollVerdict::Success(f(v)),
            PollVerdict::Pending(reason) => PollVerdict::Pending(reason),
            PollVerdict::Failure(e) => PollVerdict::Failure(e),
        }
    }
}

impl<T> From<PollError> for PollVerdict<T> {
    fn from(e: PollError) -> Self {
        PollVerdict::Failure(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal() {
        assert!(PollVerdict::Success(()).is_terminal());
        assert!(!PollVerdict::<()>::pending("RUNNING").is_terminal());
        assert!(PollVerdict::<()>::from(PollError::Malformed("x".into())).is_terminal());
    }

    #[test]
    fn test_map_keeps_reason() {
        let v: PollVerdict<u32> = PollVerdict::pending("still going");
        match v.map(|n| n + 1) {
            PollVerdict::Pending(reason) => assert_eq!(reason, "still going"),
            other => panic!("unexpected verdict: {:?}", other),
        }
        match PollVerdict::Success(1).map(|n| n + 1) {
            PollVerdict::Success(n) => assert_eq!(n, 2),
            other => panic!("unexpected verdict: {:?}", other),
        }
    }
}
