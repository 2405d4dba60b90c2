//! Seams to the external build toolchain.
//!
//! The core never interprets what a builder reports beyond the retry classification of
//! [`BuildError`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::domain::documents::{Artifact, DocumentRequest};

/// Converts a document request into an artifact. Implementations may block; callers run
/// them on the blocking pool.
///
/// Long-running implementations must stop, and release whatever they started, once
/// `budget` is spent.
pub trait Builder: Send + Sync + 'static {
    fn build(&self, request: &DocumentRequest, budget: &BuildBudget)
    -> Result<Artifact, BuildError>;
}

/// Wall-clock deadline for one build plus a flag the caller raises when it stops waiting.
/// Clones share the flag.
#[derive(Debug, Clone)]
pub struct BuildBudget {
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
}

impl BuildBudget {
    pub fn new(limit: Duration) -> Self {
        Self::until(Instant::now() + limit)
    }

    pub fn until(deadline: Instant) -> Self {
        Self {
            deadline,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_spent(&self) -> bool {
        self.is_cancelled() || Instant::now() >= self.deadline
    }

    /// Cancels the budget when dropped, so an abandoned await stops the build behind it.
    pub fn cancel_on_drop(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

pub struct CancelOnDrop(BuildBudget);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Answers whether a `(kind, template)` pair can be built.
pub trait TemplateRegistry: Send + Sync + 'static {
    fn exists(&self, document_kind: &str, template_name: &str) -> bool;
}

#[derive(Debug, Error)]
pub enum BuildError {
    /// The input data was rejected by the builder.
    #[error("build input rejected: {message}")]
    Validation { message: String },
    /// The toolchain ran and failed.
    #[error("build toolchain failed: {message}")]
    Toolchain { message: String },
    /// The toolchain could not be started.
    #[error("builder unavailable: {message}")]
    Unavailable { message: String },
    /// The build was stopped because its budget ran out.
    #[error("build stopped: {message}")]
    TimedOut { message: String },
    #[error("builder io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn toolchain(message: impl Into<String>) -> Self {
        Self::Toolchain {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::TimedOut {
            message: message.into(),
        }
    }

    /// Whether running the same build again may succeed. A build that ran out of time would
    /// run out again.
    pub fn retryable(&self) -> bool {
        !matches!(
            self,
            BuildError::Validation { .. } | BuildError::TimedOut { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_validation_failures_are_final() {
        assert!(!BuildError::validation("missing field").retryable());
        assert!(BuildError::toolchain("exit 1").retryable());
        assert!(BuildError::unavailable("not found").retryable());
        assert!(BuildError::Io(std::io::Error::other("pipe")).retryable());
        assert!(!BuildError::timed_out("hard limit").retryable());
    }

    #[test]
    fn budgets_are_spent_by_deadline_or_cancellation() {
        let open = BuildBudget::new(Duration::from_secs(60));
        assert!(!open.is_spent());
        assert!(open.remaining() > Duration::from_secs(59));

        let shared = open.clone();
        drop(open.cancel_on_drop());
        assert!(shared.is_cancelled());
        assert!(shared.is_spent());

        let past = BuildBudget::until(Instant::now());
        assert!(past.is_spent());
        assert_eq!(past.remaining(), Duration::ZERO);
    }
}
