//! Per-request cancellation and deadline.

use crate::error::AppError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Carries the caller's cancellation signal and optional deadline into every store operation.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(cancel: CancellationToken, deadline: Option<Instant>) -> Self {
        RequestContext { cancel, deadline }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        RequestContext {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    /// Fail fast if the request is already cancelled or past its deadline.
    pub fn check(&self, operation: &'static str) -> Result<(), AppError> {
        if self.is_cancelled() {
            return Err(AppError::Cancelled { operation });
        }
        Ok(())
    }

    /// Drive `fut` until it completes, the token fires, or the deadline passes.
    /// A cancelled future is dropped mid-flight, so this is for reads only; writes go through `commit`.
    pub async fn run<F, T>(&self, operation: &'static str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        self.check(operation)?;
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AppError::Cancelled { operation }),
            _ = deadline => Err(AppError::Cancelled { operation }),
            out = fut => out,
        }
    }

    /// Run a store write to completion once it has started. Cancellation is honoured only before the
    /// write begins; afterwards it runs on its own task, so neither the token nor a dropped caller can
    /// interrupt it between commit and publish.
    pub async fn commit<F, T>(&self, operation: &'static str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>> + Send + 'static,
        T: Send + 'static,
    {
        self.check(operation)?;
        tokio::spawn(fut)
            .await
            .map_err(|e| AppError::Internal(format!("{} task failed: {}", operation, e)))?
    }

    /// A context that ignores cancellation. Used for follow-up writes after a committed primary write.
    pub fn detached() -> Self {
        RequestContext::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let ctx = RequestContext::default();
        ctx.cancel_token().cancel();
        let out: Result<(), AppError> = ctx.run("get", async { Ok(()) }).await;
        assert!(matches!(out, Err(AppError::Cancelled { operation: "get" })));
    }

    #[tokio::test]
    async fn deadline_aborts_slow_operation() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(10));
        let out: Result<(), AppError> = ctx
            .run("list", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(out, Err(AppError::Cancelled { operation: "list" })));
    }

    #[tokio::test]
    async fn commit_refuses_to_start_when_cancelled() {
        let ctx = RequestContext::default();
        ctx.cancel_token().cancel();
        let out: Result<(), AppError> = ctx.commit("create", async { Ok(()) }).await;
        assert!(matches!(out, Err(AppError::Cancelled { operation: "create" })));
    }

    #[tokio::test]
    async fn started_commit_outlives_cancel_and_dropped_caller() {
        let ctx = RequestContext::default();
        let landed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&landed);
        let write = ctx.commit("update", async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        // The caller gives up and cancels while the write is in flight.
        assert!(tokio::time::timeout(Duration::from_millis(10), write).await.is_err());
        ctx.cancel_token().cancel();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(landed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn completes_without_signal() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(5));
        assert_eq!(ctx.run("get", async { Ok(3) }).await.unwrap(), 3);
    }
}
