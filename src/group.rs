//! Fan-out of independent send tasks under one cancellable context.
use crate::error::NotifyError;
use std::future::Future;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Runs tasks concurrently and collects every error they report.
///
/// Each task reports exactly one result. A failing task never stops its
/// siblings, and cancelling the context makes every task that has not yet
/// finished report [`NotifyError::Cancelled`] instead of hanging.
pub struct Group {
    ctx: CancellationToken,
    tasks: JoinSet<Result<(), NotifyError>>,
}

impl Group {
    /// Creates a group scoped to `ctx`.
    pub fn new(ctx: &CancellationToken) -> Self {
        Self {
            ctx: ctx.child_token(),
            tasks: JoinSet::new(),
        }
    }

    /// Registers a task and starts it immediately.
    pub fn add<F>(&mut self, task: F)
    where
        F: Future<Output = Result<(), NotifyError>> + Send + 'static,
    {
        let ctx = self.ctx.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => Err(NotifyError::Cancelled),
                result = task => result,
            }
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every task and returns the errors they reported.
    pub async fn wait(mut self) -> Vec<NotifyError> {
        let total = self.tasks.len();
        let mut errors = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(NotifyError::Task(e)),
            }
        }
        debug!(total, failed = errors.len(), "Group finished");
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_wait_collects_only_errors() {
        let mut group = Group::new(&CancellationToken::new());
        group.add(async { Ok(()) });
        group.add(async { Err(NotifyError::Config("bad".into())) });
        group.add(async { Ok(()) });

        let errors = group.wait().await;

        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], NotifyError::Config(_)));
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_siblings() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut group = Group::new(&CancellationToken::new());
        group.add(async { Err(NotifyError::Email("boom".into())) });
        for _ in 0..5 {
            let done = done.clone();
            group.add(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let errors = group.wait().await;

        assert_eq!(errors.len(), 1);
        assert_eq!(done.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_tasks_run_concurrently() {
        let mut group = Group::new(&CancellationToken::new());
        for _ in 0..5 {
            group.add(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            });
        }

        let start = Instant::now();
        assert!(group.wait().await.is_empty());
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_cancelled_context_reports_cancellation() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let mut group = Group::new(&ctx);
        for _ in 0..3 {
            group.add(async { Ok(()) });
        }

        let errors = group.wait().await;

        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(NotifyError::is_cancelled));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_slow_tasks() {
        let ctx = CancellationToken::new();
        let mut group = Group::new(&ctx);
        group.add(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let errors = tokio::time::timeout(Duration::from_secs(5), group.wait())
            .await
            .expect("group should finish after cancellation");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_cancelled());
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let mut group = Group::new(&CancellationToken::new());
        group.add(async {
            if true {
                panic!("send task panicked");
            }
            Ok(())
        });
        group.add(async { Ok(()) });

        let errors = group.wait().await;

        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], NotifyError::Task(_)));
    }
}
