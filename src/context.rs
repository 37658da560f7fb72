//! Caller-supplied cancellation and deadline signal.
//!
//! Every suspension point in the engine (rate limiter waits, upstream calls,
//! Retry-After sleeps) runs through [`CallContext::run`], so a cancelled or
//! expired context stops the call promptly with [`AnnotationError::Cancelled`].

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};

use crate::errors::AnnotationError;

#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancelled: Option<watch::Receiver<bool>>,
}

/// Cancels every context derived from the one it was created with.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CallContext {
    /// A context that never expires and cannot be cancelled.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancelled: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    /// Tightens the deadline; an earlier existing deadline wins.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        self.cancelled = Some(receiver);
        (self, CancelHandle { sender })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        let explicit = self
            .cancelled
            .as_ref()
            .map_or(false, |receiver| *receiver.borrow());
        let expired = self.deadline.map_or(false, |d| Instant::now() >= d);
        explicit || expired
    }

    /// Returns `Cancelled` immediately if the context is already done.
    pub fn check(&self) -> Result<(), AnnotationError> {
        if self.is_cancelled() {
            return Err(self.cancellation_error());
        }
        Ok(())
    }

    /// Drives `future` to completion unless the context is cancelled first.
    pub async fn run<F, T>(&self, future: F) -> Result<T, AnnotationError>
    where
        F: Future<Output = T>,
    {
        self.check()?;

        let mut cancelled = self.cancelled.clone();
        let deadline = self.deadline;

        tokio::select! {
            output = future => Ok(output),
            _ = wait_for_deadline(deadline) => {
                Err(AnnotationError::Cancelled("deadline exceeded".to_string()))
            }
            _ = wait_for_cancel(cancelled.as_mut()) => {
                Err(AnnotationError::Cancelled("cancelled by caller".to_string()))
            }
        }
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), AnnotationError> {
        self.run(sleep(duration)).await
    }

    fn cancellation_error(&self) -> AnnotationError {
        let explicit = self
            .cancelled
            .as_ref()
            .map_or(false, |receiver| *receiver.borrow());
        if explicit {
            AnnotationError::Cancelled("cancelled by caller".to_string())
        } else {
            AnnotationError::Cancelled("deadline exceeded".to_string())
        }
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => futures::future::pending::<()>().await,
    }
}

async fn wait_for_cancel(receiver: Option<&mut watch::Receiver<bool>>) {
    let Some(receiver) = receiver else {
        return futures::future::pending::<()>().await;
    };
    while !*receiver.borrow_and_update() {
        // Sender dropped without cancelling: nothing can cancel us any more.
        if receiver.changed().await.is_err() {
            return futures::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_sleep() {
        let ctx = CallContext::with_timeout(Duration::from_millis(500));
        let start = Instant::now();

        let err = ctx.sleep(Duration::from_secs(60)).await.unwrap_err();

        assert!(matches!(err, AnnotationError::Cancelled(_)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_handle_interrupts_sleep() {
        let (ctx, handle) = CallContext::background().cancellable();

        let waiter = tokio::spawn(async move { ctx.sleep(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        let result = waiter.await.unwrap();
        assert_eq!(
            result,
            Err(AnnotationError::Cancelled("cancelled by caller".to_string()))
        );
    }

    #[tokio::test]
    async fn test_background_context_completes() {
        let ctx = CallContext::background();
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_deadline_wins() {
        let ctx = CallContext::with_timeout(Duration::from_secs(1)).timeout(Duration::from_secs(30));
        let remaining = ctx.deadline().unwrap() - Instant::now();
        assert!(remaining <= Duration::from_secs(1));
    }
}
