//! Cancellable live views fed by a background task.

use std::future::Future;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// The latest value computed by a background task, plus the handle that
/// stops it. Dropping the view stops the task.
#[derive(Debug)]
pub struct LiveView<T> {
    rx: watch::Receiver<T>,
    token: CancellationToken,
}

impl<T> LiveView<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawn `task` with the sending half and a cancellation token it must
    /// honor between steps.
    pub(crate) fn spawn<F, Fut>(initial: T, task: F) -> Self
    where
        F: FnOnce(watch::Sender<T>, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = watch::channel(initial);
        let token = CancellationToken::new();
        tokio::spawn(task(tx, token.clone()));
        Self { rx, token }
    }

    pub fn current(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Wait for the next published value. `None` once the task has ended.
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until the value satisfies `predicate`, checking the current value
    /// first. `None` if the task ends before that happens.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        self.rx
            .wait_for(|value| predicate(value))
            .await
            .ok()
            .map(|value| value.clone())
    }

    /// Stop the background task. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl<T> Drop for LiveView<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
