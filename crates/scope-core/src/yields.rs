use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{FutureExt, Stream};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::actor::panic_message;
use crate::error::ActionError;

// ─── YieldStream ──────────────────────────────────────────────────────────

/// Channel-backed stream for writing streaming actions as plain async code.
///
/// A background task runs the producer, which pushes partial values through
/// a [`Yielder`]. When the producer returns `Err` or panics, that error
/// becomes the final item. Dropping the stream aborts the producer task.
///
/// ```rust,ignore
/// Callable::streaming(|args, ctx| {
///     YieldStream::spawn(move |y| async move {
///         for i in 0..3 {
///             ctx.sleep(Duration::from_millis(100)).await?;
///             y.send(json!({"frame": i})).await?;
///         }
///         Ok(())
///     })
/// })
/// ```
pub struct YieldStream {
    rx: mpsc::Receiver<Result<Value, ActionError>>,
    task: JoinHandle<()>,
}

/// Producer half of a [`YieldStream`].
#[derive(Clone)]
pub struct Yielder {
    tx: mpsc::Sender<Result<Value, ActionError>>,
}

impl Yielder {
    pub async fn send(&self, value: Value) -> Result<(), ActionError> {
        self.tx
            .send(Ok(value))
            .await
            .map_err(|_| ActionError::Cancelled)
    }
}

impl YieldStream {
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(Yielder) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        // Capacity 1 keeps the producer at most one value ahead of the actor.
        let (tx, rx) = mpsc::channel(1);
        let yielder = Yielder { tx: tx.clone() };

        let task = tokio::spawn(async move {
            let run = AssertUnwindSafe(async move { producer(yielder).await });
            let failure = match run.catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e,
                Err(payload) => ActionError::Failed(panic_message(payload)),
            };
            let _ = tx.send(Err(failure)).await;
        });

        Self { rx, task }
    }
}

impl Drop for YieldStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Stream for YieldStream {
    type Item = Result<Value, ActionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
