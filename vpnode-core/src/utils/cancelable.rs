//! Cancelable calls over tokio tasks
//!
//! A [`Cancelable`] is a one-shot cancellation signal shared by any number of
//! [`CancelableCall`]s. Each call runs its action on a separate task and races
//! it against the signal. When cancellation wins, the call returns
//! [`CallError::ActionCancelled`] right away and a detached task hands the
//! action's eventual result to the cleanup callback.

use crate::error::CallError;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

type Action<V, E> = Pin<Box<dyn Future<Output = Result<V, E>> + Send>>;
type Cleanup<V, E> = Box<dyn FnOnce(Result<V, E>) + Send>;

/// One-shot cancellation signal
///
/// Clones share the same signal. The first [`Cancelable::cancel`] wins the
/// compare-and-swap and fires the signal; later calls are no-ops.
#[derive(Clone, Debug)]
pub struct Cancelable {
    inner: Arc<CancelInner>,
}

#[derive(Debug)]
struct CancelInner {
    fired: AtomicBool,
    signal: watch::Sender<bool>,
}

impl Cancelable {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            inner: Arc::new(CancelInner {
                fired: AtomicBool::new(false),
                signal,
            }),
        }
    }

    /// Fire the signal
    ///
    /// Returns true only for the call that actually triggered cancellation.
    pub fn cancel(&self) -> bool {
        if self
            .inner
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.inner.signal.send_replace(true);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// True when both handles are clones of the same signal
    pub fn shares_signal(&self, other: &Cancelable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolves once the signal has fired
    pub async fn cancelled(&self) {
        let mut rx = self.inner.signal.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot fail.
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Create a call bound to this signal
    pub fn request<V, E>(&self) -> CancelableCall<V, E>
    where
        V: Send + 'static,
        E: Send + 'static,
    {
        CancelableCall::new(self.clone())
    }
}

impl Default for Cancelable {
    fn default() -> Self {
        Self::new()
    }
}

/// A pending call racing one action against a [`Cancelable`]
pub struct CancelableCall<V, E> {
    cancel: Cancelable,
    action: Option<Action<V, E>>,
    cleanup: Option<Cleanup<V, E>>,
}

impl<V, E> CancelableCall<V, E>
where
    V: Send + 'static,
    E: Send + 'static,
{
    pub fn new(cancel: Cancelable) -> Self {
        Self {
            cancel,
            action: None,
            cleanup: None,
        }
    }

    pub fn with_action<F>(mut self, action: F) -> Self
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.action = Some(Box::pin(action));
        self
    }

    /// Callback for the result of an action that completed after cancellation
    pub fn with_cleanup<G>(mut self, cleanup: G) -> Self
    where
        G: FnOnce(Result<V, E>) + Send + 'static,
    {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// Cancel this call (and every other call sharing the signal)
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    /// Run the action and wait for either its result or cancellation
    ///
    /// A result that is already available wins over a cancellation that is
    /// already requested. Panics in the action are resumed on the caller.
    pub async fn call(self) -> Result<V, CallError<E>> {
        let Some(action) = self.action else {
            return Err(CallError::UndefinedAction);
        };
        let cleanup = self.cleanup;

        let mut handle = tokio::spawn(action);

        tokio::select! {
            biased;

            joined = &mut handle => match joined {
                Ok(result) => result.map_err(CallError::Action),
                Err(join_error) => std::panic::resume_unwind(join_error.into_panic()),
            },
            _ = self.cancel.cancelled() => {
                debug!("Call cancelled before the action completed, deferring cleanup");
                tokio::spawn(async move {
                    if let Ok(result) = handle.await {
                        if let Some(cleanup) = cleanup {
                            cleanup(result);
                        }
                    }
                });
                Err(CallError::ActionCancelled)
            }
        }
    }
}

/// Cleanup adapter that only sees successful results
///
/// Useful when only a successfully acquired resource needs releasing.
pub fn invoke_on_success<V, E, F>(callback: F) -> impl FnOnce(Result<V, E>) + Send + 'static
where
    V: 'static,
    E: 'static,
    F: FnOnce(V) + Send + 'static,
{
    move |result| {
        if let Ok(value) = result {
            callback(value);
        }
    }
}
