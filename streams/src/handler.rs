//! Subscriber callbacks.

use std::{fmt, sync::Arc};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A callback invoked with each value broadcast to the context it is subscribed to.
///
/// Any `Fn(&T) + Send + Sync` closure converts into a handler, so most callers pass closures
/// straight to [`Stream::subscribe`](crate::Stream::subscribe). [`Handler::noop()`] is the
/// explicit absent handler: it can be subscribed like any other, and invoking it does nothing.
pub struct Handler<T> {
    callback: Option<Callback<T>>,
}

impl<T> Handler<T> {
    /// Wrap a callback.
    pub fn new(callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    /// A handler that ignores every value.
    pub const fn noop() -> Self {
        Self { callback: None }
    }

    /// Returns `true` if invoking this handler does nothing.
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.callback.is_none()
    }

    /// Invoke the handler. Invoking a no-op handler is not an error.
    #[inline]
    pub(crate) fn call(&self, value: &T) {
        if let Some(callback) = &self.callback {
            callback(value);
        }
    }
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
        }
    }
}

impl<T> Default for Handler<T> {
    fn default() -> Self {
        Self::noop()
    }
}

impl<T, F> From<F> for Handler<T>
where
    F: Fn(&T) + Send + Sync + 'static,
{
    fn from(callback: F) -> Self {
        Self::new(callback)
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_noop() {
            write!(f, "Handler(noop)")
        } else {
            write!(f, "Handler(fn)")
        }
    }
}
