//! Unsubscribe handles.

use std::{
    error::Error,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use log::error;

/// Source of subscription ids. Ids are strictly increasing, which broadcasts rely on to tell
/// registrations made before a delivery from those made during it. Zero is never handed out.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next subscription id.
#[inline]
pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Something a subscription can be detached from.
///
/// Implemented by the per-context channel so handles stay independent of the payload type.
pub(crate) trait Detach: Send + Sync {
    /// Remove the registration with the given id, if it is still present.
    fn detach(&self, id: u64);
}

/// Disposal state shared between a handle and its registration record.
#[derive(Debug)]
pub(crate) struct Token {
    id: u64,
    disposed: AtomicBool,
}

impl Token {
    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Flag the token as disposed. Returns `true` if it already was.
    #[inline]
    pub(crate) fn mark_disposed(&self) -> bool {
        self.disposed.swap(true, Ordering::AcqRel)
    }
}

/// The capability to remove one subscription.
///
/// Returned by [`Stream::subscribe`](crate::Stream::subscribe) and friends. Disposing it removes
/// the handler from its context; exactly one disposal is valid. A run-once subscription that has
/// been consumed by a broadcast counts as disposed.
///
/// Dropping a `Subscription` does not unsubscribe: a handler stays registered until it is disposed
/// or, for run-once registrations, delivered. Discarding one therefore has to be explicit:
///
/// ```compile_fail
/// #![deny(unused_must_use)]
/// use rusty_streams::{Context, Event, Handler, Stream};
///
/// #[derive(Event)]
/// #[event(arg = u32)]
/// struct Ping;
///
/// fn main() {
///     let stream = Stream::<Ping>::new();
///     stream.subscribe(Context::GLOBAL, Handler::noop());
/// }
/// ```
#[must_use = "dropping a subscription leaves its handler registered with no way to dispose it"]
pub struct Subscription {
    token: Arc<Token>,
    channel: Weak<dyn Detach>,
    kind: &'static str,
}

impl Subscription {
    /// Bind a handle with the given id to the channel that owns its registration.
    pub(crate) fn new(id: u64, channel: Weak<dyn Detach>, kind: &'static str) -> Self {
        Self {
            token: Arc::new(Token {
                id,
                disposed: AtomicBool::new(false),
            }),
            channel,
            kind,
        }
    }

    /// A second handle onto the same registration, kept by the registration record.
    pub(crate) fn share(&self) -> Self {
        Self {
            token: Arc::clone(&self.token),
            channel: Weak::clone(&self.channel),
            kind: self.kind,
        }
    }

    #[inline]
    pub(crate) fn token(&self) -> &Arc<Token> {
        &self.token
    }

    /// The id of this subscription, unique for the lifetime of the process.
    #[inline]
    pub fn id(&self) -> u64 {
        self.token.id
    }

    /// Returns `true` once the subscription has been disposed or consumed.
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.token.is_disposed()
    }

    /// Remove the handler from its context.
    ///
    /// The first call detaches the handler and its registration record. Disposing again is a
    /// caller error: it is reported as a diagnostic and returned as
    /// [`DisposeError::AlreadyDisposed`], and nothing else happens.
    pub fn dispose(&self) -> Result<(), DisposeError> {
        if self.token.mark_disposed() {
            error!(
                "[stream][{}] Disposing subscription #{} more than once",
                self.kind, self.token.id
            );
            return Err(DisposeError::AlreadyDisposed { id: self.token.id });
        }

        // The owning stream may already be gone, in which case there is nothing to detach from.
        if let Some(channel) = self.channel.upgrade() {
            channel.detach(self.token.id);
        }
        Ok(())
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.token.id)
            .field("kind", &self.kind)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// An error returned when a subscription cannot be disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeError {
    /// The subscription was already disposed, or consumed by a run-once delivery.
    AlreadyDisposed {
        /// The id of the subscription.
        id: u64,
    },
}

impl fmt::Display for DisposeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisposeError::AlreadyDisposed { id } => {
                write!(f, "subscription #{id} is already disposed")
            }
        }
    }
}

impl Error for DisposeError {}
