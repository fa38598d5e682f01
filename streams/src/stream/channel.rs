//! Per-context dispatch state.
//!
//! A [`Channel`] holds everything a stream knows about one [`Context`]: the ordered registration
//! records (each pairing a handler with its unsubscribe handle) and the last broadcast value.
//! Handlers and records live in the same entry, so the set of callbacks a broadcast invokes is
//! always exactly the set of live records.
//!
//! The channel never runs a handler while holding its lock. Broadcasts take a [`Delivery`]
//! snapshot, invoke it unlocked, then [`settle`](Channel::settle) the records.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, Weak,
    atomic::{AtomicBool, Ordering},
};

use log::debug;

use crate::{
    context::Context,
    handler::Handler,
    stream::{
        Registration,
        subscription::{self, Detach, Subscription, Token},
    },
};

/// A live registration.
struct Record<T> {
    /// Strong reference to the handle, shared with the caller.
    subscription: Subscription,
    handler: Handler<T>,
    mode: Registration,
    /// Broadcasts witnessed by this registration.
    trigger_count: u64,
}

struct State<T> {
    /// Registrations in subscribe order.
    records: Vec<Record<T>>,
    history: Option<T>,
}

/// Dispatch state for one context of one stream.
pub(crate) struct Channel<T> {
    context: Context,
    kind: &'static str,
    verbose: Arc<AtomicBool>,
    state: Mutex<State<T>>,
}

/// Handlers captured at the start of a broadcast.
pub(crate) struct Delivery<T> {
    targets: Vec<(Arc<Token>, Handler<T>)>,
    /// Highest subscription id included. Later ids were registered mid-delivery.
    high_water: u64,
}

impl<T> Delivery<T> {
    /// Invoke every captured handler in subscribe order, skipping any disposed since the
    /// snapshot was taken.
    pub(crate) fn run(&self, value: &T) {
        for (token, handler) in &self.targets {
            if !token.is_disposed() {
                handler.call(value);
            }
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.targets.len()
    }
}

impl<T: Clone + Send + 'static> Channel<T> {
    pub(crate) fn new(context: Context, kind: &'static str, verbose: Arc<AtomicBool>) -> Self {
        Self {
            context,
            kind,
            verbose,
            state: Mutex::new(State {
                records: Vec::new(),
                history: None,
            }),
        }
    }

    /// Lock the state. Handlers never run under this lock, so poisoning can only come from a
    /// panicking logger; the state is left consistent and is used as is.
    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    /// The last broadcast value, if any.
    pub(crate) fn history(&self) -> Option<T> {
        self.state().history.clone()
    }

    /// Append a registration for `handler` and return its handle.
    pub(crate) fn register(
        self: &Arc<Self>,
        handler: Handler<T>,
        mode: Registration,
    ) -> Subscription {
        let channel: Weak<dyn Detach> = Arc::downgrade(self) as Weak<dyn Detach>;

        let mut state = self.state();
        // Allocated under the lock so ids increase along the record list.
        let subscription = Subscription::new(subscription::next_id(), channel, self.kind);
        state.records.push(Record {
            subscription: subscription.share(),
            handler,
            mode,
            trigger_count: 0,
        });
        drop(state);

        if self.verbose() {
            debug!(
                "[stream][{}] Registered {:?} subscription #{} for {}",
                self.kind,
                mode,
                subscription.id(),
                self.context
            );
        }
        subscription
    }

    /// Capture the handlers to invoke for a broadcast.
    pub(crate) fn snapshot(&self) -> Delivery<T> {
        let state = self.state();
        Delivery {
            targets: state
                .records
                .iter()
                .map(|r| (Arc::clone(r.subscription.token()), r.handler.clone()))
                .collect(),
            high_water: state.records.last().map_or(0, |r| r.subscription.id()),
        }
    }

    /// Record `value` as history and account for a completed delivery.
    ///
    /// Walks the records from last to first so in-place removal never shifts a record that is
    /// still to be visited. Every record that took part in the delivery has its trigger count
    /// bumped; run-once records are disposed and removed.
    pub(crate) fn settle(&self, value: T, delivery: &Delivery<T>) {
        let mut state = self.state();
        state.history = Some(value);

        for i in (0..state.records.len()).rev() {
            let record = &mut state.records[i];
            if record.subscription.id() > delivery.high_water {
                continue;
            }

            record.trigger_count += 1;
            if record.mode != Registration::RunOnce {
                continue;
            }

            record.subscription.token().mark_disposed();
            let removed = state.records.remove(i);
            if self.verbose() {
                debug!(
                    "[stream][{}] Run-once subscription #{} consumed for {}",
                    self.kind,
                    removed.subscription.id(),
                    self.context
                );
            }
        }
    }

    /// Detached snapshot of this channel.
    pub(crate) fn view(&self) -> ContextView<T> {
        let state = self.state();
        ContextView {
            context: self.context.clone(),
            history: state.history.clone(),
            registrations: state
                .records
                .iter()
                .map(|r| RegistrationInfo {
                    id: r.subscription.id(),
                    mode: r.mode,
                    trigger_count: r.trigger_count,
                })
                .collect(),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state().records.len()
    }
}

impl<T: Clone + Send + 'static> Detach for Channel<T> {
    fn detach(&self, id: u64) {
        let mut state = self.state();
        let Some(index) = state.records.iter().position(|r| r.subscription.id() == id) else {
            return;
        };
        state.records.remove(index);
        drop(state);

        if self.verbose() {
            debug!(
                "[stream][{}] Disposed subscription #{} for {}",
                self.kind, id, self.context
            );
        }
    }
}

/// A read-only snapshot of one context of a stream.
///
/// Returned by [`Stream::with_context`](crate::Stream::with_context). The view is detached: later
/// broadcasts or subscriptions do not change it.
#[derive(Debug, Clone)]
pub struct ContextView<T> {
    context: Context,
    history: Option<T>,
    registrations: Vec<RegistrationInfo>,
}

impl<T> ContextView<T> {
    /// An empty view, for contexts that have never been used.
    pub(crate) fn empty(context: Context) -> Self {
        Self {
            context,
            history: None,
            registrations: Vec::new(),
        }
    }

    /// The context this view describes.
    #[inline]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The last value broadcast to the context.
    #[inline]
    pub fn history(&self) -> Option<&T> {
        self.history.as_ref()
    }

    /// Returns `true` if anything has been broadcast to the context.
    #[inline]
    pub fn has_history(&self) -> bool {
        self.history.is_some()
    }

    /// The number of live registrations.
    #[inline]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Returns `true` if no handler is registered for the context.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Live registrations in subscribe order.
    #[inline]
    pub fn registrations(&self) -> &[RegistrationInfo] {
        &self.registrations
    }

    /// Returns `true` if `subscription` is registered in the context.
    pub fn contains(&self, subscription: &Subscription) -> bool {
        self.find(subscription).is_some()
    }

    /// Broadcasts witnessed by `subscription`, or `None` if it is not registered here.
    pub fn trigger_count(&self, subscription: &Subscription) -> Option<u64> {
        self.find(subscription).map(|info| info.trigger_count)
    }

    fn find(&self, subscription: &Subscription) -> Option<&RegistrationInfo> {
        self.registrations
            .iter()
            .find(|info| info.id == subscription.id())
    }
}

/// One registration as seen through a [`ContextView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationInfo {
    id: u64,
    mode: Registration,
    trigger_count: u64,
}

impl RegistrationInfo {
    /// The subscription id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the registration persists or runs once.
    #[inline]
    pub fn mode(&self) -> Registration {
        self.mode
    }

    /// Broadcasts witnessed by the registration.
    #[inline]
    pub fn trigger_count(&self) -> u64 {
        self.trigger_count
    }
}
