//! The per-kind dispatch engine.
//!
//! This module provides [`Stream`], which owns every subscription and the broadcast history for
//! one [`Event`] kind, partitioned by [`Context`].
//!
//! # Overview
//!
//! - **Subscribe**: register a handler for a context, optionally catching up on the last value
//!   broadcast there ([`FetchHistory::Yes`]), either until disposed ([`Registration::Persistent`])
//!   or for a single delivery ([`Registration::RunOnce`])
//! - **Broadcast**: synchronously hand a value to every handler of a context, in subscribe order,
//!   then remember it as that context's history
//! - **Dispose**: the [`Subscription`] returned by `subscribe` removes exactly that registration
//!
//! # Delivery During a Broadcast
//!
//! A broadcast snapshots the registrations of its context before invoking anyone, and no lock is
//! held while handlers run. Handlers may therefore subscribe, dispose, or broadcast again:
//!
//! - Registrations added during a broadcast first take part in the next one. They are neither
//!   delivered, trigger-counted, nor consumed (run-once) by the broadcast in progress.
//! - Registrations disposed during a broadcast are skipped if their turn has not come yet.
//!
//! A handler that panics unwinds out of [`Stream::broadcast`]. Handlers after it are skipped and
//! the broadcast is neither recorded as history nor counted.
//!
//! # Example
//!
//! ```rust,ignore
//! let stream = Stream::<Damage>::new();
//! let enemy = Context::unique();
//!
//! let sub = stream.subscribe(&enemy, |d: &Damage| println!("ouch: {}", d.amount));
//! stream.broadcast(&enemy, Damage { amount: 5 });
//! sub.dispose()?;
//! ```

mod channel;
mod subscription;

use std::{
    any::type_name,
    fmt,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::DashMap;
use log::debug;

use crate::{context::Context, event::Event, handler::Handler};

use channel::Channel;

pub use channel::{ContextView, RegistrationInfo};
pub use subscription::{DisposeError, Subscription};

/// How long a registration lasts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Registration {
    /// Stays registered until its subscription is disposed.
    #[default]
    Persistent,
    /// Removed automatically after the first broadcast it receives.
    RunOnce,
}

/// Whether a new subscriber is first handed the context's last broadcast value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchHistory {
    /// Invoke the handler with the last value, if there is one, before registering it.
    Yes,
    /// Only deliver future broadcasts.
    #[default]
    No,
}

/// The dispatch engine for one event kind.
///
/// A `Stream<E>` maps each [`Context`] to its own ordered subscriber list and last-value history.
/// Streams are normally obtained from the [`Streams`](crate::Streams) registry, which keeps one
/// per kind, but a stream can also be created and owned directly.
///
/// # Thread Safety
///
/// `Stream` is `Send + Sync` so it can live in a process-wide registry, and concurrent calls do
/// not corrupt it. Delivery is always synchronous on the broadcasting thread; there is no queueing
/// and ordering across threads is not defined.
pub struct Stream<E: Event> {
    /// Dispatch state per context. Contexts are created on first use and never evicted.
    channels: DashMap<Context, Arc<Channel<E::Arg>>>,

    /// Verbose tracing toggle, shared with every channel.
    verbose: Arc<AtomicBool>,

    _kind: PhantomData<fn() -> E>,
}

impl<E: Event> Stream<E> {
    /// Create an empty stream with no contexts and no subscribers.
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            verbose: Arc::new(AtomicBool::new(false)),
            _kind: PhantomData,
        }
    }

    /// The type name of this stream's kind.
    #[inline]
    pub fn kind(&self) -> &'static str {
        type_name::<E>()
    }

    /// Enable or disable verbose tracing of subscriptions and broadcasts.
    ///
    /// Traces are emitted at `debug` level through the `log` facade.
    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    /// Returns `true` if verbose tracing is enabled.
    #[inline]
    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    /// The number of contexts this stream has dispatch state for.
    #[inline]
    pub fn context_count(&self) -> usize {
        self.channels.len()
    }

    /// Subscribe a persistent handler to `context`.
    ///
    /// The handler receives every later broadcast to `context` until the returned subscription
    /// is disposed.
    pub fn subscribe(
        &self,
        context: impl Into<Context>,
        handler: impl Into<Handler<E::Arg>>,
    ) -> Subscription {
        self.channel(&context.into())
            .register(handler.into(), Registration::Persistent)
    }

    /// Subscribe a handler to `context` with explicit registration and history options.
    ///
    /// With [`FetchHistory::Yes`] and a value already broadcast to `context`, the handler is
    /// invoked with that value before this call returns. If the registration is also
    /// [`Registration::RunOnce`], that replay is its one delivery: nothing is registered and
    /// `None` is returned. In every other case the handler is registered and its subscription is
    /// returned.
    pub fn subscribe_with(
        &self,
        context: impl Into<Context>,
        handler: impl Into<Handler<E::Arg>>,
        registration: Registration,
        fetch_history: FetchHistory,
    ) -> Option<Subscription> {
        let context = context.into();
        let handler = handler.into();
        let channel = self.channel(&context);

        if fetch_history == FetchHistory::Yes
            && let Some(history) = channel.history()
        {
            if self.is_verbose() {
                debug!(
                    "[stream][{}] Replaying history for {}: {:?}",
                    self.kind(),
                    context,
                    history
                );
            }
            handler.call(&history);
            if registration == Registration::RunOnce {
                return None;
            }
        }

        Some(channel.register(handler, registration))
    }

    /// Subscribe a persistent handler to the stream's [global](Context::GLOBAL) context.
    pub fn subscribe_global(&self, handler: impl Into<Handler<E::Arg>>) -> Subscription {
        self.subscribe(Context::GLOBAL, handler)
    }

    /// [`subscribe_with`](Self::subscribe_with) on the stream's [global](Context::GLOBAL) context.
    pub fn subscribe_global_with(
        &self,
        handler: impl Into<Handler<E::Arg>>,
        registration: Registration,
        fetch_history: FetchHistory,
    ) -> Option<Subscription> {
        self.subscribe_with(Context::GLOBAL, handler, registration, fetch_history)
    }

    /// Deliver `value` to every handler subscribed to `context`.
    ///
    /// Handlers run synchronously, in subscribe order, on the calling thread. Afterwards `value`
    /// becomes the context's history, every registration that was delivered to has its trigger
    /// count incremented, and run-once registrations are removed.
    pub fn broadcast(&self, context: impl Into<Context>, value: E::Arg) {
        let context = context.into();
        let channel = self.channel(&context);
        let delivery = channel.snapshot();

        if self.is_verbose() {
            debug!(
                "[stream][{}] Broadcasting to {} handler(s) for {}: {:?}",
                self.kind(),
                delivery.len(),
                context,
                value
            );
        }

        delivery.run(&value);
        channel.settle(value, &delivery);
    }

    /// Broadcast `value` on the stream's [global](Context::GLOBAL) context.
    pub fn broadcast_global(&self, value: E::Arg) {
        self.broadcast(Context::GLOBAL, value);
    }

    /// A read-only snapshot of `context`: its history and live registrations.
    ///
    /// Looking at a context never creates dispatch state for it; an unused context yields an
    /// empty view.
    pub fn with_context(&self, context: impl Into<Context>) -> ContextView<E::Arg> {
        let context = context.into();
        match self.channels.get(&context) {
            Some(channel) => channel.view(),
            None => ContextView::empty(context),
        }
    }

    /// Fetch the channel for `context`, creating it on first use.
    fn channel(&self, context: &Context) -> Arc<Channel<E::Arg>> {
        if let Some(channel) = self.channels.get(context) {
            return Arc::clone(channel.value());
        }

        let channel = self.channels.entry(context.clone()).or_insert_with(|| {
            if self.is_verbose() {
                debug!(
                    "[stream][{}] No state for {}, creating it",
                    self.kind(),
                    context
                );
            }
            Arc::new(Channel::new(
                context.clone(),
                self.kind(),
                Arc::clone(&self.verbose),
            ))
        });
        Arc::clone(channel.value())
    }
}

impl<E: Event> Default for Stream<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for Stream<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("kind", &self.kind())
            .field("contexts", &self.context_count())
            .field("verbose", &self.is_verbose())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::{self, AssertUnwindSafe},
        sync::{
            Mutex,
            atomic::{AtomicU32, AtomicUsize},
        },
    };

    use log::Level;

    use super::*;
    use crate::diagnostics::capture;

    #[derive(Event, Clone, Debug, PartialEq)]
    struct Damage {
        amount: u32,
    }

    #[derive(Event)]
    #[event(arg = u32)]
    struct Tick;

    type Log<T> = Arc<Mutex<Vec<T>>>;

    fn sink<T>() -> Log<T> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record<T: Clone + Send + 'static>(log: &Log<T>) -> Handler<T> {
        let log = Arc::clone(log);
        Handler::new(move |v: &T| log.lock().unwrap().push(v.clone()))
    }

    fn tagged(log: &Log<(char, u32)>, tag: char) -> Handler<u32> {
        let log = Arc::clone(log);
        Handler::new(move |v: &u32| log.lock().unwrap().push((tag, *v)))
    }

    fn counter() -> (Arc<AtomicUsize>, Handler<u32>) {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        let handler = Handler::new(move |_: &u32| {
            hits.fetch_add(1, Ordering::Relaxed);
        });
        (count, handler)
    }

    // ==================== Subscribe / Broadcast ====================

    #[test]
    fn new_stream_is_empty() {
        let stream = Stream::<Tick>::new();

        assert_eq!(stream.context_count(), 0);
        assert!(!stream.is_verbose());
        assert!(stream.kind().ends_with("Tick"));
    }

    #[test]
    fn broadcast_reaches_subscribers_in_order() {
        // Given
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        let seen = sink();
        let _ = stream.subscribe(ctx, tagged(&seen, 'a'));
        let _ = stream.subscribe(ctx, tagged(&seen, 'b'));
        let _ = stream.subscribe(ctx, tagged(&seen, 'c'));

        // When
        stream.broadcast(ctx, 7);

        // Then
        assert_eq!(*seen.lock().unwrap(), vec![('a', 7), ('b', 7), ('c', 7)]);
    }

    #[test]
    fn broadcast_without_subscribers_records_history() {
        // Given
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();

        // When
        stream.broadcast(ctx, 3);

        // Then
        let view = stream.with_context(ctx);
        assert!(view.has_history());
        assert_eq!(view.history(), Some(&3));
        assert!(view.is_empty());
    }

    #[test]
    fn history_is_last_value_wins() {
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();

        stream.broadcast(ctx, 1);
        stream.broadcast(ctx, 2);
        stream.broadcast(ctx, 3);

        assert_eq!(stream.with_context(ctx).history(), Some(&3));
    }

    #[test]
    fn noop_handler_is_a_registration_that_does_nothing() {
        // Given
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        let sub = stream.subscribe(ctx, Handler::noop());

        // When
        stream.broadcast(ctx, 1);

        // Then
        assert_eq!(stream.with_context(ctx).trigger_count(&sub), Some(1));
        assert_eq!(sub.dispose(), Ok(()));
    }

    #[test]
    fn same_handler_subscribed_twice_is_delivered_twice() {
        // Given
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        let (count, handler) = counter();
        let first = stream.subscribe(ctx, handler.clone());
        let _ = stream.subscribe(ctx, handler);

        // When
        stream.broadcast(ctx, 1);
        first.dispose().unwrap();
        stream.broadcast(ctx, 2);

        // Then
        assert_eq!(count.load(Ordering::Relaxed), 3);
    }

    // ==================== Contexts ====================

    #[test]
    fn contexts_are_isolated() {
        // Given
        let stream = Stream::<Tick>::new();
        let a = &Context::unique();
        let b = &Context::unique();
        let seen = sink();
        let _ = stream.subscribe(a, tagged(&seen, 'a'));
        let _ = stream.subscribe(b, tagged(&seen, 'b'));

        // When
        stream.broadcast(a, 1);

        // Then
        assert_eq!(*seen.lock().unwrap(), vec![('a', 1)]);
        assert!(!stream.with_context(b).has_history());
    }

    #[test]
    fn equal_values_behind_different_arcs_are_different_contexts() {
        // Given
        let stream = Stream::<Tick>::new();
        let first = Arc::new(String::from("orc"));
        let second = Arc::new(String::from("orc"));
        let seen = sink();
        let _ = stream.subscribe(&second, tagged(&seen, 's'));

        // When
        stream.broadcast(&first, 1);

        // Then
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(stream.context_count(), 2);
    }

    #[test]
    fn dropped_object_state_is_not_inherited_by_a_new_allocation() {
        // Given
        let stream = Stream::<Tick>::new();
        let first = Arc::new(String::from("hero"));
        let retired = Arc::downgrade(&first);
        let _ = stream.subscribe(&first, Handler::noop());
        stream.broadcast(&first, 99);
        drop(first);

        // When
        let second = Arc::new(String::from("hero"));
        let seen = sink();
        let sub = stream
            .subscribe_with(&second, record(&seen), Registration::Persistent, FetchHistory::Yes)
            .unwrap();

        // Then
        assert!(retired.upgrade().is_some());
        assert!(seen.lock().unwrap().is_empty());
        let view = stream.with_context(&second);
        assert!(!view.has_history());
        assert_eq!(view.len(), 1);
        assert_eq!(view.trigger_count(&sub), Some(0));
        assert_eq!(stream.context_count(), 2);
    }

    #[test]
    fn global_context_is_separate_from_scoped_contexts() {
        // Given
        let stream = Stream::<Tick>::new();
        let scoped = &Context::unique();
        let seen = sink();
        let _ = stream.subscribe_global(tagged(&seen, 'g'));
        let _ = stream.subscribe(scoped, tagged(&seen, 's'));

        // When
        stream.broadcast_global(1);
        stream.broadcast(scoped, 2);

        // Then
        assert_eq!(*seen.lock().unwrap(), vec![('g', 1), ('s', 2)]);
        assert_eq!(stream.with_context(Context::GLOBAL).history(), Some(&1));
    }

    #[test]
    fn with_context_does_not_create_state() {
        let stream = Stream::<Tick>::new();

        let view = stream.with_context(Context::unique());

        assert!(view.is_empty());
        assert!(!view.has_history());
        assert_eq!(stream.context_count(), 0);
    }

    // ==================== History ====================

    #[test]
    fn persistent_subscribe_with_history_replays_then_stays() {
        // Given
        let stream = Stream::<Damage>::new();
        let ctx = &Context::unique();
        let seen = sink();
        stream.broadcast(ctx, Damage { amount: 10 });

        // When
        let sub = stream.subscribe_with(
            ctx,
            record(&seen),
            Registration::Persistent,
            FetchHistory::Yes,
        );

        // Then
        assert_eq!(*seen.lock().unwrap(), vec![Damage { amount: 10 }]);
        let sub = sub.expect("persistent subscriptions are always registered");

        stream.broadcast(ctx, Damage { amount: 4 });
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Damage { amount: 10 }, Damage { amount: 4 }]
        );
        assert_eq!(stream.with_context(ctx).trigger_count(&sub), Some(1));
    }

    #[test]
    fn run_once_with_history_is_consumed_by_the_replay() {
        // Given
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        let seen = sink();
        stream.broadcast(ctx, 1);

        // When
        let sub =
            stream.subscribe_with(ctx, record(&seen), Registration::RunOnce, FetchHistory::Yes);
        stream.broadcast(ctx, 2);

        // Then
        assert!(sub.is_none());
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert!(stream.with_context(ctx).is_empty());
    }

    #[test]
    fn run_once_with_history_requested_but_none_present_registers() {
        // Given
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        let seen = sink();

        // When
        let sub =
            stream.subscribe_with(ctx, record(&seen), Registration::RunOnce, FetchHistory::Yes);

        // Then
        let sub = sub.expect("nothing to replay, so the handler is registered");
        assert!(seen.lock().unwrap().is_empty());

        stream.broadcast(ctx, 5);
        stream.broadcast(ctx, 6);
        assert_eq!(*seen.lock().unwrap(), vec![5]);
        assert!(sub.is_disposed());
        assert!(!stream.with_context(ctx).contains(&sub));
    }

    #[test]
    fn fetch_history_no_skips_replay() {
        // Given
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        let seen = sink();
        stream.broadcast(ctx, 1);

        // When
        let sub =
            stream.subscribe_with(ctx, record(&seen), Registration::RunOnce, FetchHistory::No);

        // Then
        assert!(sub.is_some());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn history_is_per_context() {
        // Given
        let stream = Stream::<Damage>::new();
        let entity1 = &Context::unique();
        let entity2 = &Context::unique();
        let first = sink();
        let second = sink();
        stream.broadcast(entity1, Damage { amount: 10 });

        // When
        stream.subscribe_with(
            entity1,
            record(&first),
            Registration::Persistent,
            FetchHistory::Yes,
        );
        stream.subscribe_with(
            entity2,
            record(&second),
            Registration::Persistent,
            FetchHistory::Yes,
        );

        // Then
        assert_eq!(*first.lock().unwrap(), vec![Damage { amount: 10 }]);
        assert!(second.lock().unwrap().is_empty());
    }

    #[test]
    fn global_subscribe_with_history() {
        let stream = Stream::<Tick>::new();
        let seen = sink();
        stream.broadcast_global(8);

        let sub =
            stream.subscribe_global_with(record(&seen), Registration::RunOnce, FetchHistory::Yes);

        assert!(sub.is_none());
        assert_eq!(*seen.lock().unwrap(), vec![8]);
    }

    // ==================== Run Once ====================

    #[test]
    fn run_once_is_removed_after_first_broadcast() {
        // Given
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        let (count, handler) = counter();
        let sub = stream
            .subscribe_with(ctx, handler, Registration::RunOnce, FetchHistory::No)
            .unwrap();

        // When
        stream.broadcast(ctx, 1);
        stream.broadcast(ctx, 2);

        // Then
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert!(sub.is_disposed());
        assert_eq!(sub.dispose(), Err(DisposeError::AlreadyDisposed { id: sub.id() }));
    }

    #[test]
    fn run_once_removal_keeps_neighbours_intact() {
        // Given
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        let seen = sink();
        let once = |tag| {
            stream
                .subscribe_with(ctx, tagged(&seen, tag), Registration::RunOnce, FetchHistory::No)
                .unwrap()
        };
        let _ = once('a');
        let _ = stream.subscribe(ctx, tagged(&seen, 'b'));
        let _ = once('c');
        let _ = once('d');
        let _ = stream.subscribe(ctx, tagged(&seen, 'e'));

        // When
        stream.broadcast(ctx, 1);
        stream.broadcast(ctx, 2);

        // Then
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ('a', 1),
                ('b', 1),
                ('c', 1),
                ('d', 1),
                ('e', 1),
                ('b', 2),
                ('e', 2)
            ]
        );
        let modes: Vec<_> = stream
            .with_context(ctx)
            .registrations()
            .iter()
            .map(|r| r.mode())
            .collect();
        assert_eq!(modes, vec![Registration::Persistent; 2]);
    }

    // ==================== Disposal ====================

    #[test]
    fn dispose_restores_the_previous_handler_set() {
        // Given
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        let keep = stream.subscribe(ctx, Handler::noop());
        let before: Vec<_> = stream.with_context(ctx).registrations().to_vec();

        // When
        let sub = stream.subscribe(ctx, Handler::noop());
        sub.dispose().unwrap();

        // Then
        assert_eq!(stream.with_context(ctx).registrations(), before.as_slice());
        assert!(stream.with_context(ctx).contains(&keep));
    }

    #[test]
    fn disposed_handler_no_longer_receives() {
        // Given
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        let (count, handler) = counter();
        let sub = stream.subscribe(ctx, handler);

        // When
        stream.broadcast(ctx, 1);
        sub.dispose().unwrap();
        stream.broadcast(ctx, 2);

        // Then
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn double_dispose_is_reported_and_harmless() {
        // Given
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        let sub = stream.subscribe(ctx, Handler::noop());
        let other = stream.subscribe(ctx, Handler::noop());

        // When
        let first = sub.dispose();
        let second = sub.dispose();

        // Then
        assert!(first.is_ok());
        assert_eq!(second, Err(DisposeError::AlreadyDisposed { id: sub.id() }));
        let view = stream.with_context(ctx);
        assert_eq!(view.len(), 1);
        assert!(view.contains(&other));
    }

    #[test]
    fn dispose_after_stream_dropped_succeeds() {
        let stream = Stream::<Tick>::new();
        let sub = stream.subscribe_global(Handler::noop());

        drop(stream);

        assert_eq!(sub.dispose(), Ok(()));
    }

    // ==================== Trigger Counting ====================

    #[test]
    fn persistent_trigger_count_matches_broadcasts() {
        // Given
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        let sub = stream.subscribe(ctx, Handler::noop());

        // When
        for i in 0..5 {
            stream.broadcast(ctx, i);
        }

        // Then
        assert_eq!(stream.with_context(ctx).trigger_count(&sub), Some(5));
    }

    #[test]
    fn trigger_count_ignores_other_contexts() {
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        let sub = stream.subscribe(ctx, Handler::noop());

        stream.broadcast(Context::unique(), 1);
        stream.broadcast(ctx, 2);

        assert_eq!(stream.with_context(ctx).trigger_count(&sub), Some(1));
    }

    #[test]
    fn late_subscriber_counts_from_zero() {
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        stream.broadcast(ctx, 1);

        let sub = stream.subscribe(ctx, Handler::noop());
        stream.broadcast(ctx, 2);

        assert_eq!(stream.with_context(ctx).trigger_count(&sub), Some(1));
    }

    // ==================== Re-entrancy ====================

    #[test]
    fn handler_added_during_broadcast_starts_with_the_next_one() {
        // Given
        let stream = Arc::new(Stream::<Tick>::new());
        let ctx = &Context::unique();
        let seen = sink();
        let late = Arc::new(Mutex::new(None));
        {
            let inner = Arc::clone(&stream);
            let seen = Arc::clone(&seen);
            let late = Arc::clone(&late);
            let target = ctx.clone();
            stream.subscribe_with(
                ctx,
                move |_: &u32| {
                    let sub = inner
                        .subscribe_with(
                            &target,
                            tagged(&seen, 'l'),
                            Registration::RunOnce,
                            FetchHistory::No,
                        )
                        .unwrap();
                    *late.lock().unwrap() = Some(sub);
                },
                Registration::RunOnce,
                FetchHistory::No,
            );
        }

        // When
        stream.broadcast(ctx, 1);

        // Then
        assert!(seen.lock().unwrap().is_empty());
        let late = late.lock().unwrap().take().unwrap();
        assert_eq!(stream.with_context(ctx).trigger_count(&late), Some(0));
        assert!(!late.is_disposed());

        stream.broadcast(ctx, 2);
        assert_eq!(*seen.lock().unwrap(), vec![('l', 2)]);
        assert!(late.is_disposed());
    }

    #[test]
    fn handler_disposed_during_broadcast_is_skipped() {
        // Given
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        let seen = sink();
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        {
            let victim = Arc::clone(&victim);
            let _ = stream.subscribe(ctx, move |_: &u32| {
                if let Some(sub) = victim.lock().unwrap().take() {
                    sub.dispose().unwrap();
                }
            });
        }
        *victim.lock().unwrap() = Some(stream.subscribe(ctx, tagged(&seen, 'v')));
        let _ = stream.subscribe(ctx, tagged(&seen, 'w'));

        // When
        stream.broadcast(ctx, 1);

        // Then
        assert_eq!(*seen.lock().unwrap(), vec![('w', 1)]);
        assert_eq!(stream.with_context(ctx).len(), 2);
    }

    #[test]
    fn handler_may_dispose_itself() {
        // Given
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicU32::new(0));
        let sub = {
            let slot = Arc::clone(&slot);
            let hits = Arc::clone(&hits);
            stream.subscribe(ctx, move |_: &u32| {
                hits.fetch_add(1, Ordering::Relaxed);
                if let Some(sub) = slot.lock().unwrap().take() {
                    sub.dispose().unwrap();
                }
            })
        };
        let id = sub.id();
        *slot.lock().unwrap() = Some(sub);

        // When
        stream.broadcast(ctx, 1);
        stream.broadcast(ctx, 2);

        // Then
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert!(
            !stream
                .with_context(ctx)
                .registrations()
                .iter()
                .any(|r| r.id() == id)
        );
    }

    #[test]
    fn handler_may_broadcast_to_another_context() {
        // Given
        let stream = Arc::new(Stream::<Tick>::new());
        let outer = &Context::unique();
        let inner = &Context::unique();
        let seen = sink();
        let _ = stream.subscribe(inner, tagged(&seen, 'i'));
        {
            let relay = Arc::clone(&stream);
            let target = inner.clone();
            let _ = stream.subscribe(outer, move |v: &u32| relay.broadcast(&target, v * 10));
        }

        // When
        stream.broadcast(outer, 4);

        // Then
        assert_eq!(*seen.lock().unwrap(), vec![('i', 40)]);
        assert_eq!(stream.with_context(inner).history(), Some(&40));
        assert_eq!(stream.with_context(outer).history(), Some(&4));
    }

    // ==================== Handler Failure ====================

    #[test]
    fn panicking_handler_propagates_and_skips_the_rest() {
        // Given
        let stream = Stream::<Tick>::new();
        let ctx = &Context::unique();
        let seen = sink();
        let _ = stream.subscribe(ctx, tagged(&seen, 'a'));
        let faulty = stream.subscribe(ctx, |v: &u32| {
            if *v == 1 {
                panic!("handler fault");
            }
        });
        let _ = stream.subscribe(ctx, tagged(&seen, 'c'));

        // When
        let result = panic::catch_unwind(AssertUnwindSafe(|| stream.broadcast(ctx, 1)));

        // Then
        assert!(result.is_err());
        assert_eq!(*seen.lock().unwrap(), vec![('a', 1)]);
        assert!(!stream.with_context(ctx).has_history());

        // The stream is still usable.
        faulty.dispose().unwrap();
        stream.broadcast(ctx, 2);
        assert_eq!(*seen.lock().unwrap(), vec![('a', 1), ('a', 2), ('c', 2)]);
    }

    // ==================== Verbose ====================

    #[test]
    fn verbose_traces_only_when_enabled() {
        #[derive(Event)]
        #[event(arg = u32)]
        struct Traced;

        // Given
        capture::start();
        let stream = Stream::<Traced>::new();
        let ctx = &Context::unique();
        stream.broadcast(ctx, 1);
        stream.subscribe(ctx, Handler::noop()).dispose().unwrap();
        let quiet = capture::messages("::Traced]");

        // When
        stream.set_verbose(true);
        stream.broadcast(ctx, 2);
        stream.subscribe(ctx, Handler::noop()).dispose().unwrap();
        let replayed =
            stream.subscribe_with(ctx, Handler::noop(), Registration::RunOnce, FetchHistory::Yes);
        stream.set_verbose(false);
        stream.broadcast(ctx, 3);

        // Then
        assert!(quiet.is_empty());
        assert!(replayed.is_none());
        assert!(!stream.is_verbose());
        let traces = capture::messages("::Traced]");
        assert!(traces.iter().all(|m| m.level == Level::Debug));
        let lines: Vec<_> = traces.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("Broadcasting to 0 handler(s)"));
        assert!(lines[1].contains("Registered Persistent subscription"));
        assert!(lines[2].contains("Disposed subscription"));
        assert!(lines[3].contains("Replaying history"));
    }

    #[test]
    fn debug_shows_kind_and_contexts() {
        let stream = Stream::<Tick>::new();
        stream.broadcast_global(1);

        let debug = format!("{stream:?}");

        assert!(debug.contains("Tick"));
        assert!(debug.contains("contexts: 1"));
    }
}
