//! Type-keyed registry of streams.
//!
//! This module provides [`Streams`], which owns exactly one [`Stream`] per [`Event`] kind, and the
//! process-wide instance returned by [`streams()`].
//!
//! # Overview
//!
//! - **Lazy binding**: a kind's stream is default-constructed the first time it is asked for
//! - **Type-safe access**: streams are looked up by the kind's `TypeId` and handed out as
//!   `Arc<Stream<E>>`
//! - **No teardown**: once bound, a stream lives as long as its registry
//!
//! # Type Erasure
//!
//! Internally, streams are stored as `Arc<dyn ErasedStream>` keyed by `TypeId`. The typed
//! accessors downcast back to the concrete `Stream<E>`.
//!
//! # Global or Injected
//!
//! Code that wants isolation (tests, multiple simulations in one process) creates its own
//! `Streams` and passes it around. Everything else shares the lazily initialised process-wide
//! registry:
//!
//! ```rust,ignore
//! // Shared registry
//! let damage = rusty_streams::get::<Damage>();
//!
//! // Private registry
//! let registry = Streams::new();
//! let damage = registry.get::<Damage>();
//! ```

use std::{
    any::{Any, TypeId, type_name},
    fmt,
    sync::{Arc, OnceLock},
};

use dashmap::{DashMap, mapref::entry::Entry};
use log::error;

use crate::{event::Event, stream::Stream};

/// The process-wide registry, created on first access.
static STREAMS: OnceLock<Streams> = OnceLock::new();

/// The process-wide registry.
///
/// Initialised on first call and never torn down.
pub fn streams() -> &'static Streams {
    STREAMS.get_or_init(Streams::new)
}

/// The process-wide stream for kind `E`. Shorthand for `streams().get::<E>()`.
pub fn get<E: Event>() -> Arc<Stream<E>> {
    streams().get::<E>()
}

/// Type-erased interface for streams.
///
/// Lets [`Streams`] hold streams of every kind in one map while still answering questions that
/// do not depend on the payload type.
pub(crate) trait ErasedStream: Send + Sync {
    /// The type name of the stream's kind.
    fn kind(&self) -> &'static str;

    /// The number of contexts the stream has state for.
    fn context_count(&self) -> usize;

    /// Returns self as `Arc<dyn Any>` for downcasting.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<E: Event> ErasedStream for Stream<E> {
    fn kind(&self) -> &'static str {
        Stream::kind(self)
    }

    fn context_count(&self) -> usize {
        Stream::context_count(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A registry holding one [`Stream`] per event kind.
pub struct Streams {
    /// Type-erased streams, keyed by the kind's TypeId. Entries are never removed.
    streams: DashMap<TypeId, Arc<dyn ErasedStream>>,
}

impl Streams {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
        }
    }

    /// The stream for kind `E`, created on first access.
    ///
    /// Every call for the same kind returns the same instance.
    pub fn get<E: Event>(&self) -> Arc<Stream<E>> {
        if let Some(stream) = self.lookup::<E>() {
            return stream;
        }
        self.bind::<E>()
    }

    /// Returns `true` if a stream for kind `E` exists.
    #[inline]
    pub fn is_bound<E: Event>(&self) -> bool {
        self.streams.contains_key(&TypeId::of::<E>())
    }

    /// The number of bound kinds.
    #[inline]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Returns `true` if no kind has been bound yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// The type names of all bound kinds, in no particular order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.streams.iter().map(|entry| entry.value().kind()).collect()
    }

    /// The existing stream for kind `E`, if any.
    fn lookup<E: Event>(&self) -> Option<Arc<Stream<E>>> {
        let erased = Arc::clone(self.streams.get(&TypeId::of::<E>())?.value());
        Some(downcast::<E>(erased))
    }

    /// Bind a newly constructed stream for kind `E`.
    ///
    /// Only reached when a lookup missed. If the kind turns out to be bound already (two callers
    /// racing on first access), the existing stream wins and the attempt is reported.
    pub(crate) fn bind<E: Event>(&self) -> Arc<Stream<E>> {
        match self.streams.entry(TypeId::of::<E>()) {
            Entry::Occupied(occupied) => {
                error!(
                    "[streams] Stream already registered for {}",
                    type_name::<E>()
                );
                downcast::<E>(Arc::clone(occupied.get()))
            }
            Entry::Vacant(vacant) => {
                let stream = Arc::new(Stream::<E>::new());
                vacant.insert(Arc::clone(&stream) as Arc<dyn ErasedStream>);
                stream
            }
        }
    }
}

impl Default for Streams {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Streams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for entry in self.streams.iter() {
            map.entry(&entry.value().kind(), &entry.value().context_count());
        }
        map.finish()
    }
}

/// Recover the concrete stream for kind `E`.
fn downcast<E: Event>(erased: Arc<dyn ErasedStream>) -> Arc<Stream<E>> {
    match erased.into_any().downcast::<Stream<E>>() {
        Ok(stream) => stream,
        Err(_) => unreachable!("stream stored under the TypeId of {}", type_name::<E>()),
    }
}
