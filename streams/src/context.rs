//! Identities that scope subscriptions and history within a stream.
//!
//! A [`Context`] is compared by identity, never by value: two distinct objects that happen to be
//! equal are still two different contexts. A context made from a shared allocation holds a strong
//! reference to it, so the address it is keyed by cannot be handed to another object while the
//! context, or any stream state keyed by it, is alive. Contexts are cheap to clone, and `&Context`
//! converts into `Context` wherever one is expected.
//!
//! # Kinds of identity
//!
//! - [`Context::GLOBAL`]: the unscoped channel of a stream
//! - [`Context::unique()`]: a freshly minted identity, never handed out twice
//! - [`Context::of()`]: the identity of a shared allocation (`Arc<T>`)
//! - [`Context::keyed()`]: a host-owned identity (e.g. an entity handle), namespaced by type
//!
//! # Example
//!
//! ```rust,ignore
//! let player = Arc::new(Player::default());
//! let ctx = Context::of(&player);
//!
//! damage.broadcast(&ctx, Damage { amount: 10 });
//! damage.broadcast(Context::keyed::<Entity>(42), Damage { amount: 3 });
//! ```

use std::{
    any::{Any, TypeId, type_name},
    fmt,
    hash::{Hash, Hasher},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// Source of [`Context::unique()`] identities. Zero is never handed out.
static NEXT_UNIQUE: AtomicU64 = AtomicU64::new(1);

/// An identity used to partition a stream's subscribers and history.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Context(Identity);

#[derive(Clone, PartialEq, Eq, Hash)]
enum Identity {
    /// The stream's own scope.
    Global,
    /// A minted identity.
    Unique(u64),
    /// A shared allocation, kept alive by the context.
    Shared(Anchor),
    /// A host-supplied key within a namespace.
    Keyed {
        namespace: TypeId,
        namespace_name: &'static str,
        key: u64,
    },
}

impl Context {
    /// The default context of a stream.
    ///
    /// Subscribing or broadcasting without a scope uses this context. Every stream owns its own
    /// contexts, so `GLOBAL` on one kind never reaches subscribers of another kind.
    pub const GLOBAL: Self = Self(Identity::Global);

    /// Mint a new identity, distinct from every other context.
    #[inline]
    pub fn unique() -> Self {
        Self(Identity::Unique(NEXT_UNIQUE.fetch_add(1, Ordering::Relaxed)))
    }

    /// The identity of a shared allocation.
    ///
    /// The context keeps a clone of `value`, so the allocation outlives every context (and every
    /// stream state) keyed by it and its address is never reused for another object meanwhile.
    #[inline]
    pub fn of<T: Send + Sync + 'static>(value: &Arc<T>) -> Self {
        Self(Identity::Shared(Anchor(Arc::clone(value) as Arc<dyn Any + Send + Sync>)))
    }

    /// An identity supplied by the host, namespaced by `N`.
    ///
    /// Use this when the host already owns an identity scheme, such as generational entity
    /// handles. Keys from different namespaces never compare equal.
    #[inline]
    pub fn keyed<N: 'static>(key: u64) -> Self {
        Self(Identity::Keyed {
            namespace: TypeId::of::<N>(),
            namespace_name: type_name::<N>(),
            key,
        })
    }

    /// Returns `true` if this is the stream's default context.
    #[inline]
    pub fn is_global(&self) -> bool {
        matches!(self.0, Identity::Global)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::GLOBAL
    }
}

impl<T: Send + Sync + 'static> From<&Arc<T>> for Context {
    #[inline]
    fn from(value: &Arc<T>) -> Self {
        Self::of(value)
    }
}

impl From<&Context> for Context {
    #[inline]
    fn from(value: &Context) -> Self {
        value.clone()
    }
}

/// A strong reference compared and hashed by the address it points to.
#[derive(Clone)]
struct Anchor(Arc<dyn Any + Send + Sync>);

impl Anchor {
    #[inline]
    fn address(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl PartialEq for Anchor {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for Anchor {}

impl Hash for Anchor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Identity::Global => write!(f, "Context(global)"),
            Identity::Unique(id) => write!(f, "Context(#{id})"),
            Identity::Shared(anchor) => write!(f, "Context({:#x})", anchor.address()),
            Identity::Keyed {
                namespace_name,
                key,
                ..
            } => write!(f, "Context({namespace_name}:{key})"),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
