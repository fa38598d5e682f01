//! Event kinds.

use std::fmt::Debug;

/// Derive macro for [`Event`]. See the trait documentation for the accepted attributes.
pub use rusty_streams_macros::Event;

/// An event kind.
///
/// Each kind is a distinct Rust type and owns exactly one [`Stream`](crate::Stream) in a
/// [`Streams`](crate::Streams) registry. The value carried by a broadcast is [`Event::Arg`].
/// Streams are keyed by the kind, never by the payload, so two kinds sharing a payload type stay
/// isolated.
///
/// # Derive Macro
///
/// A type that is its own payload:
///
/// ```rust,ignore
/// #[derive(Event, Clone, Debug)]
/// struct Damage {
///     amount: u32,
/// }
/// ```
///
/// A tag type carrying another payload:
///
/// ```rust,ignore
/// #[derive(Event)]
/// #[event(arg = u32)]
/// struct ScoreChanged;
/// ```
///
/// # Trait Bounds
///
/// - `'static`: Kinds are looked up by `TypeId`
/// - `Send + Sync`: Streams live in a process-wide registry
/// - `Arg: Clone`: History is handed out as detached snapshots
/// - `Arg: Debug`: For verbose tracing
pub trait Event: 'static + Send + Sync {
    /// The payload delivered to subscribers of this kind.
    type Arg: Clone + Debug + Send + Sync + 'static;
}
