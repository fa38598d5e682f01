//! Typed, context-scoped event streams.
//!
//! Components exchange single-value events without holding references to each other. Every event
//! kind is a Rust type implementing [`Event`]; the process-wide [`Streams`] registry hands out
//! exactly one [`Stream`] per kind. Within a stream, subscribers and history are partitioned by a
//! [`Context`] so a broadcast only reaches the scope it was made for.
//!
//! # Example
//!
//! ```rust,ignore
//! use rusty_streams::{Context, Event, FetchHistory, Registration};
//!
//! #[derive(Event, Clone, Debug)]
//! struct Damage {
//!     amount: u32,
//! }
//!
//! let player = Context::unique();
//! let damage = rusty_streams::get::<Damage>();
//!
//! damage.broadcast(&player, Damage { amount: 10 });
//!
//! // A late subscriber can catch up on the last value for its context.
//! let hud = damage.subscribe_with(
//!     &player,
//!     |d: &Damage| println!("took {}", d.amount),
//!     Registration::Persistent,
//!     FetchHistory::Yes,
//! );
//! ```

// Lets `#[derive(Event)]` expand to `::rusty_streams::Event` inside this crate too.
extern crate self as rusty_streams;

pub mod context;
pub mod diagnostics;
pub mod event;
pub mod handler;
pub mod registry;
pub mod stream;

pub use context::Context;
pub use event::Event;
pub use handler::Handler;
pub use registry::{Streams, get, streams};
pub use stream::{
    ContextView, DisposeError, FetchHistory, Registration, RegistrationInfo, Stream, Subscription,
};
