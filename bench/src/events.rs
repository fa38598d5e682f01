//! Event kinds used across benchmarks.
//!
//! Payloads are sized like real gameplay events: a small copyable struct, a bare counter, and a
//! heap-carrying message.

use rusty_streams::Event;

/// Damage dealt to an entity (8 bytes).
#[derive(Event, Clone, Copy, Debug, Default, PartialEq)]
pub struct Damage {
    pub amount: u32,
    pub source: u32,
}

/// An entity's health reached zero.
#[derive(Event)]
#[event(arg = u32)]
pub struct Died;

/// A frame tick on the global context.
#[derive(Event)]
#[event(arg = u64)]
pub struct Tick;

/// A chat line, to measure delivery of heap-owning payloads.
#[derive(Event, Clone, Debug, Default, PartialEq)]
pub struct Chat {
    pub sender: u32,
    pub text: String,
}
