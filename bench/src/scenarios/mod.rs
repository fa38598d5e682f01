//! Game-like dispatch scenarios.
//!
//! These scenarios drive the streams the way gameplay code does: many entity contexts, a mix of
//! persistent and run-once subscribers, and subscriptions churning while events flow.
//!
//! # Scenarios
//!
//! - **Combat**: Damage broadcasts to random entities, HUD and health subscribers per entity,
//!   run-once death listeners re-armed as entities respawn

pub mod combat;

pub use combat::{CombatConfig, CombatScenario};

/// Common trait for benchmark scenarios.
pub trait Scenario {
    /// Human-readable name of the scenario.
    fn name(&self) -> &'static str;

    /// Brief description of what this scenario tests.
    fn description(&self) -> &'static str;

    /// Number of contexts in this scenario.
    fn context_count(&self) -> usize;

    /// Set up the scenario (create contexts, subscribe handlers).
    fn setup(&mut self);

    /// Run one "frame" of the scenario.
    fn update(&mut self);

    /// Clean up the scenario.
    fn teardown(&mut self);
}
