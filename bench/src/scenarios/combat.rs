//! Combat benchmark scenario.
//!
//! Simulates an arena of units taking hits:
//! - Every unit is a context on the `Damage` and `Died` streams
//! - Per unit: a health handler, a HUD handler that catches up on history, and a run-once death
//!   listener
//! - Each frame deals random hits; a health handler that drops to zero broadcasts `Died` from
//!   inside the `Damage` broadcast, and dead units respawn with a fresh death listener
//!
//! This scenario tests:
//! - Broadcast throughput across many contexts
//! - Re-entrant broadcasts of another kind
//! - Run-once consumption and re-subscription churn

use std::sync::{
    Arc,
    atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering},
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rusty_streams::{Context, FetchHistory, Registration, Stream, Streams, Subscription};

use crate::events::{Damage, Died};
use crate::scenarios::Scenario;

/// Configuration for the combat benchmark.
pub struct CombatConfig {
    /// Number of units in the arena.
    pub unit_count: usize,
    /// Hits dealt per frame.
    pub hits_per_frame: usize,
    /// Upper bound (inclusive) of a single hit.
    pub max_damage: u32,
    /// Health a unit spawns with.
    pub starting_health: i64,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            unit_count: 1_000,
            hits_per_frame: 500,
            max_damage: 40,
            starting_health: 100,
            seed: 12345,
        }
    }
}

/// Namespace for unit contexts.
struct Unit;

struct UnitState {
    context: Context,
    health: Arc<AtomicI64>,
    last_hit: Arc<AtomicU32>,
    subscriptions: Vec<Subscription>,
}

/// Combat benchmark scenario.
pub struct CombatScenario {
    config: CombatConfig,
    registry: Streams,
    damage: Arc<Stream<Damage>>,
    died: Arc<Stream<Died>>,
    units: Vec<UnitState>,
    deaths: Arc<AtomicU64>,
    rng: ChaCha8Rng,
}

impl CombatScenario {
    /// Create a new combat scenario with default config.
    pub fn new() -> Self {
        Self::with_config(CombatConfig::default())
    }

    /// Create a new combat scenario with custom config.
    pub fn with_config(config: CombatConfig) -> Self {
        let registry = Streams::new();
        let damage = registry.get::<Damage>();
        let died = registry.get::<Died>();
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            registry,
            damage,
            died,
            units: Vec::new(),
            deaths: Arc::new(AtomicU64::new(0)),
            rng,
        }
    }

    /// Total deaths observed by run-once listeners so far.
    pub fn deaths(&self) -> u64 {
        self.deaths.load(Ordering::Relaxed)
    }

    /// The last hit shown on a unit's HUD, if the unit exists.
    pub fn last_hit(&self, unit: usize) -> Option<u32> {
        self.units
            .get(unit)
            .map(|u| u.last_hit.load(Ordering::Relaxed))
    }

    /// The registry the scenario's streams live in.
    pub fn registry(&self) -> &Streams {
        &self.registry
    }

    /// Deal one frame worth of hits.
    ///
    /// Does nothing until the arena has units.
    pub fn deal_hits(&mut self) {
        if self.units.is_empty() {
            return;
        }

        let max_damage = self.config.max_damage.max(1);
        for _ in 0..self.config.hits_per_frame {
            let target = self.rng.gen_range(0..self.units.len());
            let hit = Damage {
                amount: self.rng.gen_range(1..=max_damage),
                source: self.rng.gen_range(0..self.units.len() as u32),
            };
            self.damage.broadcast(&self.units[target].context, hit);
        }
    }

    /// Bring dead units back and re-arm their death listeners.
    pub fn respawn(&mut self) {
        for unit in &self.units {
            if unit.health.load(Ordering::Relaxed) <= 0 {
                unit.health
                    .store(self.config.starting_health, Ordering::Relaxed);
                self.arm_death_listener(&unit.context);
            }
        }
    }

    fn arm_death_listener(&self, context: &Context) {
        let deaths = Arc::clone(&self.deaths);
        // Death listeners are never disposed by hand; the broadcast consumes them.
        let _ = self.died.subscribe_with(
            context,
            move |_: &u32| {
                deaths.fetch_add(1, Ordering::Relaxed);
            },
            Registration::RunOnce,
            FetchHistory::No,
        );
    }

    fn spawn_unit(&self, index: usize) -> UnitState {
        let context = Context::keyed::<Unit>(index as u64);
        let health = Arc::new(AtomicI64::new(self.config.starting_health));
        let last_hit = Arc::new(AtomicU32::new(0));

        let on_hit = {
            let health = Arc::clone(&health);
            let died = Arc::clone(&self.died);
            let context = context.clone();
            move |hit: &Damage| {
                let before = health.fetch_sub(i64::from(hit.amount), Ordering::Relaxed);
                let after = before - i64::from(hit.amount);
                if before > 0 && after <= 0 {
                    died.broadcast(&context, hit.source);
                }
            }
        };
        let on_hud = {
            let last_hit = Arc::clone(&last_hit);
            move |hit: &Damage| last_hit.store(hit.amount, Ordering::Relaxed)
        };

        let mut subscriptions = vec![self.damage.subscribe(&context, on_hit)];
        subscriptions.extend(self.damage.subscribe_with(
            &context,
            on_hud,
            Registration::Persistent,
            FetchHistory::Yes,
        ));
        self.arm_death_listener(&context);

        UnitState {
            context,
            health,
            last_hit,
            subscriptions,
        }
    }
}

impl Default for CombatScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for CombatScenario {
    fn name(&self) -> &'static str {
        "combat"
    }

    fn description(&self) -> &'static str {
        "Random hits across many unit contexts with re-entrant death broadcasts"
    }

    fn context_count(&self) -> usize {
        self.config.unit_count
    }

    fn setup(&mut self) {
        self.units = (0..self.config.unit_count)
            .map(|i| self.spawn_unit(i))
            .collect();
    }

    fn update(&mut self) {
        self.deal_hits();
        self.respawn();
    }

    fn teardown(&mut self) {
        for unit in self.units.drain(..) {
            for subscription in unit.subscriptions {
                let _ = subscription.dispose();
            }
        }
    }
}
