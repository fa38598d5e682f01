//! Walkthrough of context-scoped damage events.
//!
//! This example shows:
//! - Subscribing per entity and on the global context
//! - History replay for late subscribers
//! - Run-once registrations
//! - Idempotent disposal and the diagnostics it reports

use std::sync::Arc;

use rusty_streams::{
    Context, Event, FetchHistory, Registration, Subscription, diagnostics, get,
};

// ============================================================================
// Event kinds
// ============================================================================

#[derive(Event, Clone, Debug)]
struct Damage {
    amount: i32,
}

#[derive(Event)]
#[event(arg = String)]
struct Announcement;

#[derive(Debug, Default)]
struct Player {
    name: &'static str,
}

// ============================================================================
// Walkthrough
// ============================================================================

fn main() {
    let diagnostics = match diagnostics::install(log::LevelFilter::Debug) {
        Ok(receiver) => Some(receiver),
        Err(err) => {
            println!("diagnostics unavailable: {err}");
            None
        }
    };

    let hero = Arc::new(Player { name: "hero" });
    let goblin = Arc::new(Player { name: "goblin" });
    let damage = get::<Damage>();
    damage.set_verbose(true);

    println!("\n=== Scoped subscribers ===");
    let hero_hits = {
        let player = Arc::clone(&hero);
        damage.subscribe(&hero, move |hit: &Damage| {
            println!("  {} takes {} damage", player.name, hit.amount);
        })
    };
    let _ = damage.subscribe(&goblin, |hit: &Damage| {
        println!("  goblin takes {} damage", hit.amount);
    });

    damage.broadcast(&hero, Damage { amount: 10 });
    damage.broadcast(&goblin, Damage { amount: 4 });

    println!("\n=== Late subscriber with history ===");
    damage.subscribe_with(
        &hero,
        |hit: &Damage| println!("  health bar catches up: last hit was {}", hit.amount),
        Registration::Persistent,
        FetchHistory::Yes,
    );

    println!("\n=== Run once ===");
    damage.subscribe_with(
        Context::of(&goblin),
        |hit: &Damage| println!("  first blood on the goblin: {}", hit.amount),
        Registration::RunOnce,
        FetchHistory::No,
    );
    damage.broadcast(&goblin, Damage { amount: 2 });
    damage.broadcast(&goblin, Damage { amount: 1 });

    println!("\n=== Global announcements ===");
    let announcements = get::<Announcement>();
    announcements.broadcast_global("round one".to_owned());
    announcements.subscribe_global_with(
        |text: &String| println!("  joined late, heard: {text}"),
        Registration::RunOnce,
        FetchHistory::Yes,
    );

    println!("\n=== Disposal ===");
    dispose(&hero_hits);
    dispose(&hero_hits);
    damage.broadcast(&hero, Damage { amount: 7 });

    let view = damage.with_context(&hero);
    println!(
        "  hero: {} live registration(s), last hit {:?}",
        view.len(),
        view.history()
    );

    if let Some(receiver) = diagnostics {
        println!("\n=== Diagnostics ===");
        for message in receiver.try_iter() {
            println!("  [{}] {}", message.level, message.message);
        }
    }
}

fn dispose(subscription: &Subscription) {
    match subscription.dispose() {
        Ok(()) => println!("  disposed #{}", subscription.id()),
        Err(err) => println!("  {err}"),
    }
}
