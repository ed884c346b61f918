mod common;

use std::rc::Rc;

use common::{Fixture, GOLD};
use gothic_host::lua_host::{event_spec, DispatchKind, EVENTS};
use gothic_host::world::Simulation;
use gothic_host::{NativeArg, SignalBoard};

fn invocations(fixture: &Fixture) -> u64 {
    fixture.engine.events().map_or(0, |bus| bus.invocations())
}

#[test]
fn every_native_signal_is_bound_after_initialise() {
    let fixture = Fixture::started();
    for spec in EVENTS {
        assert!(fixture.signals.is_connected(spec.name), "{} unbound", spec.name);
    }
    let bound = fixture.engine.events().map(|bus| bus.bound_events()).unwrap_or_default();
    assert_eq!(bound.len(), EVENTS.len());
    assert_eq!(event_spec("onDamage").map(|spec| spec.kind), Some(DispatchKind::Notify));
    assert_eq!(event_spec("onOpen").map(|spec| spec.kind), Some(DispatchKind::Query));
    assert!(event_spec("onSleep").is_none());
}

#[test]
fn events_without_handlers_report_unhandled_without_calls() {
    let fixture = Fixture::started();
    let args = [fixture.actor(fixture.hero), fixture.actor(fixture.chest)];
    assert!(!fixture.signals.emit("onOpen", &args));
    assert!(!fixture.engine.dispatch("onOpen", &args));
    assert_eq!(invocations(&fixture), 0);
}

#[test]
fn first_truthy_handler_ends_dispatch() {
    let fixture = Fixture::started();
    fixture.run(
        "calls = {}
         gothic.events.register('onOpen', function() calls[#calls + 1] = 'first' return nil end)
         gothic.events.register('onOpen', function() calls[#calls + 1] = 'second' return 1 end)
         gothic.events.register('onOpen', function() calls[#calls + 1] = 'third' return true end)",
    );
    let handled = fixture
        .signals
        .emit("onOpen", &[fixture.actor(fixture.hero), fixture.actor(fixture.chest)]);
    assert!(handled);
    assert_eq!(fixture.run("return table.concat(calls, ',')"), "first,second");
    assert_eq!(invocations(&fixture), 2);
}

#[test]
fn failing_handler_ends_dispatch_unhandled() {
    let fixture = Fixture::started();
    fixture.run(
        "reached = false
         gothic.events.register('onNpcKilled', function() error('handler broke') end)
         gothic.events.register('onNpcKilled', function() reached = true return true end)",
    );
    let handled = fixture.signals.emit(
        "onNpcKilled",
        &[fixture.actor(fixture.bandit), fixture.actor(fixture.hero)],
    );
    assert!(!handled);
    assert_eq!(fixture.run("return reached"), "false");
}

#[test]
fn open_passes_inventories_before_the_objects() {
    let fixture = Fixture::started();
    fixture.run(
        "gothic.events.register('onOpen', function(playerInv, chestInv, player, chest)
             opened = { playerInv:owner() == player, chestInv:owner() == chest, chest:name() }
             return gothic.inventory.takeAll(chestInv, playerInv)[1] ~= nil
         end)",
    );
    let handled = fixture
        .signals
        .emit("onOpen", &[fixture.actor(fixture.hero), fixture.actor(fixture.chest)]);
    assert!(handled);
    assert_eq!(
        fixture.run("return unpack(opened)"),
        "true, true, CHESTSMALL_OCCRATESMALL"
    );
    let world = fixture.world.borrow();
    assert_eq!(world.inventory_entries(fixture.chest), Some(Vec::new()));
    let hero_gold: u32 = world
        .inventory_entries(fixture.hero)
        .unwrap_or_default()
        .iter()
        .filter(|entry| entry.class_id == GOLD)
        .map(|entry| entry.count)
        .sum();
    assert_eq!(hero_gold, 50);
    assert_eq!(world.messages(), ["50x ItMi_Gold".to_string()]);
}

#[test]
fn notify_events_carry_plain_values() {
    let fixture = Fixture::started();
    fixture.run(
        "gothic.events.register('onDamage', function(attacker, victim, amount)
             hit = attacker:name() .. '>' .. victim:name() .. ':' .. amount
         end)",
    );
    let handled = fixture.signals.emit(
        "onDamage",
        &[
            fixture.actor(fixture.bandit),
            fixture.actor(fixture.hero),
            NativeArg::Int(12),
        ],
    );
    assert!(!handled);
    assert_eq!(fixture.run("return hit"), "Bandit>Hero:12");
}

#[test]
fn mismatched_arguments_are_dropped() {
    let fixture = Fixture::started();
    fixture.run("gothic.events.register('onDamage', function() return true end)");
    let hero = fixture.actor(fixture.hero);
    assert!(!fixture.signals.emit("onDamage", &[hero.clone(), hero.clone()]));
    assert!(!fixture
        .signals
        .emit("onDamage", &[hero.clone(), hero.clone(), NativeArg::Text("12".into())]));
    assert_eq!(invocations(&fixture), 0);
    assert!(fixture
        .signals
        .emit("onDamage", &[hero.clone(), hero, NativeArg::Int(1)]));
}

#[test]
fn missing_entities_arrive_as_nil() {
    let fixture = Fixture::started();
    fixture.run(
        "gothic.events.register('onItemPickup', function(actor, item)
             picked = { actor == nil, item == nil }
         end)",
    );
    fixture.signals.emit(
        "onItemPickup",
        &[fixture.actor(fixture.hero), NativeArg::Entity(None)],
    );
    assert_eq!(fixture.run("return unpack(picked)"), "false, true");
}

#[test]
fn handlers_cannot_reenter_their_own_event() {
    let fixture = Fixture::started();
    fixture.run(
        "gothic.events.register('onDamage', function(attacker, victim, amount)
             nested = gothic.events.emit('onDamage', attacker, victim, amount)
             return true
         end)",
    );
    let handled = fixture.signals.emit(
        "onDamage",
        &[
            fixture.actor(fixture.hero),
            fixture.actor(fixture.bandit),
            NativeArg::Int(3),
        ],
    );
    assert!(handled);
    assert_eq!(fixture.run("return nested"), "false");
    assert_eq!(invocations(&fixture), 1);

    // The guard is released once the outer dispatch returns.
    assert_eq!(fixture.run("return gothic.events.emit('onDamage')"), "true");
}

#[test]
fn script_emit_reaches_custom_events() {
    let fixture = Fixture::started();
    fixture.run(
        "gothic.events.register('questDone', function(name, reward) return name == 'rats' and reward > 5 end)",
    );
    assert_eq!(fixture.run("return gothic.events.emit('questDone', 'rats', 10)"), "true");
    assert_eq!(fixture.run("return gothic.events.emit('questDone', 'rats', 1)"), "false");
    assert!(!fixture.engine.dispatch("questDone", &[]));
}

#[test]
fn once_handlers_run_a_single_time() {
    let fixture = Fixture::started();
    fixture.run(
        "fired = 0
         gothic.events.once('onNpcKilled', function() fired = fired + 1 end)",
    );
    let args = [fixture.actor(fixture.bandit), fixture.actor(fixture.hero)];
    fixture.signals.emit("onNpcKilled", &args);
    fixture.signals.emit("onNpcKilled", &args);
    assert_eq!(fixture.run("return fired"), "1");
}

#[test]
fn binding_is_all_or_nothing() {
    let signals = SignalBoard::gameplay();
    signals
        .connect("onNpcKilled", Rc::new(|_: &[NativeArg]| true))
        .expect("pre-connect");
    let mut fixture = Fixture::with_signals(signals);
    assert!(fixture.engine.initialize(), "bind failure is not fatal");

    for spec in EVENTS {
        if spec.name == "onNpcKilled" {
            continue;
        }
        assert!(!fixture.signals.is_connected(spec.name), "{} left bound", spec.name);
    }
    assert!(fixture
        .engine
        .events()
        .is_some_and(|bus| bus.bound_events().is_empty()));
    // The foreign slot is untouched.
    assert!(fixture.signals.emit("onNpcKilled", &[]));

    fixture.engine.shutdown();
    assert!(fixture.signals.is_connected("onNpcKilled"));
}

#[test]
fn shutdown_disconnects_every_slot() {
    let mut fixture = Fixture::started();
    fixture.run("gothic.events.register('onOpen', function() return true end)");
    fixture.engine.shutdown();
    for spec in EVENTS {
        assert!(!fixture.signals.is_connected(spec.name));
    }
    assert!(!fixture
        .signals
        .emit("onOpen", &[fixture.actor(fixture.hero), fixture.actor(fixture.chest)]));

    assert!(fixture.engine.initialize());
    assert!(fixture.signals.is_connected("onOpen"));
    assert_eq!(
        fixture.engine.events().map(|bus| bus.handler_count("onOpen")),
        Some(0)
    );
}
