//! Event dispatch bus.
//!
//! Native signals are described by a single table. Binding walks it once,
//! connecting one slot per entry; each slot checks the native arguments,
//! runs the entry's host action, and marshals the arguments into the script
//! argument shape before calling the handlers registered for that event.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};

use mlua::{Function, Lua, MultiValue, RegistryKey, Result as LuaResult, Table, Value, Variadic};

use super::context::HostContext;
use super::handles;
use super::values::is_truthy;
use crate::error::HostError;
use crate::signals::{NativeArg, SignalBoard, Slot};
use crate::world::{self, EntityRef, TypeTag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    /// The handled flag changes what the simulation does next.
    Query,
    /// Fire and forget.
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Entity(TypeTag),
    Int,
    Float,
    Bool,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    /// The native parameter at this position.
    Param(usize),
    /// The inventory owned by the entity parameter at this position.
    InventoryOf(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostAction {
    /// Attach the simulation's current legacy VM to the bridge.
    ReattachVm,
}

#[derive(Debug)]
pub struct EventSpec {
    pub name: &'static str,
    pub kind: DispatchKind,
    pub params: &'static [ParamKind],
    pub shape: &'static [ArgShape],
    pub action: Option<HostAction>,
}

const ACTOR: ParamKind = ParamKind::Entity(TypeTag::Actor);

pub const EVENTS: &[EventSpec] = &[
    EventSpec {
        name: "onOpen",
        kind: DispatchKind::Query,
        params: &[ACTOR, ParamKind::Entity(TypeTag::Interactive)],
        shape: &[
            ArgShape::InventoryOf(0),
            ArgShape::InventoryOf(1),
            ArgShape::Param(0),
            ArgShape::Param(1),
        ],
        action: None,
    },
    EventSpec {
        name: "onRansack",
        kind: DispatchKind::Query,
        params: &[ACTOR, ACTOR],
        shape: &[
            ArgShape::InventoryOf(0),
            ArgShape::InventoryOf(1),
            ArgShape::Param(0),
            ArgShape::Param(1),
        ],
        action: None,
    },
    EventSpec {
        name: "onItemPickup",
        kind: DispatchKind::Query,
        params: &[ACTOR, ParamKind::Entity(TypeTag::Item)],
        shape: &[ArgShape::Param(0), ArgShape::Param(1)],
        action: None,
    },
    EventSpec {
        name: "onDamage",
        kind: DispatchKind::Notify,
        params: &[ACTOR, ACTOR, ParamKind::Int],
        shape: &[ArgShape::Param(0), ArgShape::Param(1), ArgShape::Param(2)],
        action: None,
    },
    EventSpec {
        name: "onNpcKilled",
        kind: DispatchKind::Notify,
        params: &[ACTOR, ACTOR],
        shape: &[ArgShape::Param(0), ArgShape::Param(1)],
        action: None,
    },
    EventSpec {
        name: "onWorldLoaded",
        kind: DispatchKind::Notify,
        params: &[ParamKind::Entity(TypeTag::World)],
        shape: &[ArgShape::Param(0)],
        action: Some(HostAction::ReattachVm),
    },
];

pub fn event_spec(name: &str) -> Option<&'static EventSpec> {
    EVENTS.iter().find(|spec| spec.name == name)
}

/// Script handlers per event name, in registration order.
#[derive(Default)]
pub struct EventBus {
    handlers: RefCell<BTreeMap<String, Vec<RegistryKey>>>,
    in_flight: RefCell<BTreeSet<String>>,
    invocations: Cell<u64>,
    bound: RefCell<Vec<&'static str>>,
}

struct InFlight<'a> {
    bus: &'a EventBus,
    name: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.bus.in_flight.borrow_mut().remove(&self.name);
    }
}

impl EventBus {
    pub fn register(&self, lua: &Lua, name: &str, handler: Function) -> LuaResult<()> {
        let key = lua.create_registry_value(handler)?;
        self.handlers
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .push(key);
        log::debug!("registered handler for {name}");
        Ok(())
    }

    pub fn has_handlers(&self, name: &str) -> bool {
        self.handler_count(name) > 0
    }

    pub fn handler_count(&self, name: &str) -> usize {
        self.handlers.borrow().get(name).map_or(0, Vec::len)
    }

    /// Total handler calls made so far.
    pub fn invocations(&self) -> u64 {
        self.invocations.get()
    }

    /// Drops every registered handler.
    pub fn clear(&self) {
        self.handlers.borrow_mut().clear();
    }

    /// Names of the events currently connected to native signals.
    pub fn bound_events(&self) -> Vec<&'static str> {
        self.bound.borrow().clone()
    }

    /// Calls the handlers of `name` in order until one returns a truthy
    /// value. Handler errors are logged and end the dispatch as unhandled.
    pub fn dispatch<'lua>(&self, lua: &'lua Lua, name: &str, args: Vec<Value<'lua>>) -> bool {
        let handlers: Vec<Function<'lua>> = {
            let map = self.handlers.borrow();
            let Some(keys) = map.get(name) else {
                return false;
            };
            keys.iter()
                .filter_map(|key| lua.registry_value::<Function>(key).ok())
                .collect()
        };
        if handlers.is_empty() {
            return false;
        }
        if !self.in_flight.borrow_mut().insert(name.to_string()) {
            log::warn!("refusing re-entrant dispatch of {name}");
            return false;
        }
        let _guard = InFlight {
            bus: self,
            name: name.to_string(),
        };

        for handler in handlers {
            self.invocations.set(self.invocations.get() + 1);
            match handler.call::<_, Value>(MultiValue::from_vec(args.clone())) {
                Ok(result) if is_truthy(&result) => return true,
                Ok(_) => {}
                Err(err) => {
                    log::error!("event {name} handler failed: {err}");
                    return false;
                }
            }
        }
        false
    }
}

pub(crate) fn install(lua: &Lua, gothic: &Table, ctx: Rc<HostContext>) -> LuaResult<()> {
    let events = lua.create_table()?;

    let register_ctx = ctx.clone();
    events.set(
        "register",
        lua.create_function(move |lua, (name, handler): (String, Value)| {
            let Value::Function(handler) = handler else {
                return Err(mlua::Error::RuntimeError(format!(
                    "events.register('{name}') expects a function, got {}",
                    handler.type_name()
                )));
            };
            register_ctx.bus.register(lua, &name, handler)
        })?,
    )?;

    let emit_ctx = ctx;
    events.set(
        "emit",
        lua.create_function(move |lua, (name, args): (String, Variadic<Value>)| {
            Ok(emit_ctx.bus.dispatch(lua, &name, args.iter().cloned().collect()))
        })?,
    )?;

    gothic.set("events", events)?;
    Ok(())
}

/// Connects every event in [`EVENTS`] to its native signal. On failure the
/// slots connected so far are removed again.
pub(crate) fn bind(
    ctx: &Rc<HostContext>,
    lua: &Rc<Lua>,
    signals: &SignalBoard,
) -> Result<(), HostError> {
    let mut connected: Vec<&'static str> = Vec::with_capacity(EVENTS.len());
    for spec in EVENTS {
        let slot = native_slot(spec, Rc::downgrade(ctx), Rc::downgrade(lua));
        if let Err(source) = signals.connect(spec.name, slot) {
            for name in &connected {
                signals.disconnect(name);
            }
            return Err(HostError::SignalBind {
                event: spec.name.to_string(),
                source,
            });
        }
        connected.push(spec.name);
    }
    *ctx.bus.bound.borrow_mut() = connected;
    Ok(())
}

/// Disconnects whatever [`bind`] connected. Safe to call when nothing is bound.
pub(crate) fn unbind(bus: &EventBus, signals: &SignalBoard) {
    for name in bus.bound.take() {
        signals.disconnect(name);
    }
}

fn native_slot(spec: &'static EventSpec, ctx: Weak<HostContext>, lua: Weak<Lua>) -> Slot {
    Rc::new(move |args: &[NativeArg]| {
        let (Some(ctx), Some(lua)) = (ctx.upgrade(), lua.upgrade()) else {
            return false;
        };
        dispatch_native(&ctx, &lua, spec, args)
    })
}

pub(crate) fn dispatch_native(
    ctx: &HostContext,
    lua: &Lua,
    spec: &EventSpec,
    args: &[NativeArg],
) -> bool {
    if !arguments_match(spec.params, args) {
        log::warn!(
            "{} emitted with {} argument(s) that do not match its signature",
            spec.name,
            args.len()
        );
        return false;
    }

    if let Some(HostAction::ReattachVm) = spec.action {
        match world::query(&ctx.world, |sim| sim.script_vm()) {
            Some(vm) => {
                ctx.bridge.attach(vm);
            }
            None => ctx.bridge.detach(),
        }
    }

    if !ctx.bus.has_handlers(spec.name) {
        return false;
    }

    let values = match marshal(ctx, lua, spec, args) {
        Ok(values) => values,
        Err(err) => {
            log::error!("failed to marshal {} arguments: {err}", spec.name);
            return false;
        }
    };
    ctx.bus.dispatch(lua, spec.name, values)
}

fn arguments_match(params: &[ParamKind], args: &[NativeArg]) -> bool {
    params.len() == args.len()
        && params.iter().zip(args).all(|(param, arg)| {
            matches!(
                (param, arg),
                (ParamKind::Entity(_), NativeArg::Entity(_))
                    | (ParamKind::Int, NativeArg::Int(_))
                    | (ParamKind::Float, NativeArg::Float(_))
                    | (ParamKind::Bool, NativeArg::Bool(_))
                    | (ParamKind::Text, NativeArg::Text(_))
            )
        })
}

fn marshal<'lua>(
    ctx: &HostContext,
    lua: &'lua Lua,
    spec: &EventSpec,
    args: &[NativeArg],
) -> LuaResult<Vec<Value<'lua>>> {
    spec.shape
        .iter()
        .map(|shape| match *shape {
            ArgShape::Param(index) => match (spec.params.get(index), args.get(index)) {
                (Some(kind), Some(arg)) => native_to_lua(lua, *kind, arg),
                _ => Ok(Value::Nil),
            },
            ArgShape::InventoryOf(index) => {
                let container = match args.get(index) {
                    Some(NativeArg::Entity(Some(owner))) => {
                        world::query(&ctx.world, |sim| sim.inventory_owner(*owner))
                            .map(|_| EntityRef::container(*owner))
                    }
                    _ => None,
                };
                handles::wrap(lua, container)
            }
        })
        .collect()
}

fn native_to_lua<'lua>(lua: &'lua Lua, kind: ParamKind, arg: &NativeArg) -> LuaResult<Value<'lua>> {
    match (kind, arg) {
        (ParamKind::Entity(tag), NativeArg::Entity(id)) => {
            handles::wrap(lua, id.map(|id| EntityRef::new(tag, id)))
        }
        (_, NativeArg::Int(value)) => Ok(Value::Integer(*value as mlua::Integer)),
        (_, NativeArg::Float(value)) => Ok(Value::Number(*value)),
        (_, NativeArg::Bool(value)) => Ok(Value::Boolean(*value)),
        (_, NativeArg::Text(text)) => lua.create_string(text).map(Value::String),
        (_, NativeArg::Entity(_)) => Ok(Value::Nil),
    }
}
