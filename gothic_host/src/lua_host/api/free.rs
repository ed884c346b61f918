use std::rc::Rc;

use mlua::{Lua, Result as LuaResult, Table, Value, Variadic};

use super::{Args, Wrapped};
use crate::lua_host::context::HostContext;
use crate::lua_host::handles;
use crate::lua_host::values::stringify;
use crate::world::{self, EntityRef, TypeTag};

fn display(value: &Value) -> String {
    match handles::entity_of(value) {
        Some(entity) => entity.to_string(),
        None => stringify(value),
    }
}

pub(super) fn install(lua: &Lua, gothic: &Table, ctx: &Rc<HostContext>) -> LuaResult<()> {
    let globals = lua.globals();

    let state = ctx.clone();
    globals.set(
        "print",
        lua.create_function(move |_, args: Variadic<Value>| {
            let line = args.iter().map(display).collect::<Vec<_>>().join("\t");
            state.print(&line);
            Ok(())
        })?,
    )?;

    gothic.set(
        "log",
        lua.create_function(|_, args: Args| {
            let message = args.text(0).unwrap_or_default();
            match args.text(1).as_deref() {
                Some("error") => log::error!("[lua] {message}"),
                Some("warn") => log::warn!("[lua] {message}"),
                Some("debug") => log::debug!("[lua] {message}"),
                _ => log::info!("[lua] {message}"),
            }
            Ok(())
        })?,
    )?;

    let state = ctx.clone();
    gothic.set(
        "printMessage",
        lua.create_function(move |_, args: Args| {
            let Some(message) = args.text(0) else {
                return Ok(false);
            };
            Ok(world::mutate(&state.world, |sim| {
                sim.print_message(&message);
                Some(())
            })
            .is_some())
        })?,
    )?;

    let state = ctx.clone();
    gothic.set(
        "world",
        lua.create_function(move |_, ()| {
            let current = world::query(&state.world, |sim| sim.current_world());
            Ok(Wrapped(current.map(EntityRef::world)))
        })?,
    )?;

    let state = ctx.clone();
    gothic.set(
        "isValid",
        lua.create_function(move |_, args: Args| {
            let Some(entity) = args.any_entity(0) else {
                return Ok(false);
            };
            Ok(world::query(&state.world, |sim| Some(sim.is_alive(entity))).unwrap_or(false))
        })?,
    )?;

    let damage = lua.create_table()?;
    let state = ctx.clone();
    damage.set(
        "estimate",
        lua.create_function(move |_, args: Args| {
            let (Some(attacker), Some(victim)) = (
                args.entity(0, TypeTag::Actor),
                args.entity(1, TypeTag::Actor),
            ) else {
                return Ok(0);
            };
            Ok(world::query(&state.world, |sim| sim.damage_estimate(attacker, victim))
                .map_or(0, i64::from))
        })?,
    )?;
    gothic.set("damage", damage)?;

    Ok(())
}
