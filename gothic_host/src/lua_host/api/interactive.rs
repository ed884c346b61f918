use std::rc::Rc;

use mlua::{Lua, Result as LuaResult, Table};

use super::{method, Wrapped};
use crate::lua_host::context::HostContext;
use crate::world::{self, EntityRef, TypeTag};

pub(super) fn methods<'lua>(lua: &'lua Lua, ctx: &Rc<HostContext>) -> LuaResult<Table<'lua>> {
    let table = lua.create_table()?;
    let tag = TypeTag::Interactive;

    method(lua, &table, ctx, tag, "name", |ctx, mob, _| {
        world::query(&ctx.world, |sim| sim.interactive_name(mob))
    })?;

    method(lua, &table, ctx, tag, "inventory", |ctx, mob, _| {
        let has_inventory = world::query(&ctx.world, |sim| sim.interactive_has_inventory(mob))?;
        Some(Wrapped(has_inventory.then(|| EntityRef::container(mob))))
    })?;

    method(lua, &table, ctx, tag, "state", |ctx, mob, _| {
        world::query(&ctx.world, |sim| sim.interactive_state(mob)).map(i64::from)
    })?;

    method(lua, &table, ctx, tag, "isLocked", |ctx, mob, _| {
        world::query(&ctx.world, |sim| sim.interactive_is_locked(mob))
    })?;

    method(lua, &table, ctx, tag, "hasInventory", |ctx, mob, _| {
        world::query(&ctx.world, |sim| sim.interactive_has_inventory(mob))
    })?;

    Ok(table)
}
