use std::rc::Rc;

use mlua::{Lua, Result as LuaResult, Table};

use super::{method, Wrapped};
use crate::lua_host::context::HostContext;
use crate::world::{self, EntityRef, TypeTag};

pub(super) fn methods<'lua>(lua: &'lua Lua, ctx: &Rc<HostContext>) -> LuaResult<Table<'lua>> {
    let table = lua.create_table()?;
    let tag = TypeTag::World;

    method(lua, &table, ctx, tag, "name", |ctx, id, _| {
        world::query(&ctx.world, |sim| sim.world_name(id))
    })?;

    method(lua, &table, ctx, tag, "player", |ctx, id, _| {
        let player = world::query(&ctx.world, |sim| sim.world_player(id));
        Some(Wrapped(player.map(EntityRef::actor)))
    })?;

    method(lua, &table, ctx, tag, "findActor", |ctx, id, args| {
        let name = args.text(1)?;
        let actor = world::query(&ctx.world, |sim| sim.find_actor(id, &name));
        Some(Wrapped(actor.map(EntityRef::actor)))
    })?;

    method(lua, &table, ctx, tag, "spawnActor", |ctx, id, args| {
        let instance = args.text(1)?;
        let waypoint = args.text(2)?;
        let actor = world::mutate(&ctx.world, |sim| sim.spawn_actor(id, &instance, &waypoint));
        if actor.is_none() {
            log::warn!("spawnActor({instance}, {waypoint}) produced nothing");
        }
        Some(Wrapped(actor.map(EntityRef::actor)))
    })?;

    method(lua, &table, ctx, tag, "spawnItem", |ctx, id, args| {
        let class_id = args.u32(1)?;
        let waypoint = args.text(2)?;
        let item = world::mutate(&ctx.world, |sim| sim.spawn_item(id, class_id, &waypoint));
        Some(Wrapped(item.map(EntityRef::item)))
    })?;

    method(lua, &table, ctx, tag, "time", |ctx, id, _| {
        world::query(&ctx.world, |sim| sim.world_time(id))
            .map(|(hour, minute)| (i64::from(hour), i64::from(minute)))
    })?;

    Ok(table)
}
