use std::rc::Rc;

use mlua::{Lua, Result as LuaResult, Table};

use super::method;
use crate::lua_host::context::HostContext;
use crate::world::{self, EntityId, ItemInfo, TypeTag};

fn info(ctx: &HostContext, item: EntityId) -> Option<ItemInfo> {
    world::query(&ctx.world, |sim| sim.item_info(item))
}

pub(super) fn methods<'lua>(lua: &'lua Lua, ctx: &Rc<HostContext>) -> LuaResult<Table<'lua>> {
    let table = lua.create_table()?;
    let tag = TypeTag::Item;

    method(lua, &table, ctx, tag, "name", |ctx, item, _| {
        info(ctx, item).map(|info| info.name)
    })?;
    method(lua, &table, ctx, tag, "classId", |ctx, item, _| {
        info(ctx, item).map(|info| i64::from(info.class_id))
    })?;
    method(lua, &table, ctx, tag, "count", |ctx, item, _| {
        info(ctx, item).map(|info| i64::from(info.count))
    })?;
    method(lua, &table, ctx, tag, "isEquipped", |ctx, item, _| {
        info(ctx, item).map(|info| info.equipped)
    })?;
    method(lua, &table, ctx, tag, "value", |ctx, item, _| {
        info(ctx, item).map(|info| i64::from(info.value))
    })?;

    Ok(table)
}
