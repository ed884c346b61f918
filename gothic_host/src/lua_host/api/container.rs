use std::rc::Rc;

use mlua::{IntoLua, Lua, Result as LuaResult, Table, Value};

use super::{method, Wrapped};
use crate::lua_host::context::HostContext;
use crate::world::{self, EntityId, InventoryEntry, TypeTag};

/// Inventory row as scripts see it: `{ id, name, count, equipped }`.
pub(crate) struct ItemRow(InventoryEntry);

impl<'lua> IntoLua<'lua> for ItemRow {
    fn into_lua(self, lua: &'lua Lua) -> LuaResult<Value<'lua>> {
        let table = lua.create_table()?;
        table.set("id", self.0.class_id)?;
        table.set("name", self.0.name)?;
        table.set("count", self.0.count)?;
        table.set("equipped", self.0.equipped)?;
        Ok(Value::Table(table))
    }
}

/// One stack moved by `transferAllTo`: `{ name, count }`.
pub(crate) struct MovedRow {
    name: String,
    count: u32,
}

impl<'lua> IntoLua<'lua> for MovedRow {
    fn into_lua(self, lua: &'lua Lua) -> LuaResult<Value<'lua>> {
        let table = lua.create_table()?;
        table.set("name", self.name)?;
        table.set("count", self.count)?;
        Ok(Value::Table(table))
    }
}

/// Moves every non-equipped stack from one inventory to another. The source
/// is listed once before anything moves.
pub(crate) fn transfer_all(ctx: &HostContext, from: EntityId, to: EntityId) -> Vec<MovedRow> {
    if from == to {
        return Vec::new();
    }
    let Some(snapshot) = world::query(&ctx.world, |sim| {
        sim.inventory_owner(to)?;
        sim.inventory_entries(from)
    }) else {
        return Vec::new();
    };
    let mut moved = Vec::new();
    for entry in snapshot.into_iter().filter(|entry| !entry.equipped) {
        let count = world::mutate(&ctx.world, |sim| {
            Some(sim.transfer_items(from, to, entry.class_id, entry.count))
        })
        .unwrap_or(0);
        if count > 0 {
            moved.push(MovedRow {
                name: entry.name,
                count,
            });
        }
    }
    moved
}

pub(super) fn methods<'lua>(lua: &'lua Lua, ctx: &Rc<HostContext>) -> LuaResult<Table<'lua>> {
    let table = lua.create_table()?;
    let tag = TypeTag::Container;

    method(lua, &table, ctx, tag, "items", |ctx, owner, _| {
        let entries = world::query(&ctx.world, |sim| sim.inventory_entries(owner))?;
        Some(entries.into_iter().map(ItemRow).collect::<Vec<_>>())
    })?;

    method(lua, &table, ctx, tag, "count", |ctx, owner, args| {
        let class_id = args.u32(1)?;
        let entries = world::query(&ctx.world, |sim| sim.inventory_entries(owner))?;
        Some(
            entries
                .iter()
                .filter(|entry| entry.class_id == class_id)
                .map(|entry| i64::from(entry.count))
                .sum::<i64>(),
        )
    })?;

    method(lua, &table, ctx, tag, "hasItems", |ctx, owner, _| {
        let entries = world::query(&ctx.world, |sim| sim.inventory_entries(owner))?;
        Some(entries.iter().any(|entry| entry.count > 0 && !entry.equipped))
    })?;

    method(lua, &table, ctx, tag, "transferAllTo", |ctx, owner, args| {
        let target = args.entity(1, TypeTag::Container)?;
        Some(transfer_all(ctx, owner, target))
    })?;

    method(lua, &table, ctx, tag, "owner", |ctx, owner, _| {
        Some(Wrapped(world::query(&ctx.world, |sim| sim.inventory_owner(owner))))
    })?;

    Ok(table)
}
