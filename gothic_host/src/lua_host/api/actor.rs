use std::rc::Rc;

use mlua::{IntoLua, Lua, Result as LuaResult, Table, Value};

use super::{method, Wrapped};
use crate::lua_host::context::HostContext;
use crate::world::{self, Attribute, EntityRef, TypeTag};

/// `{ x, y, z }`.
pub(crate) struct Position([f32; 3]);

impl<'lua> IntoLua<'lua> for Position {
    fn into_lua(self, lua: &'lua Lua) -> LuaResult<Value<'lua>> {
        let [x, y, z] = self.0;
        let table = lua.create_table()?;
        table.set("x", x)?;
        table.set("y", y)?;
        table.set("z", z)?;
        Ok(Value::Table(table))
    }
}

pub(super) fn methods<'lua>(lua: &'lua Lua, ctx: &Rc<HostContext>) -> LuaResult<Table<'lua>> {
    let table = lua.create_table()?;
    let tag = TypeTag::Actor;

    method(lua, &table, ctx, tag, "name", |ctx, actor, _| {
        world::query(&ctx.world, |sim| sim.actor_name(actor))
    })?;

    method(lua, &table, ctx, tag, "attribute", |ctx, actor, args| {
        let attribute = Attribute::from_name(&args.text(1)?)?;
        world::query(&ctx.world, |sim| sim.actor_attribute(actor, attribute)).map(i64::from)
    })?;

    method(lua, &table, ctx, tag, "setAttribute", |ctx, actor, args| {
        let attribute = Attribute::from_name(&args.text(1)?)?;
        let value = i32::try_from(args.int(2)?).ok()?;
        world::mutate(&ctx.world, |sim| {
            Some(sim.set_actor_attribute(actor, attribute, value))
        })
    })?;

    method(lua, &table, ctx, tag, "isDead", |ctx, actor, _| {
        world::query(&ctx.world, |sim| sim.actor_is_dead(actor))
    })?;

    method(lua, &table, ctx, tag, "position", |ctx, actor, _| {
        world::query(&ctx.world, |sim| sim.actor_position(actor)).map(|p| Some(Position(p)))
    })?;

    method(lua, &table, ctx, tag, "inventory", |ctx, actor, _| {
        world::query(&ctx.world, |sim| sim.inventory_owner(actor))
            .map(|_| Wrapped(Some(EntityRef::container(actor))))
    })?;

    method(lua, &table, ctx, tag, "giveItem", |ctx, actor, args| {
        let class_id = args.u32(1)?;
        let count = if args.is_nil(2) { 1 } else { args.u32(2)? };
        world::mutate(&ctx.world, |sim| Some(sim.give_item(actor, class_id, count)))
    })?;

    Ok(table)
}
