//! Native functions exposed to scripts.
//!
//! Every entry point converts its Lua arguments once into [`Args`], checks
//! the receiver's type tag, and falls back to the return type's default when
//! anything does not resolve.

mod actor;
mod container;
mod free;
mod interactive;
mod item;
mod world;

use std::rc::Rc;

use mlua::{
    FromLuaMulti, IntoLua, IntoLuaMulti, Lua, MultiValue, Result as LuaResult, Table, Value,
};

use super::context::HostContext;
use super::handles;
use super::values::{format_number, value_to_i64};
use crate::world::{EntityId, EntityRef, TypeTag};

pub(crate) fn install(lua: &Lua, gothic: &Table, ctx: &Rc<HostContext>) -> LuaResult<()> {
    handles::register_type(lua, TypeTag::Container, container::methods(lua, ctx)?)?;
    handles::register_type(lua, TypeTag::Actor, actor::methods(lua, ctx)?)?;
    handles::register_type(lua, TypeTag::Item, item::methods(lua, ctx)?)?;
    handles::register_type(lua, TypeTag::World, world::methods(lua, ctx)?)?;
    handles::register_type(lua, TypeTag::Interactive, interactive::methods(lua, ctx)?)?;
    free::install(lua, gothic, ctx)
}

/// One script argument, converted out of the Lua state.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Arg {
    Nil,
    Bool(bool),
    Int(i64),
    Number(f64),
    Text(String),
    Entity(EntityRef),
    Other(&'static str),
}

impl Arg {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Nil => Arg::Nil,
            Value::Boolean(flag) => Arg::Bool(*flag),
            Value::Integer(_) | Value::Number(_) => match value_to_i64(value) {
                Some(i) => Arg::Int(i),
                None => match value {
                    Value::Number(n) => Arg::Number(*n),
                    _ => Arg::Nil,
                },
            },
            Value::String(text) => Arg::Text(text.to_string_lossy().into_owned()),
            Value::UserData(_) => match handles::entity_of(value) {
                Some(entity) => Arg::Entity(entity),
                None => Arg::Other("userdata"),
            },
            other => Arg::Other(other.type_name()),
        }
    }
}

const NIL: Arg = Arg::Nil;

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Args(Vec<Arg>);

impl<'lua> FromLuaMulti<'lua> for Args {
    fn from_lua_multi(values: MultiValue<'lua>, _lua: &'lua Lua) -> LuaResult<Self> {
        Ok(Args(values.iter().map(Arg::from_value).collect()))
    }
}

impl Args {
    pub(crate) fn get(&self, index: usize) -> &Arg {
        self.0.get(index).unwrap_or(&NIL)
    }

    /// The entity at `index` when it is a handle of type `tag`.
    pub(crate) fn entity(&self, index: usize, tag: TypeTag) -> Option<EntityId> {
        self.any_entity(index)
            .filter(|entity| entity.tag == tag)
            .map(|entity| entity.id)
    }

    pub(crate) fn any_entity(&self, index: usize) -> Option<EntityRef> {
        match self.get(index) {
            Arg::Entity(entity) => Some(*entity),
            _ => None,
        }
    }

    /// Strings, with numbers converted the way Lua converts them.
    pub(crate) fn text(&self, index: usize) -> Option<String> {
        match self.get(index) {
            Arg::Text(text) => Some(text.clone()),
            Arg::Int(i) => Some(i.to_string()),
            Arg::Number(n) => Some(format_number(*n)),
            _ => None,
        }
    }

    pub(crate) fn int(&self, index: usize) -> Option<i64> {
        match self.get(index) {
            Arg::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub(crate) fn u32(&self, index: usize) -> Option<u32> {
        self.int(index).and_then(|i| u32::try_from(i).ok())
    }

    pub(crate) fn is_nil(&self, index: usize) -> bool {
        matches!(self.get(index), Arg::Nil)
    }
}

/// A possibly missing entity on its way to a script; `None` becomes `nil`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Wrapped(pub Option<EntityRef>);

impl<'lua> IntoLua<'lua> for Wrapped {
    fn into_lua(self, lua: &'lua Lua) -> LuaResult<Value<'lua>> {
        handles::wrap(lua, self.0)
    }
}

/// Installs `name` as a method of a bound type. The first script argument is
/// the receiver; when it is not a live handle of `tag`, or `body` yields
/// nothing, the script gets `R::default()`.
pub(crate) fn method<R, F>(
    lua: &Lua,
    table: &Table,
    ctx: &Rc<HostContext>,
    tag: TypeTag,
    name: &str,
    body: F,
) -> LuaResult<()>
where
    R: for<'lua> IntoLuaMulti<'lua> + Default + 'static,
    F: Fn(&HostContext, EntityId, &Args) -> Option<R> + 'static,
{
    let ctx = ctx.clone();
    let function = lua.create_function(move |_, args: Args| {
        let result = args.entity(0, tag).and_then(|id| body(&ctx, id, &args));
        Ok(result.unwrap_or_default())
    })?;
    table.set(name, function)
}
