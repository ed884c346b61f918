//! Script-visible wrappers for simulation entities.
//!
//! Every handle is the same userdata type carrying an [`EntityRef`]. Method
//! lookup goes through a per-tag method table kept in the Lua registry, so a
//! handle only ever exposes the methods of its own type.

use mlua::{
    AnyUserData, Lua, MetaMethod, Result as LuaResult, Table, UserData, UserDataMethods, Value,
};

use crate::world::{EntityId, EntityRef, TypeTag};

const TYPES_KEY: &str = "gothic.types";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundHandle(pub EntityRef);

impl UserData for BoundHandle {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: Value| {
            let Some(table) = method_table(lua, this.0.tag)? else {
                return Ok(Value::Nil);
            };
            table.get::<_, Value>(key)
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.0.to_string()));
        methods.add_meta_method(MetaMethod::Eq, |_, this, other: AnyUserData| {
            Ok(other
                .borrow::<BoundHandle>()
                .map(|other| other.0 == this.0)
                .unwrap_or(false))
        });
    }
}

fn types_table(lua: &Lua) -> LuaResult<Table<'_>> {
    match lua.named_registry_value::<Option<Table>>(TYPES_KEY)? {
        Some(table) => Ok(table),
        None => {
            let table = lua.create_table()?;
            lua.set_named_registry_value(TYPES_KEY, table.clone())?;
            Ok(table)
        }
    }
}

fn method_table(lua: &Lua, tag: TypeTag) -> LuaResult<Option<Table<'_>>> {
    types_table(lua)?.get(tag.name())
}

/// Declares the method set of a script-visible type. Registering a type that
/// already exists keeps the first method table and returns `false`.
pub fn register_type<'lua>(lua: &'lua Lua, tag: TypeTag, methods: Table<'lua>) -> LuaResult<bool> {
    let types = types_table(lua)?;
    if types.contains_key(tag.name())? {
        log::debug!("type {tag} already registered");
        return Ok(false);
    }
    types.set(tag.name(), methods)?;
    Ok(true)
}

pub fn is_registered(lua: &Lua, tag: TypeTag) -> bool {
    method_table(lua, tag).ok().flatten().is_some()
}

/// Wraps an entity for scripts; `None` becomes `nil`.
pub fn wrap(lua: &Lua, entity: Option<EntityRef>) -> LuaResult<Value<'_>> {
    let Some(entity) = entity else {
        return Ok(Value::Nil);
    };
    if !is_registered(lua, entity.tag) {
        return Err(mlua::Error::RuntimeError(format!(
            "type {} is not registered",
            entity.tag
        )));
    }
    lua.create_userdata(BoundHandle(entity)).map(Value::UserData)
}

/// Reads the entity behind any bound handle.
pub fn entity_of(value: &Value) -> Option<EntityRef> {
    match value {
        Value::UserData(data) => data.borrow::<BoundHandle>().ok().map(|handle| handle.0),
        _ => None,
    }
}

/// Returns the id behind `value` when it is a handle of type `expected`.
pub fn unwrap(value: &Value, expected: TypeTag) -> Option<EntityId> {
    entity_of(value)
        .filter(|entity| entity.tag == expected)
        .map(|entity| entity.id)
}

#[cfg(test)]
mod tests {
    use super::{entity_of, is_registered, register_type, unwrap, wrap};
    use crate::world::{EntityId, EntityRef, TypeTag};
    use mlua::{Lua, Value};

    #[test]
    fn wrapping_requires_registration() {
        let lua = Lua::new();
        let actor = EntityRef::actor(EntityId::new(3, 1));
        assert!(wrap(&lua, Some(actor)).is_err());
        assert!(matches!(wrap(&lua, None), Ok(Value::Nil)));

        let methods = lua.create_table().expect("table");
        assert!(register_type(&lua, TypeTag::Actor, methods).expect("register"));
        let again = lua.create_table().expect("table");
        assert!(!register_type(&lua, TypeTag::Actor, again).expect("register"));
        assert!(is_registered(&lua, TypeTag::Actor));

        let value = wrap(&lua, Some(actor)).expect("wrap");
        assert_eq!(entity_of(&value), Some(actor));
        assert_eq!(unwrap(&value, TypeTag::Actor), Some(actor.id));
        assert_eq!(unwrap(&value, TypeTag::Item), None);
        assert_eq!(unwrap(&Value::Integer(3), TypeTag::Actor), None);
    }

    #[test]
    fn methods_resolve_through_the_tag_table() {
        let lua = Lua::new();
        let methods = lua.create_table().expect("table");
        methods
            .set(
                "describe",
                lua.create_function(|_, this: Value| Ok(entity_of(&this).map(|e| e.to_string())))
                    .expect("fn"),
            )
            .expect("set");
        register_type(&lua, TypeTag::Item, methods).expect("register");
        let item = wrap(&lua, Some(EntityRef::item(EntityId::new(9, 0)))).expect("wrap");
        lua.globals().set("item", item).expect("global");
        let described: String = lua.load("return item:describe()").eval().expect("eval");
        assert_eq!(described, "Item(9v0)");
        let missing: Value = lua.load("return item.nothing").eval().expect("eval");
        assert!(matches!(missing, Value::Nil));
        let same: bool = lua.load("return item == item").eval().expect("eval");
        assert!(same);
    }
}
