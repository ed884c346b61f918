//! String key/value store scripts use for state that belongs in a save file.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use gothic_store::ScriptData;
use mlua::{Lua, Result as LuaResult, Table, Value};

use super::values::value_to_string;

#[derive(Debug, Default)]
pub struct ScriptStorage {
    data: RefCell<BTreeMap<String, String>>,
}

impl ScriptStorage {
    pub fn get(&self, key: &str) -> Option<String> {
        self.data.borrow().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) {
        self.data
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) -> bool {
        self.data.borrow_mut().remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.borrow().is_empty()
    }

    pub fn snapshot(&self) -> ScriptData {
        ScriptData::from_map(self.data.borrow().clone())
    }

    /// Replaces the whole store with `data`.
    pub fn restore(&self, data: &ScriptData) {
        *self.data.borrow_mut() = data.global_data.clone();
    }
}

pub(crate) fn install(lua: &Lua, gothic: &Table, storage: Rc<ScriptStorage>) -> LuaResult<()> {
    let table = lua.create_table()?;

    let store = storage.clone();
    table.set(
        "get",
        lua.create_function(move |_, key: Value| {
            Ok(value_to_string(&key).and_then(|key| store.get(&key)))
        })?,
    )?;

    let store = storage.clone();
    table.set(
        "set",
        lua.create_function(move |_, (key, value): (Value, Value)| {
            let Some(key) = value_to_string(&key) else {
                return Err(mlua::Error::RuntimeError(
                    "storage keys must be strings".to_string(),
                ));
            };
            match value {
                Value::Nil => {
                    store.remove(&key);
                }
                other => match value_to_string(&other) {
                    Some(text) => store.set(&key, &text),
                    None => {
                        return Err(mlua::Error::RuntimeError(format!(
                            "cannot store a {} under '{key}'",
                            other.type_name()
                        )))
                    }
                },
            }
            Ok(())
        })?,
    )?;

    let store = storage.clone();
    table.set(
        "remove",
        lua.create_function(move |_, key: Value| {
            Ok(value_to_string(&key).is_some_and(|key| store.remove(&key)))
        })?,
    )?;

    let store = storage;
    table.set(
        "keys",
        lua.create_function(move |lua, ()| lua.create_sequence_from(store.keys()))?,
    )?;

    gothic.set("storage", table)?;
    Ok(())
}
