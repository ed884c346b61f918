use mlua::{Lua, Result as LuaResult, Table};

pub(crate) const BOOTSTRAP_NAME: &str = "=bootstrap";
const BOOTSTRAP_SOURCE: &str = include_str!("bootstrap.lua");

pub(crate) const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Creates the `gothic` global with its `core` table.
pub(crate) fn create_namespace(lua: &Lua) -> LuaResult<Table<'_>> {
    let gothic = lua.create_table()?;
    let core = lua.create_table()?;
    core.set("VERSION", VERSION)?;
    gothic.set("core", core)?;
    lua.globals().set("gothic", gothic.clone())?;
    Ok(gothic)
}

/// Runs the embedded helpers. Expects the host API to be installed.
pub(crate) fn load(lua: &Lua) -> LuaResult<()> {
    lua.load(BOOTSTRAP_SOURCE).set_name(BOOTSTRAP_NAME).exec()
}
