use mlua::{ChunkMode, Lua, Result as LuaResult, Table, Value};

/// Globals and library fields removed before any script runs.
pub(crate) const REMOVED: &[&str] = &[
    "dofile",
    "loadfile",
    "require",
    "package",
    "io",
    "os.execute",
    "os.exit",
    "os.remove",
    "os.rename",
    "os.tmpname",
];

pub(crate) fn apply(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    for path in REMOVED {
        match path.split_once('.') {
            None => globals.set(*path, Value::Nil)?,
            Some((library, field)) => {
                if let Some(table) = globals.get::<_, Option<Table>>(library)? {
                    table.set(field, Value::Nil)?;
                }
            }
        }
    }
    let loader = lua.create_function(load_text)?;
    globals.set("loadstring", loader.clone())?;
    globals.set("load", loader)?;
    Ok(())
}

/// `load`/`loadstring` restricted to source text. The chunk is either a
/// string or a reader function returning pieces until nil or "".
fn load_text<'lua>(
    lua: &'lua Lua,
    (chunk, name): (Value<'lua>, Option<String>),
) -> LuaResult<(Value<'lua>, Value<'lua>)> {
    let source = match chunk {
        Value::String(text) => text.as_bytes().to_vec(),
        Value::Function(reader) => {
            let mut source = Vec::new();
            while let Some(piece) = reader.call::<_, Option<mlua::String>>(())? {
                if piece.as_bytes().is_empty() {
                    break;
                }
                source.extend_from_slice(piece.as_bytes());
            }
            source
        }
        other => {
            return Err(mlua::Error::RuntimeError(format!(
                "bad argument #1 to 'load' (string expected, got {})",
                other.type_name()
            )))
        }
    };
    let name = name.unwrap_or_else(|| "=(load)".to_string());
    match lua
        .load(source)
        .set_name(name)
        .set_mode(ChunkMode::Text)
        .into_function()
    {
        Ok(function) => Ok((Value::Function(function), Value::Nil)),
        Err(err) => Ok((Value::Nil, Value::String(lua.create_string(err.to_string())?))),
    }
}
