mod api;
mod bootstrap;
mod bridge;
mod context;
mod events;
mod handles;
mod persistence;
mod sandbox;
mod values;

pub use bridge::{CallContext, LegacyBridge};
pub use events::{
    event_spec, ArgShape, DispatchKind, EventBus, EventSpec, HostAction, ParamKind, EVENTS,
};
pub use handles::BoundHandle;
pub use persistence::ScriptStorage;

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use gothic_store::ScriptData;
use mlua::{ChunkMode, Function, Lua, LuaOptions, MultiValue, RegistryKey, StdLib, Table, Value};
use walkdir::WalkDir;

use self::context::HostContext;
use self::values::stringify;
use crate::config::HostConfig;
use crate::error::HostError;
use crate::signals::{NativeArg, SignalBoard};
use crate::world::{self, SharedWorld};

const NOT_INITIALIZED: &str = "Error: ScriptEngine not initialized";

/// A script file that loaded successfully.
pub struct ScriptRecord {
    pub path: PathBuf,
    pub source: String,
    pub bytecode: Vec<u8>,
    module: Option<RegistryKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl LoadSummary {
    fn record(&mut self, path: PathBuf, result: Result<(), HostError>) {
        match result {
            Ok(()) => self.loaded.push(path),
            Err(err) => {
                log::error!("{err}");
                self.failed.push((path, err.to_string()));
            }
        }
    }

    fn extend(&mut self, other: LoadSummary) {
        self.loaded.extend(other.loaded);
        self.failed.extend(other.failed);
    }
}

/// Owns the Lua state and everything wired into it.
pub struct ScriptEngine {
    config: HostConfig,
    world: SharedWorld,
    signals: Rc<SignalBoard>,
    storage: Rc<ScriptStorage>,
    lua: Option<Rc<Lua>>,
    ctx: Option<Rc<HostContext>>,
    jit_enabled: bool,
    scripts: Vec<ScriptRecord>,
}

impl ScriptEngine {
    pub fn new(config: HostConfig, world: SharedWorld, signals: Rc<SignalBoard>) -> Self {
        Self {
            config,
            world,
            signals,
            storage: Rc::new(ScriptStorage::default()),
            lua: None,
            ctx: None,
            jit_enabled: false,
            scripts: Vec::new(),
        }
    }

    /// Creates the sandboxed state, installs the script API and connects the
    /// native signals. Returns `false` and stays disabled if the state cannot
    /// be set up.
    pub fn initialize(&mut self) -> bool {
        if self.lua.is_some() {
            return true;
        }
        let lua = match Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default()) {
            Ok(lua) => Rc::new(lua),
            Err(err) => {
                log::error!("failed to create Lua state: {err}");
                return false;
            }
        };
        let ctx = Rc::new(HostContext::new(self.world.clone(), self.storage.clone()));
        ctx.bridge.set_lua(&lua);

        if let Err(err) = install_host(&lua, &ctx) {
            log::error!("failed to install script API: {err}");
            return false;
        }

        self.jit_enabled = self.config.enable_jit && enable_jit(&lua);

        if let Err(err) = events::bind(&ctx, &lua, &self.signals) {
            log::error!("{err}; native events stay disconnected");
        }

        if let Some(vm) = world::query(&self.world, |sim| sim.script_vm()) {
            ctx.bridge.attach(vm);
        }

        self.lua = Some(lua);
        self.ctx = Some(ctx);
        log::info!(
            "script engine initialized (jit {})",
            if self.jit_enabled { "on" } else { "off" }
        );
        true
    }

    pub fn shutdown(&mut self) {
        let Some(lua) = self.lua.take() else {
            return;
        };
        if let Some(ctx) = self.ctx.take() {
            events::unbind(&ctx.bus, &self.signals);
            ctx.bus.clear();
            ctx.bridge.detach();
            ctx.bridge.clear_externals();
        }
        self.scripts.clear();
        self.jit_enabled = false;
        drop(lua);
        log::info!("script engine shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.lua.is_some()
    }

    pub fn jit_enabled(&self) -> bool {
        self.jit_enabled
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Compiles `source` to a bytecode dump with debug info. Any failure
    /// yields an empty vector.
    pub fn compile(&self, source: &str) -> Vec<u8> {
        let Some(lua) = &self.lua else {
            return Vec::new();
        };
        match lua
            .load(source)
            .set_name("=compile")
            .set_mode(ChunkMode::Text)
            .into_function()
        {
            Ok(function) => function.dump(false),
            Err(err) => {
                log::warn!("compile failed: {}", error_message(&err));
                Vec::new()
            }
        }
    }

    /// Loads and runs one script file, then calls its
    /// `engineHandlers.onInit` if the returned module has one.
    pub fn load_script(&mut self, path: &Path) -> Result<(), HostError> {
        let lua = self.lua.clone().ok_or(HostError::NotInitialized)?;
        let source = fs::read_to_string(path).map_err(|source| HostError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path.display().to_string();

        let function = lua
            .load(source.as_str())
            .set_name(format!("@{name}"))
            .set_mode(ChunkMode::Text)
            .into_function()
            .map_err(|err| HostError::Compile {
                name: name.clone(),
                message: error_message(&err),
            })?;
        let bytecode = function.dump(false);

        let runtime = |err: mlua::Error| HostError::Runtime {
            name: name.clone(),
            message: error_message(&err),
        };
        let module: Value = function.call(()).map_err(runtime)?;
        let module = match module {
            Value::Table(table) => Some(table),
            _ => None,
        };
        let key = module
            .as_ref()
            .map(|table| lua.create_registry_value(table.clone()))
            .transpose()
            .map_err(runtime)?;

        self.scripts.push(ScriptRecord {
            path: path.to_path_buf(),
            source,
            bytecode,
            module: key,
        });

        if let Some(on_init) = module.as_ref().and_then(|table| engine_handler(table, "onInit")) {
            if let Err(err) = on_init.call::<_, ()>(()) {
                log::error!("{name}: onInit failed: {}", error_message(&err));
            }
        }
        log::info!("loaded {name}");
        Ok(())
    }

    /// Loads every `<type>:<path>` entry of a manifest. Paths are used as
    /// written, so relative ones resolve against the working directory. One
    /// failing script does not stop the others.
    pub fn load_scripts_from_manifest(&mut self, manifest: &Path) -> Result<LoadSummary, HostError> {
        if self.lua.is_none() {
            return Err(HostError::NotInitialized);
        }
        let text = fs::read_to_string(manifest).map_err(|source| HostError::Manifest {
            path: manifest.to_path_buf(),
            source,
        })?;
        let mut summary = LoadSummary::default();
        for entry in parse_manifest(&text) {
            let path = PathBuf::from(entry);
            let result = self.load_script(&path);
            summary.record(path, result);
        }
        log::info!(
            "loaded {} script(s) from manifest {} ({} failed)",
            summary.loaded.len(),
            manifest.display(),
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Loads every `.lua` file below the configured scripts directory in
    /// path order.
    pub fn load_mod_scripts(&mut self) -> LoadSummary {
        let mut summary = LoadSummary::default();
        if self.lua.is_none() {
            log::error!("{}", HostError::NotInitialized);
            return summary;
        }
        let dir = self.config.scripts_dir.clone();
        if !dir.is_dir() {
            log::info!("no scripts directory at {}", dir.display());
            return summary;
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(&dir)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    log::warn!("skipping unreadable entry: {err}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("lua"))
            .collect();
        paths.sort();

        if paths.is_empty() {
            log::info!("no .lua scripts found in {}", dir.display());
            return summary;
        }
        log::info!("found {} script(s) in {}", paths.len(), dir.display());
        for path in paths {
            let result = self.load_script(&path);
            summary.record(path, result);
        }
        summary
    }

    /// Loads the configured manifest, then the scripts directory when
    /// enabled.
    pub fn load_configured(&mut self) -> LoadSummary {
        let mut summary = LoadSummary::default();
        if let Some(manifest) = self.config.manifest.clone() {
            match self.load_scripts_from_manifest(&manifest) {
                Ok(loaded) => summary.extend(loaded),
                Err(err) => log::error!("{err}"),
            }
        }
        if self.config.load_mod_scripts {
            let loaded = self.load_mod_scripts();
            summary.extend(loaded);
        }
        summary
    }

    /// Runs console code. Captured `print` output comes first, then the
    /// returned values separated by `", "`.
    pub fn execute_string(&self, code: &str) -> String {
        let (Some(lua), Some(ctx)) = (&self.lua, &self.ctx) else {
            return NOT_INITIALIZED.to_string();
        };
        let function = match lua
            .load(code)
            .set_name("=console")
            .set_mode(ChunkMode::Text)
            .into_function()
        {
            Ok(function) => function,
            Err(err) => return format!("Error: {}", error_message(&err)),
        };

        let previous = ctx.begin_capture();
        let result = function.call::<_, MultiValue>(());
        let printed = ctx.end_capture(previous);

        let values = match result {
            Ok(values) => values,
            Err(err) => return format!("Error: {}", error_message(&err)),
        };
        let rendered = values.iter().map(stringify).collect::<Vec<_>>().join(", ");
        match (printed.is_empty(), rendered.is_empty()) {
            (false, false) => format!("{printed}\n{rendered}"),
            (false, true) => printed,
            _ => rendered,
        }
    }

    /// Calls `engineHandlers.onUpdate(dt)` on every loaded module that has it.
    pub fn update(&self, dt: f32) {
        let Some(lua) = &self.lua else {
            return;
        };
        for record in &self.scripts {
            let Some(key) = &record.module else {
                continue;
            };
            let Ok(module) = lua.registry_value::<Table>(key) else {
                continue;
            };
            if let Some(on_update) = engine_handler(&module, "onUpdate") {
                if let Err(err) = on_update.call::<_, ()>(dt) {
                    log::error!(
                        "{}: onUpdate failed: {}",
                        record.path.display(),
                        error_message(&err)
                    );
                }
            }
        }
    }

    pub fn loaded_scripts(&self) -> Vec<PathBuf> {
        self.scripts.iter().map(|record| record.path.clone()).collect()
    }

    pub fn scripts(&self) -> &[ScriptRecord] {
        &self.scripts
    }

    /// Loads every loaded script again, in load order. Script event handlers
    /// are dropped first since the scripts register them again.
    pub fn reload_all_scripts(&mut self) -> LoadSummary {
        log::info!("reloading all scripts");
        let paths = self.loaded_scripts();
        self.scripts.clear();
        if let Some(ctx) = &self.ctx {
            ctx.bus.clear();
        }
        let mut summary = LoadSummary::default();
        for path in paths {
            let result = self.load_script(&path);
            summary.record(path, result);
        }
        summary
    }

    /// Raises a native event as if its signal had fired.
    pub fn dispatch(&self, name: &str, args: &[NativeArg]) -> bool {
        let (Some(lua), Some(ctx)) = (&self.lua, &self.ctx) else {
            return false;
        };
        match event_spec(name) {
            Some(spec) => events::dispatch_native(ctx, lua, spec, args),
            None => {
                log::warn!("unknown native event {name}");
                false
            }
        }
    }

    pub fn serialize(&self) -> ScriptData {
        self.storage.snapshot()
    }

    pub fn deserialize(&self, data: &ScriptData) {
        self.storage.restore(data);
        log::debug!("restored {} script storage entries", data.len());
    }

    pub fn storage(&self) -> &ScriptStorage {
        &self.storage
    }

    pub fn bridge(&self) -> Option<&LegacyBridge> {
        self.ctx.as_deref().map(|ctx| &ctx.bridge)
    }

    pub fn events(&self) -> Option<&EventBus> {
        self.ctx.as_deref().map(|ctx| &ctx.bus)
    }
}

impl Drop for ScriptEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn install_host(lua: &Lua, ctx: &Rc<HostContext>) -> mlua::Result<()> {
    sandbox::apply(lua)?;
    let gothic = bootstrap::create_namespace(lua)?;
    api::install(lua, &gothic, ctx)?;
    events::install(lua, &gothic, ctx.clone())?;
    bridge::install(lua, &gothic, ctx.clone())?;
    persistence::install(lua, &gothic, ctx.storage.clone())?;
    bootstrap::load(lua)
}

fn enable_jit(lua: &Lua) -> bool {
    if !cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) {
        log::info!("JIT not available on this architecture");
        return false;
    }
    let Ok(Some(jit)) = lua.globals().get::<_, Option<Table>>("jit") else {
        log::info!("JIT not supported by this Lua runtime");
        return false;
    };
    if let Ok(on) = jit.get::<_, Function>("on") {
        if let Err(err) = on.call::<_, ()>(()) {
            log::warn!("failed to enable JIT: {err}");
            return false;
        }
    }
    let enabled = jit
        .get::<_, Function>("status")
        .and_then(|status| status.call::<_, bool>(()))
        .unwrap_or(false);
    log::info!("JIT {}", if enabled { "enabled" } else { "unavailable" });
    enabled
}

fn engine_handler<'lua>(module: &Table<'lua>, name: &str) -> Option<Function<'lua>> {
    let handlers: Table = module.get("engineHandlers").ok()?;
    handlers.get::<_, Option<Function>>(name).ok().flatten()
}

/// Script paths named by a manifest, in order.
pub fn parse_manifest(text: &str) -> Vec<&str> {
    text.lines()
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(_kind, path)| path.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n')))
        .filter(|path| !path.is_empty())
        .collect()
}

/// Message text of a Lua error without the wrapper added for callbacks.
fn error_message(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::CallbackError { cause, .. } => error_message(cause),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_manifest;

    #[test]
    fn manifest_skips_comments_blank_lines_and_untyped_entries() {
        let text = "# core scripts\n\nglobal: scripts/loot.lua \r\nno colon here\nmod:\tquests.lua\n";
        assert_eq!(parse_manifest(text), vec!["scripts/loot.lua", "quests.lua"]);
    }

    #[test]
    fn manifest_type_prefix_is_only_split_once() {
        assert_eq!(parse_manifest("global:C:/games/x.lua"), vec!["C:/games/x.lua"]);
    }
}
