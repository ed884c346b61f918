//! Lua scripting host for the game simulation: a sandboxed runtime, typed
//! handles onto simulation entities, an event bus fed by native signals, and
//! a bridge into the legacy bytecode VM.

#[cfg(all(feature = "lua51", feature = "luajit"))]
compile_error!("enable one Lua backend; build LuaJIT with `--no-default-features --features luajit`");

pub mod config;
pub mod error;
pub mod legacy;
pub mod lua_host;
pub mod signals;
pub mod world;

pub use config::HostConfig;
pub use error::{BridgeError, HostError};
pub use lua_host::{CallContext, LoadSummary, ScriptEngine};
pub use signals::{NativeArg, SignalBoard};
