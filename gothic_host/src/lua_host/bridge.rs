//! Bridge between the Lua state and the legacy bytecode VM.
//!
//! The bridge owns the script functions registered as VM externals. They are
//! keyed by name so every newly attached VM instance gets all of them again.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use mlua::{Function, Lua, MultiValue, RegistryKey, Result as LuaResult, Table, Value, Variadic};

use super::context::HostContext;
use super::handles;
use super::values::{value_to_f64, value_to_i64};
use crate::error::BridgeError;
use crate::legacy::{
    ContextSlot, ExternalFn, LegacyVm, ReturnType, SymbolId, SymbolInfo, SymbolKind, VmError,
    VmValue,
};
use crate::world::{EntityRef, TypeTag};

type Externals = Rc<RefCell<BTreeMap<String, RegistryKey>>>;

/// Context slots a bridged call should set. `None` leaves a slot as the
/// previous call left it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallContext {
    slots: [Option<EntityRef>; 4],
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, slot: ContextSlot, entity: EntityRef) -> Self {
        self.slots[slot.index()] = Some(entity);
        self
    }

    pub fn get(&self, slot: ContextSlot) -> Option<EntityRef> {
        self.slots[slot.index()]
    }

    /// Sets each requested slot whose entity has the slot's expected type.
    fn apply(&self, vm: &dyn LegacyVm) {
        for slot in ContextSlot::ALL {
            match self.get(slot) {
                Some(entity) if entity.tag == expected_tag(slot) => {
                    vm.set_context(slot, Some(entity));
                }
                Some(entity) => {
                    log::debug!("ignoring {entity} for context slot {}", slot.key());
                }
                None => {}
            }
        }
    }
}

fn expected_tag(slot: ContextSlot) -> TypeTag {
    match slot {
        ContextSlot::Item => TypeTag::Item,
        ContextSlot::Current | ContextSlot::Other | ContextSlot::Victim => TypeTag::Actor,
    }
}

/// Restores the four context slots of a VM when dropped.
struct ContextGuard<'a> {
    vm: &'a dyn LegacyVm,
    saved: [Option<EntityRef>; 4],
}

impl<'a> ContextGuard<'a> {
    fn capture(vm: &'a dyn LegacyVm) -> Self {
        let saved = ContextSlot::ALL.map(|slot| vm.context(slot));
        Self { vm, saved }
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        for slot in ContextSlot::ALL {
            self.vm.set_context(slot, self.saved[slot.index()]);
        }
    }
}

#[derive(Default)]
pub struct LegacyBridge {
    vm: RefCell<Option<Rc<dyn LegacyVm>>>,
    externals: Externals,
    lua: RefCell<Weak<Lua>>,
}

impl LegacyBridge {
    pub(crate) fn set_lua(&self, lua: &Rc<Lua>) {
        *self.lua.borrow_mut() = Rc::downgrade(lua);
    }

    /// Makes `vm` the target of every bridged call and registers all known
    /// script externals on it. Returns how many were registered.
    pub fn attach(&self, vm: Rc<dyn LegacyVm>) -> usize {
        let names: Vec<String> = self.externals.borrow().keys().cloned().collect();
        let mut registered = 0;
        for name in &names {
            match vm.register_external(name, self.external_fn(name)) {
                Ok(()) => registered += 1,
                Err(err) => log::error!("failed to re-register external {name}: {err}"),
            }
        }
        *self.vm.borrow_mut() = Some(vm);
        log::info!("legacy VM attached; {registered}/{} external(s) registered", names.len());
        registered
    }

    pub fn detach(&self) {
        if self.vm.borrow_mut().take().is_some() {
            log::info!("legacy VM detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.vm.borrow().is_some()
    }

    pub fn external_names(&self) -> Vec<String> {
        self.externals.borrow().keys().cloned().collect()
    }

    /// Forgets every script external. Used when the Lua state goes away.
    pub(crate) fn clear_externals(&self) {
        self.externals.borrow_mut().clear();
    }

    fn vm(&self) -> Result<Rc<dyn LegacyVm>, BridgeError> {
        self.vm.borrow().clone().ok_or(BridgeError::NoVm)
    }

    fn resolve(vm: &dyn LegacyVm, name: &str) -> Result<(SymbolId, SymbolInfo), BridgeError> {
        let id = vm
            .find_symbol(name)
            .ok_or_else(|| BridgeError::UnknownSymbol(name.to_string()))?;
        let info = vm
            .symbol(id)
            .ok_or_else(|| BridgeError::UnknownSymbol(name.to_string()))?;
        Ok((id, info))
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.vm()
            .map(|vm| vm.find_symbol(name).is_some())
            .unwrap_or(false)
    }

    pub fn symbol_info(&self, name: &str) -> Result<SymbolInfo, BridgeError> {
        let vm = self.vm()?;
        Self::resolve(vm.as_ref(), name).map(|(_, info)| info)
    }

    pub fn get(&self, name: &str, index: u32) -> Result<VmValue, BridgeError> {
        let vm = self.vm()?;
        let (id, info) = Self::resolve(vm.as_ref(), name)?;
        if info.kind == SymbolKind::Function {
            return Err(BridgeError::TypeMismatch {
                symbol: info.name,
                expected: SymbolKind::Function,
                actual: "variable access".to_string(),
            });
        }
        check_index(&info, index)?;
        Ok(vm.read(id, index)?)
    }

    pub fn set(&self, name: &str, index: u32, value: VmValue) -> Result<(), BridgeError> {
        let vm = self.vm()?;
        let (id, info) = Self::resolve(vm.as_ref(), name)?;
        if info.is_const {
            return Err(BridgeError::ConstWrite(info.name));
        }
        if value.kind() != info.kind {
            return Err(BridgeError::TypeMismatch {
                symbol: info.name,
                expected: info.kind,
                actual: value.kind().name().to_string(),
            });
        }
        check_index(&info, index)?;
        Ok(vm.write(id, index, value)?)
    }

    /// Calls a legacy function with an explicit calling context. Arguments
    /// are pushed last to first. The previous context is restored whether the
    /// call succeeds or fails.
    pub fn call_with_context(
        &self,
        name: &str,
        context: &CallContext,
        args: &[VmValue],
    ) -> Result<Option<VmValue>, BridgeError> {
        let vm = self.vm()?;
        let (id, info) = Self::resolve(vm.as_ref(), name)?;
        if info.kind != SymbolKind::Function {
            return Err(BridgeError::NotCallable(info.name));
        }

        let _restore = ContextGuard::capture(vm.as_ref());
        context.apply(vm.as_ref());

        for arg in args.iter().rev() {
            match arg {
                VmValue::Int(value) => vm.push_int(*value),
                VmValue::Float(value) => vm.push_float(*value),
                VmValue::Str(value) => vm.push_string(value),
                VmValue::Instance(entity) => vm.push_instance(*entity),
            }
        }

        vm.call(id)?;
        let result = match info.return_type {
            ReturnType::Void => None,
            ReturnType::Int => Some(VmValue::Int(vm.pop_int()?)),
            ReturnType::Float => Some(VmValue::Float(vm.pop_float()?)),
            ReturnType::String => Some(VmValue::Str(vm.pop_string()?)),
        };
        Ok(result)
    }

    pub fn call(&self, name: &str, args: &[VmValue]) -> Result<Option<VmValue>, BridgeError> {
        self.call_with_context(name, &CallContext::default(), args)
    }

    /// Stores `function` as the implementation of the legacy external `name`
    /// and registers it on the attached VM, if any. A later registration
    /// under the same name replaces the earlier one.
    pub fn register_external(&self, lua: &Lua, name: &str, function: Function) -> Result<(), BridgeError> {
        let key = lua
            .create_registry_value(function)
            .map_err(|err| BridgeError::Vm(VmError::Script(err.to_string())))?;
        self.externals.borrow_mut().insert(name.to_string(), key);
        let vm = self.vm.borrow().clone();
        if let Some(vm) = vm {
            vm.register_external(name, self.external_fn(name))?;
        }
        log::debug!("registered script external {name}");
        Ok(())
    }

    fn external_fn(&self, name: &str) -> ExternalFn {
        let lua = self.lua.borrow().clone();
        let externals = Rc::downgrade(&self.externals);
        let name = name.to_string();
        Rc::new(move || {
            let lua = lua
                .upgrade()
                .ok_or_else(|| VmError::Script("script host is shut down".to_string()))?;
            let externals = externals
                .upgrade()
                .ok_or_else(|| VmError::Script("script host is shut down".to_string()))?;
            let function = {
                let externals = externals.borrow();
                let key = externals
                    .get(&name)
                    .ok_or_else(|| VmError::Unbound(name.clone()))?;
                lua.registry_value::<Function>(key)
                    .map_err(|err| VmError::Script(err.to_string()))?
            };
            function
                .call::<_, ()>(())
                .map_err(|err| VmError::Script(err.to_string()))
        })
    }
}

fn check_index(info: &SymbolInfo, index: u32) -> Result<(), BridgeError> {
    if index >= info.count {
        return Err(BridgeError::IndexOutOfRange {
            symbol: info.name.clone(),
            index,
            count: info.count,
        });
    }
    Ok(())
}

fn lua_error(err: BridgeError) -> mlua::Error {
    mlua::Error::RuntimeError(err.to_string())
}

/// Converts a script argument for the VM evaluation stack.
fn to_vm_arg(value: &Value) -> VmValue {
    match value {
        Value::Integer(i) => VmValue::Int(clamp_i32(*i as i64)),
        Value::Number(n) if n.fract() != 0.0 => VmValue::Float(*n as f32),
        Value::Number(n) => VmValue::Int(clamp_i32(*n as i64)),
        Value::String(text) => VmValue::Str(text.to_string_lossy().into_owned()),
        Value::Boolean(flag) => VmValue::Int(i32::from(*flag)),
        Value::UserData(_) => match handles::entity_of(value) {
            Some(entity) => VmValue::Instance(Some(entity)),
            None => VmValue::Int(0),
        },
        _ => VmValue::Int(0),
    }
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Converts a script value for a write into a symbol of `kind`, without
/// coercing between kinds.
fn to_symbol_value(kind: SymbolKind, value: &Value) -> Option<VmValue> {
    match kind {
        SymbolKind::Int => value_to_i64(value)
            .and_then(|i| i32::try_from(i).ok())
            .map(VmValue::Int),
        SymbolKind::Float => value_to_f64(value).map(|n| VmValue::Float(n as f32)),
        SymbolKind::String => match value {
            Value::String(text) => Some(VmValue::Str(text.to_string_lossy().into_owned())),
            _ => None,
        },
        SymbolKind::Instance => match value {
            Value::Nil => Some(VmValue::Instance(None)),
            other => handles::entity_of(other).map(|entity| VmValue::Instance(Some(entity))),
        },
        SymbolKind::Function => None,
    }
}

fn to_lua<'lua>(lua: &'lua Lua, value: VmValue) -> LuaResult<Value<'lua>> {
    match value {
        VmValue::Int(i) => Ok(Value::Integer(i as mlua::Integer)),
        VmValue::Float(f) => Ok(Value::Number(f64::from(f))),
        VmValue::Str(text) => lua.create_string(&text).map(Value::String),
        VmValue::Instance(entity) => handles::wrap(lua, entity),
    }
}

fn describe_kind(value: &Value) -> String {
    match value {
        Value::Number(n) if n.fract() != 0.0 => "float".to_string(),
        Value::Integer(_) | Value::Number(_) => "int".to_string(),
        Value::UserData(_) => handles::entity_of(value)
            .map(|entity| entity.tag.name().to_string())
            .unwrap_or_else(|| "userdata".to_string()),
        other => other.type_name().to_string(),
    }
}

fn index_arg(value: &Value) -> LuaResult<u32> {
    match value {
        Value::Nil => Ok(0),
        other => value_to_i64(other)
            .and_then(|i| u32::try_from(i).ok())
            .ok_or_else(|| mlua::Error::RuntimeError("symbol index must be a non-negative integer".to_string())),
    }
}

/// Reads a script context table (`{ self = npc, other = hero, item = it }`).
fn context_from_table(table: &Table) -> LuaResult<CallContext> {
    let mut context = CallContext::default();
    for slot in ContextSlot::ALL {
        let value: Value = table.get(slot.key())?;
        if let Some(entity) = handles::entity_of(&value) {
            context = context.with(slot, entity);
        }
    }
    Ok(context)
}

fn call_result<'lua>(lua: &'lua Lua, result: Option<VmValue>) -> LuaResult<MultiValue<'lua>> {
    match result {
        Some(value) => Ok(MultiValue::from_vec(vec![to_lua(lua, value)?])),
        None => Ok(MultiValue::new()),
    }
}

pub(crate) fn install(lua: &Lua, gothic: &Table, ctx: Rc<HostContext>) -> LuaResult<()> {
    let vm = lua.create_table()?;

    let state = ctx.clone();
    vm.set(
        "hasSymbol",
        lua.create_function(move |_, name: String| Ok(state.bridge.has_symbol(&name)))?,
    )?;

    let state = ctx.clone();
    vm.set(
        "get",
        lua.create_function(move |lua, (name, index): (String, Value)| {
            let index = index_arg(&index)?;
            let value = state.bridge.get(&name, index).map_err(lua_error)?;
            to_lua(lua, value)
        })?,
    )?;

    let state = ctx.clone();
    vm.set(
        "set",
        lua.create_function(move |_, (name, value, index): (String, Value, Value)| {
            let index = index_arg(&index)?;
            let info = state.bridge.symbol_info(&name).map_err(lua_error)?;
            let converted = to_symbol_value(info.kind, &value).ok_or_else(|| {
                lua_error(BridgeError::TypeMismatch {
                    symbol: info.name.clone(),
                    expected: info.kind,
                    actual: describe_kind(&value),
                })
            })?;
            state
                .bridge
                .set(&name, index, converted)
                .map_err(lua_error)
        })?,
    )?;

    let state = ctx.clone();
    vm.set(
        "call",
        lua.create_function(move |lua, (name, args): (String, Variadic<Value>)| {
            let args: Vec<VmValue> = args.iter().map(to_vm_arg).collect();
            let result = state.bridge.call(&name, &args).map_err(lua_error)?;
            call_result(lua, result)
        })?,
    )?;

    let state = ctx.clone();
    vm.set(
        "callWithContext",
        lua.create_function(
            move |lua, (name, context, args): (String, Value, Variadic<Value>)| {
                let context = match &context {
                    Value::Table(table) => context_from_table(table)?,
                    _ => CallContext::default(),
                };
                let args: Vec<VmValue> = args.iter().map(to_vm_arg).collect();
                let result = state
                    .bridge
                    .call_with_context(&name, &context, &args)
                    .map_err(lua_error)?;
                call_result(lua, result)
            },
        )?,
    )?;

    let state = ctx;
    vm.set(
        "registerExternal",
        lua.create_function(move |lua, (name, function): (String, Value)| {
            let Value::Function(function) = function else {
                return Err(mlua::Error::RuntimeError(format!(
                    "registerExternal('{name}') expects a function"
                )));
            };
            state
                .bridge
                .register_external(lua, &name, function)
                .map_err(lua_error)
        })?,
    )?;

    gothic.set("vm", vm)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{to_symbol_value, to_vm_arg, CallContext, LegacyBridge};
    use crate::error::BridgeError;
    use crate::legacy::{ContextSlot, LegacyVm, MemoryVm, ReturnType, SymbolKind, VmError, VmValue};
    use crate::world::{EntityId, EntityRef};
    use mlua::{Lua, Value};
    use std::rc::Rc;

    fn hero() -> EntityRef {
        EntityRef::actor(EntityId::new(1, 0))
    }

    fn bandit() -> EntityRef {
        EntityRef::actor(EntityId::new(2, 0))
    }

    fn attached(vm: &Rc<MemoryVm>) -> LegacyBridge {
        let bridge = LegacyBridge::default();
        let dyn_vm: Rc<dyn LegacyVm> = vm.clone();
        bridge.attach(dyn_vm);
        bridge
    }

    #[test]
    fn const_writes_are_rejected_and_leave_value() {
        let vm = Rc::new(MemoryVm::new());
        vm.define_int("KAPITEL", &[1], true);
        let bridge = attached(&vm);
        assert_eq!(
            bridge.set("KAPITEL", 0, VmValue::Int(4)),
            Err(BridgeError::ConstWrite("KAPITEL".to_string()))
        );
        assert_eq!(bridge.get("KAPITEL", 0), Ok(VmValue::Int(1)));
    }

    #[test]
    fn index_and_type_are_checked_before_access() {
        let vm = Rc::new(MemoryVm::new());
        vm.define_int("GUILD_ATTITUDES", &[0, 1, 2], false);
        let bridge = attached(&vm);
        assert_eq!(bridge.get("GUILD_ATTITUDES", 2), Ok(VmValue::Int(2)));
        assert!(matches!(
            bridge.get("GUILD_ATTITUDES", 3),
            Err(BridgeError::IndexOutOfRange { count: 3, .. })
        ));
        assert!(matches!(
            bridge.set("GUILD_ATTITUDES", 0, VmValue::Float(1.5)),
            Err(BridgeError::TypeMismatch {
                expected: SymbolKind::Int,
                ..
            })
        ));
    }

    #[test]
    fn context_is_restored_after_success_and_failure() {
        let vm = Rc::new(MemoryVm::new());
        let observed = Rc::new(std::cell::Cell::new(None));
        let seen = observed.clone();
        vm.define_function("B_GREET", ReturnType::Int, move |vm| {
            seen.set(vm.context(ContextSlot::Other));
            let first = vm.pop_int()?;
            vm.push_int(first * 10);
            Ok(())
        });
        vm.define_function("B_FAIL", ReturnType::Void, |_| {
            Err(VmError::Script("no such dialog".to_string()))
        });
        vm.set_context(ContextSlot::Current, Some(bandit()));
        let bridge = attached(&vm);

        let context = CallContext::new()
            .with(ContextSlot::Other, hero())
            .with(ContextSlot::Item, hero());
        let result = bridge.call_with_context("B_GREET", &context, &[VmValue::Int(4), VmValue::Int(9)]);
        assert_eq!(result, Ok(Some(VmValue::Int(40))));
        assert_eq!(observed.get(), Some(hero()));
        assert_eq!(vm.context(ContextSlot::Other), None);
        assert_eq!(vm.context(ContextSlot::Current), Some(bandit()));
        assert_eq!(vm.context(ContextSlot::Item), None);
        assert_eq!(vm.pop_int(), Ok(9));

        let err = bridge.call_with_context("B_FAIL", &context, &[]).unwrap_err();
        assert_eq!(err.to_string(), "legacy VM error: no such dialog");
        assert_eq!(vm.context(ContextSlot::Other), None);
        assert_eq!(vm.context(ContextSlot::Current), Some(bandit()));
    }

    #[test]
    fn calls_without_a_vm_fail() {
        let bridge = LegacyBridge::default();
        assert_eq!(bridge.call("B_GREET", &[]), Err(BridgeError::NoVm));
        assert!(!bridge.has_symbol("B_GREET"));
    }

    #[test]
    fn script_values_map_onto_vm_arguments() {
        let lua = Lua::new();
        assert_eq!(to_vm_arg(&Value::Number(2.0)), VmValue::Int(2));
        assert_eq!(to_vm_arg(&Value::Number(2.5)), VmValue::Float(2.5));
        assert_eq!(to_vm_arg(&Value::Boolean(true)), VmValue::Int(1));
        let table = lua.create_table().expect("table");
        assert_eq!(to_vm_arg(&Value::Table(table)), VmValue::Int(0));
        assert_eq!(to_symbol_value(SymbolKind::Int, &Value::Number(2.5)), None);
        assert_eq!(
            to_symbol_value(SymbolKind::Instance, &Value::Nil),
            Some(VmValue::Instance(None))
        );
    }
}
