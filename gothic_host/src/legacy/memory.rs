use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::{
    ContextSlot, ExternalFn, LegacyVm, ReturnType, SymbolId, SymbolInfo, SymbolKind, VmError,
    VmValue,
};
use crate::world::EntityRef;

/// Rust closure standing in for a compiled legacy function.
pub type NativeBody = Rc<dyn Fn(&MemoryVm) -> Result<(), VmError>>;

#[derive(Clone)]
enum Implementation {
    Native(NativeBody),
    External(ExternalFn),
}

enum Body {
    Data(Vec<VmValue>),
    Function(Option<Implementation>),
}

struct Symbol {
    info: SymbolInfo,
    body: Body,
}

/// In-process legacy VM with a symbol table, an evaluation stack and the four
/// context slots. Used by tests and the demo binary.
#[derive(Default)]
pub struct MemoryVm {
    symbols: RefCell<Vec<Symbol>>,
    by_name: RefCell<BTreeMap<String, SymbolId>>,
    stack: RefCell<Vec<VmValue>>,
    context: RefCell<[Option<EntityRef>; 4]>,
    trace: RefCell<Vec<String>>,
}

impl MemoryVm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_int(&self, name: &str, values: &[i32], is_const: bool) -> SymbolId {
        let values = values.iter().copied().map(VmValue::Int).collect();
        self.define_data(name, SymbolKind::Int, values, is_const)
    }

    pub fn define_float(&self, name: &str, values: &[f32], is_const: bool) -> SymbolId {
        let values = values.iter().copied().map(VmValue::Float).collect();
        self.define_data(name, SymbolKind::Float, values, is_const)
    }

    pub fn define_string(&self, name: &str, values: &[&str], is_const: bool) -> SymbolId {
        let values = values
            .iter()
            .map(|value| VmValue::Str(value.to_string()))
            .collect();
        self.define_data(name, SymbolKind::String, values, is_const)
    }

    pub fn define_instance(&self, name: &str, value: Option<EntityRef>) -> SymbolId {
        self.define_data(name, SymbolKind::Instance, vec![VmValue::Instance(value)], false)
    }

    pub fn define_function<F>(&self, name: &str, return_type: ReturnType, body: F) -> SymbolId
    where
        F: Fn(&MemoryVm) -> Result<(), VmError> + 'static,
    {
        let body: NativeBody = Rc::new(body);
        self.insert(Symbol {
            info: function_info(name, return_type),
            body: Body::Function(Some(Implementation::Native(body))),
        })
    }

    /// Declares an external that has no implementation until one is registered.
    pub fn declare_external(&self, name: &str, return_type: ReturnType) -> SymbolId {
        self.insert(Symbol {
            info: function_info(name, return_type),
            body: Body::Function(None),
        })
    }

    /// Names of the functions called so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.trace.borrow().clone()
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Resolves and calls a function by name.
    pub fn call_by_name(&self, name: &str) -> Result<(), VmError> {
        let id = self
            .find_symbol(name)
            .ok_or_else(|| VmError::Script(format!("unknown function {name}")))?;
        self.call(id)
    }

    fn define_data(
        &self,
        name: &str,
        kind: SymbolKind,
        values: Vec<VmValue>,
        is_const: bool,
    ) -> SymbolId {
        let count = u32::try_from(values.len()).unwrap_or(u32::MAX);
        self.insert(Symbol {
            info: SymbolInfo {
                name: name.to_string(),
                kind,
                count,
                is_const,
                return_type: ReturnType::Void,
            },
            body: Body::Data(values),
        })
    }

    fn insert(&self, symbol: Symbol) -> SymbolId {
        let mut symbols = self.symbols.borrow_mut();
        let id = SymbolId(symbols.len() as u32);
        self.by_name
            .borrow_mut()
            .insert(symbol.info.name.to_ascii_uppercase(), id);
        symbols.push(symbol);
        id
    }

    fn pop(&self, expected: SymbolKind) -> Result<VmValue, VmError> {
        let mut stack = self.stack.borrow_mut();
        match stack.pop() {
            Some(value) if value.kind() == expected => Ok(value),
            Some(value) => {
                stack.push(value);
                Err(VmError::StackType { expected })
            }
            None => Err(VmError::StackUnderflow),
        }
    }
}

fn function_info(name: &str, return_type: ReturnType) -> SymbolInfo {
    SymbolInfo {
        name: name.to_string(),
        kind: SymbolKind::Function,
        count: 1,
        is_const: true,
        return_type,
    }
}

impl LegacyVm for MemoryVm {
    fn find_symbol(&self, name: &str) -> Option<SymbolId> {
        self.by_name
            .borrow()
            .get(&name.to_ascii_uppercase())
            .copied()
    }

    fn symbol(&self, id: SymbolId) -> Option<SymbolInfo> {
        self.symbols
            .borrow()
            .get(id.0 as usize)
            .map(|symbol| symbol.info.clone())
    }

    fn read(&self, id: SymbolId, index: u32) -> Result<VmValue, VmError> {
        let symbols = self.symbols.borrow();
        let symbol = symbols
            .get(id.0 as usize)
            .ok_or(VmError::UnknownSymbol(id.0))?;
        match &symbol.body {
            Body::Data(values) => {
                values
                    .get(index as usize)
                    .cloned()
                    .ok_or_else(|| VmError::IndexOutOfRange {
                        symbol: symbol.info.name.clone(),
                        index,
                    })
            }
            Body::Function(_) => Err(VmError::TypeMismatch {
                symbol: symbol.info.name.clone(),
                expected: SymbolKind::Function,
            }),
        }
    }

    fn write(&self, id: SymbolId, index: u32, value: VmValue) -> Result<(), VmError> {
        let mut symbols = self.symbols.borrow_mut();
        let symbol = symbols
            .get_mut(id.0 as usize)
            .ok_or(VmError::UnknownSymbol(id.0))?;
        if symbol.info.is_const {
            return Err(VmError::ConstWrite(symbol.info.name.clone()));
        }
        if value.kind() != symbol.info.kind {
            return Err(VmError::TypeMismatch {
                symbol: symbol.info.name.clone(),
                expected: symbol.info.kind,
            });
        }
        let name = symbol.info.name.clone();
        match &mut symbol.body {
            Body::Data(values) => {
                let slot = values
                    .get_mut(index as usize)
                    .ok_or(VmError::IndexOutOfRange { symbol: name, index })?;
                *slot = value;
                Ok(())
            }
            Body::Function(_) => Err(VmError::TypeMismatch {
                symbol: name,
                expected: SymbolKind::Function,
            }),
        }
    }

    fn context(&self, slot: ContextSlot) -> Option<EntityRef> {
        self.context.borrow()[slot.index()]
    }

    fn set_context(&self, slot: ContextSlot, value: Option<EntityRef>) {
        self.context.borrow_mut()[slot.index()] = value;
    }

    fn push_int(&self, value: i32) {
        self.stack.borrow_mut().push(VmValue::Int(value));
    }

    fn push_float(&self, value: f32) {
        self.stack.borrow_mut().push(VmValue::Float(value));
    }

    fn push_string(&self, value: &str) {
        self.stack.borrow_mut().push(VmValue::Str(value.to_string()));
    }

    fn push_instance(&self, value: Option<EntityRef>) {
        self.stack.borrow_mut().push(VmValue::Instance(value));
    }

    fn call(&self, id: SymbolId) -> Result<(), VmError> {
        let (info, implementation) = {
            let symbols = self.symbols.borrow();
            let symbol = symbols
                .get(id.0 as usize)
                .ok_or(VmError::UnknownSymbol(id.0))?;
            match &symbol.body {
                Body::Function(implementation) => (symbol.info.clone(), implementation.clone()),
                Body::Data(_) => return Err(VmError::NotCallable(symbol.info.name.clone())),
            }
        };
        self.trace.borrow_mut().push(info.name.clone());
        match implementation {
            None => Err(VmError::Unbound(info.name)),
            Some(Implementation::Native(body)) => body(self),
            Some(Implementation::External(callback)) => {
                callback()?;
                // Externals registered by the host produce no value; keep the
                // stack balanced for callers that expect one.
                match info.return_type {
                    ReturnType::Void => {}
                    ReturnType::Int => self.push_int(0),
                    ReturnType::Float => self.push_float(0.0),
                    ReturnType::String => self.push_string(""),
                }
                Ok(())
            }
        }
    }

    fn pop_int(&self) -> Result<i32, VmError> {
        match self.pop(SymbolKind::Int)? {
            VmValue::Int(value) => Ok(value),
            _ => Err(VmError::StackType {
                expected: SymbolKind::Int,
            }),
        }
    }

    fn pop_float(&self) -> Result<f32, VmError> {
        match self.pop(SymbolKind::Float)? {
            VmValue::Float(value) => Ok(value),
            _ => Err(VmError::StackType {
                expected: SymbolKind::Float,
            }),
        }
    }

    fn pop_string(&self) -> Result<String, VmError> {
        match self.pop(SymbolKind::String)? {
            VmValue::Str(value) => Ok(value),
            _ => Err(VmError::StackType {
                expected: SymbolKind::String,
            }),
        }
    }

    fn register_external(&self, name: &str, callback: ExternalFn) -> Result<(), VmError> {
        if let Some(id) = self.find_symbol(name) {
            let mut symbols = self.symbols.borrow_mut();
            let symbol = &mut symbols[id.0 as usize];
            return match &mut symbol.body {
                Body::Function(implementation) => {
                    *implementation = Some(Implementation::External(callback));
                    Ok(())
                }
                Body::Data(_) => Err(VmError::NotCallable(symbol.info.name.clone())),
            };
        }
        self.insert(Symbol {
            info: function_info(name, ReturnType::Void),
            body: Body::Function(Some(Implementation::External(callback))),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryVm;
    use crate::legacy::{ContextSlot, LegacyVm, ReturnType, VmError, VmValue};
    use crate::world::{EntityId, EntityRef};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn const_symbols_reject_writes() {
        let vm = MemoryVm::new();
        let id = vm.define_int("MAX_LEVEL", &[40], true);
        let err = vm.write(id, 0, VmValue::Int(1)).unwrap_err();
        assert_eq!(err, VmError::ConstWrite("MAX_LEVEL".to_string()));
        assert_eq!(vm.read(id, 0), Ok(VmValue::Int(40)));
    }

    #[test]
    fn functions_pop_arguments_and_push_results() {
        let vm = MemoryVm::new();
        vm.define_function("ADD", ReturnType::Int, |vm| {
            let a = vm.pop_int()?;
            let b = vm.pop_int()?;
            vm.push_int(a + b);
            Ok(())
        });
        vm.push_int(2);
        vm.push_int(3);
        vm.call_by_name("add").expect("call");
        assert_eq!(vm.pop_int(), Ok(5));
        assert_eq!(vm.calls(), vec!["ADD".to_string()]);
    }

    #[test]
    fn externals_can_reenter_the_instance() {
        let vm = Rc::new(MemoryVm::new());
        vm.define_int("COUNTER", &[0], false);
        vm.declare_external("HOST_TICK", ReturnType::Int);
        let hits = Rc::new(Cell::new(0));
        let inner = vm.clone();
        let counter_hits = hits.clone();
        vm.register_external(
            "HOST_TICK",
            Rc::new(move || {
                counter_hits.set(counter_hits.get() + 1);
                let id = inner.find_symbol("COUNTER").expect("counter");
                inner.write(id, 0, VmValue::Int(7))
            }),
        )
        .expect("register");
        vm.call_by_name("HOST_TICK").expect("call");
        assert_eq!(hits.get(), 1);
        assert_eq!(vm.pop_int(), Ok(0));
        let id = vm.find_symbol("counter").expect("counter");
        assert_eq!(vm.read(id, 0), Ok(VmValue::Int(7)));
    }

    #[test]
    fn unbound_externals_fail_when_called() {
        let vm = MemoryVm::new();
        vm.declare_external("B_SAY", ReturnType::Void);
        assert_eq!(
            vm.call_by_name("B_SAY"),
            Err(VmError::Unbound("B_SAY".to_string()))
        );
    }

    #[test]
    fn context_slots_are_independent() {
        let vm = MemoryVm::new();
        let hero = EntityRef::actor(EntityId::new(1, 0));
        vm.set_context(ContextSlot::Other, Some(hero));
        assert_eq!(vm.context(ContextSlot::Other), Some(hero));
        assert_eq!(vm.context(ContextSlot::Current), None);
    }
}
