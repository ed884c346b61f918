//! Public surface of the legacy bytecode VM that runs the original quest and
//! AI logic. The host drives it through [`LegacyVm`]; it never implements the
//! instruction set itself.

mod memory;

use std::fmt;
use std::rc::Rc;

use thiserror::Error;

pub use memory::{MemoryVm, NativeBody};

use crate::world::EntityRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Int,
    Float,
    String,
    Instance,
    Function,
}

impl SymbolKind {
    pub fn name(self) -> &'static str {
        match self {
            SymbolKind::Int => "int",
            SymbolKind::Float => "float",
            SymbolKind::String => "string",
            SymbolKind::Instance => "instance",
            SymbolKind::Function => "func",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    Void,
    Int,
    Float,
    String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolInfo {
    pub name: String,
    pub kind: SymbolKind,
    /// Number of elements; arrays have more than one.
    pub count: u32,
    pub is_const: bool,
    pub return_type: ReturnType,
}

/// The four implicit parameters of the legacy language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextSlot {
    /// The legacy `self`.
    Current,
    Other,
    Victim,
    Item,
}

impl ContextSlot {
    pub const ALL: [ContextSlot; 4] = [
        ContextSlot::Current,
        ContextSlot::Other,
        ContextSlot::Victim,
        ContextSlot::Item,
    ];

    /// Key used in script-side context tables.
    pub fn key(self) -> &'static str {
        match self {
            ContextSlot::Current => "self",
            ContextSlot::Other => "other",
            ContextSlot::Victim => "victim",
            ContextSlot::Item => "item",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VmValue {
    Int(i32),
    Float(f32),
    Str(String),
    Instance(Option<EntityRef>),
}

impl VmValue {
    pub fn kind(&self) -> SymbolKind {
        match self {
            VmValue::Int(_) => SymbolKind::Int,
            VmValue::Float(_) => SymbolKind::Float,
            VmValue::Str(_) => SymbolKind::String,
            VmValue::Instance(_) => SymbolKind::Instance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    #[error("unknown symbol #{0}")]
    UnknownSymbol(u32),
    #[error("index {index} out of range for {symbol}")]
    IndexOutOfRange { symbol: String, index: u32 },
    #[error("{0} is const")]
    ConstWrite(String),
    #[error("{symbol} holds {expected} values")]
    TypeMismatch { symbol: String, expected: SymbolKind },
    #[error("{0} is not a function")]
    NotCallable(String),
    #[error("{0} has no implementation")]
    Unbound(String),
    #[error("evaluation stack underflow")]
    StackUnderflow,
    #[error("expected {expected} on the stack")]
    StackType { expected: SymbolKind },
    #[error("{0}")]
    Script(String),
}

/// Native implementation the VM calls for an external function.
pub type ExternalFn = Rc<dyn Fn() -> Result<(), VmError>>;

/// Call and symbol interface of a legacy VM instance.
///
/// Implementations must not hold internal borrows while running functions or
/// externals: an external may call straight back into the same instance.
pub trait LegacyVm {
    fn find_symbol(&self, name: &str) -> Option<SymbolId>;
    fn symbol(&self, id: SymbolId) -> Option<SymbolInfo>;

    fn read(&self, id: SymbolId, index: u32) -> Result<VmValue, VmError>;
    fn write(&self, id: SymbolId, index: u32, value: VmValue) -> Result<(), VmError>;

    fn context(&self, slot: ContextSlot) -> Option<EntityRef>;
    fn set_context(&self, slot: ContextSlot, value: Option<EntityRef>);

    fn push_int(&self, value: i32);
    fn push_float(&self, value: f32);
    fn push_string(&self, value: &str);
    fn push_instance(&self, value: Option<EntityRef>);

    fn call(&self, id: SymbolId) -> Result<(), VmError>;

    fn pop_int(&self) -> Result<i32, VmError>;
    fn pop_float(&self) -> Result<f32, VmError>;
    fn pop_string(&self) -> Result<String, VmError>;

    /// Binds `name` to a native implementation on this instance.
    fn register_external(&self, name: &str, callback: ExternalFn) -> Result<(), VmError>;
}
