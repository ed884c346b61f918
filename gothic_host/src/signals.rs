//! Native signal slots owned by the simulation.
//!
//! Each named signal carries at most one connected slot. The script host
//! connects one slot per bound event when it initialises and disconnects them
//! again at shutdown.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use thiserror::Error;

use crate::world::EntityId;

/// Argument of a native signal emission.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeArg {
    Entity(Option<EntityId>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

pub type Slot = Rc<dyn Fn(&[NativeArg]) -> bool>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("unknown signal '{0}'")]
    UnknownSignal(String),
    #[error("signal '{0}' already has a connected slot")]
    AlreadyConnected(String),
}

#[derive(Default)]
pub struct SignalBoard {
    slots: RefCell<BTreeMap<String, Option<Slot>>>,
}

impl SignalBoard {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = names.into_iter().map(|name| (name.into(), None)).collect();
        Self {
            slots: RefCell::new(slots),
        }
    }

    /// Board carrying one signal per gameplay event the simulation raises.
    pub fn gameplay() -> Self {
        Self::new([
            "onOpen",
            "onRansack",
            "onItemPickup",
            "onDamage",
            "onNpcKilled",
            "onWorldLoaded",
        ])
    }

    pub fn declare(&self, name: &str) {
        self.slots
            .borrow_mut()
            .entry(name.to_string())
            .or_insert(None);
    }

    pub fn names(&self) -> Vec<String> {
        self.slots.borrow().keys().cloned().collect()
    }

    pub fn connect(&self, name: &str, slot: Slot) -> Result<(), SignalError> {
        let mut slots = self.slots.borrow_mut();
        let entry = slots
            .get_mut(name)
            .ok_or_else(|| SignalError::UnknownSignal(name.to_string()))?;
        if entry.is_some() {
            return Err(SignalError::AlreadyConnected(name.to_string()));
        }
        *entry = Some(slot);
        Ok(())
    }

    /// Removes the slot of `name`; returns whether one was connected.
    pub fn disconnect(&self, name: &str) -> bool {
        self.slots
            .borrow_mut()
            .get_mut(name)
            .and_then(Option::take)
            .is_some()
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.slots
            .borrow()
            .get(name)
            .is_some_and(Option::is_some)
    }

    /// Raises a signal. An unconnected or unknown signal reports `false`.
    pub fn emit(&self, name: &str, args: &[NativeArg]) -> bool {
        let slot = self.slots.borrow().get(name).cloned().flatten();
        match slot {
            Some(slot) => slot(args),
            None => false,
        }
    }
}
