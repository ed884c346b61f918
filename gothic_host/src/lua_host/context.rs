use std::cell::RefCell;
use std::rc::Rc;

use super::bridge::LegacyBridge;
use super::events::EventBus;
use super::persistence::ScriptStorage;
use crate::world::SharedWorld;

/// State shared between the engine and every host function installed into
/// the Lua state.
pub(crate) struct HostContext {
    pub(crate) world: SharedWorld,
    pub(crate) bus: EventBus,
    pub(crate) bridge: LegacyBridge,
    pub(crate) storage: Rc<ScriptStorage>,
    capture: RefCell<Option<String>>,
}

impl HostContext {
    pub(crate) fn new(world: SharedWorld, storage: Rc<ScriptStorage>) -> Self {
        Self {
            world,
            bus: EventBus::default(),
            bridge: LegacyBridge::default(),
            storage,
            capture: RefCell::new(None),
        }
    }

    /// Routes one line of script `print` output.
    pub(crate) fn print(&self, line: &str) {
        let mut capture = self.capture.borrow_mut();
        match capture.as_mut() {
            Some(buffer) => {
                if !buffer.is_empty() {
                    buffer.push('\n');
                }
                buffer.push_str(line);
            }
            None => log::info!("[lua] {line}"),
        }
    }

    pub(crate) fn begin_capture(&self) -> Option<String> {
        self.capture.borrow_mut().replace(String::new())
    }

    /// Ends the current capture and reinstates `previous`.
    pub(crate) fn end_capture(&self, previous: Option<String>) -> String {
        let mut capture = self.capture.borrow_mut();
        let output = capture.take().unwrap_or_default();
        *capture = previous;
        output
    }
}
