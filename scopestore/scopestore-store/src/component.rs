//! Ready-made component holding a JSON value.

use parking_lot::RwLock;
use scopestore_core::error::Result;
use scopestore_core::traits::PersistentComponent;
use scopestore_core::types::ComponentName;
use serde_json::Value;

/// Component whose whole state is one JSON value.
///
/// `None` means the component has nothing to persist and is dropped from
/// its storage file on the next save.
#[derive(Debug)]
pub struct JsonComponent {
    name: ComponentName,
    value: RwLock<Option<Value>>,
    default: Option<Value>,
    reloadable: bool,
}

impl JsonComponent {
    pub fn new(name: impl Into<ComponentName>) -> Self {
        Self {
            name: name.into(),
            value: RwLock::new(None),
            default: None,
            reloadable: true,
        }
    }

    /// Value restored when the storage holds nothing for this component
    pub fn with_default(mut self, default: Value) -> Self {
        *self.value.get_mut() = Some(default.clone());
        self.default = Some(default);
        self
    }

    /// Mark the component as unable to take a live reload
    pub fn not_reloadable(mut self) -> Self {
        self.reloadable = false;
        self
    }

    pub fn get(&self) -> Option<Value> {
        self.value.read().clone()
    }

    pub fn set(&self, value: Value) {
        *self.value.write() = Some(value);
    }

    pub fn clear(&self) {
        *self.value.write() = None;
    }
}

impl PersistentComponent for JsonComponent {
    fn name(&self) -> &ComponentName {
        &self.name
    }

    fn state(&self) -> Result<Option<Value>> {
        Ok(self.value.read().clone())
    }

    fn load_state(&self, state: Option<Value>) {
        *self.value.write() = state.or_else(|| self.default.clone());
    }

    fn is_reloadable(&self) -> bool {
        self.reloadable
    }
}
