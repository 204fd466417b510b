use std::collections::HashMap;

use crate::errors::{KilnError, Result};
use crate::runtime::dom::Element;

pub type HookCallback = Box<dyn Fn(&mut Element) + Send + Sync>;

/// Lifecycle callbacks bound to nodes carrying the hook attribute.
/// Each callback is optional.
#[derive(Default)]
pub struct Hook {
    on_mount: Option<HookCallback>,
    on_update: Option<HookCallback>,
    on_destroy: Option<HookCallback>,
}

impl Hook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_mount(mut self, callback: impl Fn(&mut Element) + Send + Sync + 'static) -> Self {
        self.on_mount = Some(Box::new(callback));
        self
    }

    pub fn on_update(mut self, callback: impl Fn(&mut Element) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Box::new(callback));
        self
    }

    pub fn on_destroy(mut self, callback: impl Fn(&mut Element) + Send + Sync + 'static) -> Self {
        self.on_destroy = Some(Box::new(callback));
        self
    }

    pub(crate) fn mounted(&self, element: &mut Element) {
        if let Some(callback) = &self.on_mount {
            callback(element);
        }
    }

    pub(crate) fn updated(&self, element: &mut Element) {
        if let Some(callback) = &self.on_update {
            callback(element);
        }
    }

    pub(crate) fn destroyed(&self, element: &mut Element) {
        if let Some(callback) = &self.on_destroy {
            callback(element);
        }
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("on_mount", &self.on_mount.is_some())
            .field("on_update", &self.on_update.is_some())
            .field("on_destroy", &self.on_destroy.is_some())
            .finish()
    }
}

/// Hook table keyed by marker name
#[derive(Debug, Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Hook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `Autofocusing` and `Autoselecting`
    pub fn with_defaults() -> Self {
        let mut hooks = HashMap::new();
        hooks.insert("Autofocusing".to_string(), autofocusing());
        hooks.insert("Autoselecting".to_string(), autoselecting());
        Self { hooks }
    }

    pub fn register(&mut self, name: impl Into<String>, hook: Hook) -> Result<()> {
        let name = name.into();
        if self.hooks.contains_key(&name) {
            return Err(KilnError::config(format!("hook '{}' is already registered", name)));
        }
        self.hooks.insert(name, hook);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Hook> {
        self.hooks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.hooks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Focus the node once it is mounted
pub fn autofocusing() -> Hook {
    Hook::new().on_mount(Element::focus)
}

/// Select the node's contents once it is mounted
pub fn autoselecting() -> Hook {
    Hook::new().on_mount(Element::select)
}
