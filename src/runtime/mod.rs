//! Client runtime core.
//!
//! The runtime keeps a document of server-rendered nodes. Each patch from the
//! server is the full node list; nodes missing from it were removed. Hooks
//! named by the hook attribute receive mount, update and destroy callbacks.
//! Nodes carrying a mount class receive a component once, seeded from their
//! text; later patches never touch that text but still drive the node's hook.

pub mod dom;
pub mod hooks;
pub mod mount;
pub mod socket;

use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::errors::KilnError;

pub use dom::{Document, Element, NodePatch};
pub use hooks::{Hook, HookRegistry};
pub use mount::{Component, Editor, MountRegistry, MountedComponent};
pub use socket::{Backoff, ConnectionState, LiveSocket, ServerMessage, Transport};

/// What one patch did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSummary {
    pub hooks_mounted: usize,
    pub hooks_updated: usize,
    pub hooks_destroyed: usize,
    pub components_mounted: usize,
    pub components_destroyed: usize,
    pub errors: usize,
}

/// Applies server patches to the document, driving hooks and mounts
#[derive(Debug)]
pub struct ClientRuntime {
    document: Document,
    hooks: HookRegistry,
    mounts: MountRegistry,
    hook_attribute: String,
    /// Node id to the hook bound to it
    bound: HashMap<String, String>,
    mounted: HashMap<String, MountedComponent>,
    /// (node id, hook name) pairs already reported as unknown
    unknown_hooks: HashSet<(String, String)>,
    errors: mpsc::UnboundedSender<KilnError>,
}

impl ClientRuntime {
    /// Create a runtime and the receiving end of its error channel
    pub fn new(
        config: &RuntimeConfig,
        hooks: HookRegistry,
        mounts: MountRegistry,
    ) -> (Self, mpsc::UnboundedReceiver<KilnError>) {
        let (errors, receiver) = mpsc::unbounded_channel();
        let runtime = Self {
            document: Document::new(),
            hooks,
            mounts,
            hook_attribute: config.hook_attribute.clone(),
            bound: HashMap::new(),
            mounted: HashMap::new(),
            unknown_hooks: HashSet::new(),
            errors,
        };
        (runtime, receiver)
    }

    /// Default bootstrap: the built-in hooks and an editor bound to the
    /// configured mount class
    pub fn bootstrap(config: &RuntimeConfig) -> (Self, mpsc::UnboundedReceiver<KilnError>) {
        let mut mounts = MountRegistry::new();
        mounts.bind(config.mount_class.clone(), |content| Box::new(Editor::new(content)));
        Self::new(config, HookRegistry::with_defaults(), mounts)
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn mounted(&self, node_id: &str) -> Option<&MountedComponent> {
        self.mounted.get(node_id)
    }

    /// Send an error to the error channel. A closed channel only logs.
    pub fn report(&self, error: KilnError) {
        warn!("{}", error);
        if self.errors.send(error).is_err() {
            debug!("Error channel closed");
        }
    }

    /// Handle one decoded server message
    pub fn handle(&mut self, message: ServerMessage) -> PatchSummary {
        match message {
            ServerMessage::Patch { nodes } => self.apply_patch(&nodes),
            ServerMessage::Error { message } => {
                self.report(KilnError::Server { message });
                PatchSummary {
                    errors: 1,
                    ..PatchSummary::default()
                }
            }
        }
    }

    /// Apply a full node list. Hook callbacks run synchronously, in patch
    /// order, then destroy callbacks for removed nodes.
    pub fn apply_patch(&mut self, nodes: &[NodePatch]) -> PatchSummary {
        let mut summary = PatchSummary::default();
        let mut previous = self.document.take_nodes();
        let mut next: HashMap<String, Element> = HashMap::with_capacity(nodes.len());
        let mut order = Vec::with_capacity(nodes.len());

        for patch in nodes {
            if next.contains_key(&patch.id) {
                debug!("Ignoring repeated node '{}' in patch", patch.id);
                continue;
            }
            order.push(patch.id.clone());

            let element = match previous.remove(&patch.id) {
                Some(mut element) if self.mounted.contains_key(&patch.id) => {
                    let changed = element.tag != patch.tag || element.attributes != patch.attributes;
                    element.update_attributes_from(patch);
                    self.rebind_hook(&mut element, changed, &mut summary);
                    element
                }
                Some(mut element) => {
                    let changed = element.differs_from(patch);
                    element.update_from(patch);
                    self.rebind_hook(&mut element, changed, &mut summary);
                    element
                }
                None => {
                    let mut element = Element::from_patch(patch);
                    self.bind_hook(&mut element, &mut summary);
                    self.mount_component(&mut element, &mut summary);
                    element
                }
            };
            next.insert(patch.id.clone(), element);
        }

        let mut removed: Vec<(String, Element)> = previous.into_iter().collect();
        removed.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, mut element) in removed {
            self.unknown_hooks.retain(|(node, _)| *node != id);
            if let Some(name) = self.bound.remove(&id) {
                if let Some(hook) = self.hooks.get(&name) {
                    hook.destroyed(&mut element);
                    summary.hooks_destroyed += 1;
                }
            }
            if let Some(mut component) = self.mounted.remove(&id) {
                component.destroy();
                summary.components_destroyed += 1;
            }
        }

        self.document.rebuild(next, &order);
        summary
    }

    fn bind_hook(&mut self, element: &mut Element, summary: &mut PatchSummary) {
        let Some(name) = element.attribute(&self.hook_attribute).map(str::to_string) else {
            return;
        };

        match self.hooks.get(&name) {
            Some(hook) => {
                hook.mounted(element);
                self.bound.insert(element.id.clone(), name);
                summary.hooks_mounted += 1;
            }
            None => {
                if !self.unknown_hooks.insert((element.id.clone(), name.clone())) {
                    debug!("Hook '{}' on node '{}' is still unknown", name, element.id);
                    return;
                }
                summary.errors += 1;
                self.report(KilnError::UnknownHook {
                    name,
                    node: element.id.clone(),
                });
            }
        }
    }

    fn rebind_hook(&mut self, element: &mut Element, changed: bool, summary: &mut PatchSummary) {
        let wanted = element.attribute(&self.hook_attribute).map(str::to_string);
        let current = self.bound.get(&element.id).cloned();

        if wanted == current {
            if changed {
                if let Some(hook) = current.as_deref().and_then(|name| self.hooks.get(name)) {
                    hook.updated(element);
                    summary.hooks_updated += 1;
                }
            }
            return;
        }

        if let Some(name) = current {
            self.bound.remove(&element.id);
            if let Some(hook) = self.hooks.get(&name) {
                hook.destroyed(element);
                summary.hooks_destroyed += 1;
            }
        }
        self.bind_hook(element, summary);
    }

    fn mount_component(&mut self, element: &mut Element, summary: &mut PatchSummary) {
        let classes: Vec<String> = element
            .attribute("class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let Some((class, factory)) = self.mounts.factory_for(classes.iter().map(String::as_str)) else {
            return;
        };

        let input = element.text.clone();
        let component = factory(&input);
        let mounted = MountedComponent::new(element.id.clone(), class.to_string(), input, component);
        element.rendered = Some(mounted.render());
        debug!("Mounted component '{}' on node '{}'", mounted.class, element.id);
        self.mounted.insert(element.id.clone(), mounted);
        summary.components_mounted += 1;
    }
}
