use std::collections::{BTreeMap, HashMap};
use serde::{Deserialize, Serialize};

/// A server-rendered node as carried by a patch message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePatch {
    pub id: String,
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub text: String,
}

impl NodePatch {
    pub fn new(id: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag: tag.into(),
            attributes: BTreeMap::new(),
            text: String::new(),
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

/// A live node in the client document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub id: String,
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub text: String,
    pub focused: bool,
    pub selected: bool,
    /// Output of a mounted component, replacing the server markup
    pub rendered: Option<String>,
}

impl Element {
    pub fn from_patch(patch: &NodePatch) -> Self {
        Self {
            id: patch.id.clone(),
            tag: patch.tag.clone(),
            attributes: patch.attributes.clone(),
            text: patch.text.clone(),
            focused: false,
            selected: false,
            rendered: None,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attribute("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    pub fn focus(&mut self) {
        self.focused = true;
    }

    pub fn select(&mut self) {
        self.selected = true;
    }

    /// Whether applying the patch would change server-owned state
    pub fn differs_from(&self, patch: &NodePatch) -> bool {
        self.tag != patch.tag || self.attributes != patch.attributes || self.text != patch.text
    }

    /// Take server-owned state from a patch, keeping client state
    pub fn update_from(&mut self, patch: &NodePatch) {
        self.update_attributes_from(patch);
        self.text = patch.text.clone();
    }

    /// Like [`Element::update_from`] but leaves the text alone, for nodes
    /// whose content belongs to a mounted component
    pub fn update_attributes_from(&mut self, patch: &NodePatch) {
        self.tag = patch.tag.clone();
        self.attributes = patch.attributes.clone();
    }
}

/// Ordered set of live nodes keyed by id
#[derive(Debug, Clone, Default)]
pub struct Document {
    nodes: Vec<Element>,
    index: HashMap<String, usize>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Element> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Element> {
        self.index.get(id).map(|&i| &mut self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Replace the node list, reordering to `order` and dropping every id not in it
    pub(crate) fn rebuild(&mut self, mut nodes: HashMap<String, Element>, order: &[String]) {
        self.nodes = order.iter().filter_map(|id| nodes.remove(id)).collect();
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
    }

    /// Move every node out, leaving the document empty
    pub(crate) fn take_nodes(&mut self) -> HashMap<String, Element> {
        self.index.clear();
        self.nodes.drain(..).map(|n| (n.id.clone(), n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes_and_diff() {
        let patch = NodePatch::new("n1", "div")
            .attribute("class", "content vue-editor")
            .text("hello");
        let mut element = Element::from_patch(&patch);

        assert!(element.has_class("vue-editor"));
        assert!(!element.has_class("vue"));
        assert!(!element.differs_from(&patch));

        element.focus();
        let changed = patch.clone().text("bye");
        assert!(element.differs_from(&changed));
        element.update_from(&changed);
        assert_eq!(element.text, "bye");
        assert!(element.focused);
    }

    #[test]
    fn test_rebuild_orders_and_drops() {
        let mut document = Document::new();
        let mut nodes = HashMap::new();
        for id in ["a", "b", "c"] {
            nodes.insert(id.to_string(), Element::from_patch(&NodePatch::new(id, "p")));
        }
        document.rebuild(nodes, &["c".to_string(), "a".to_string()]);

        assert_eq!(document.ids().collect::<Vec<_>>(), vec!["c", "a"]);
        assert!(!document.contains("b"));
        assert_eq!(document.get("a").unwrap().tag, "p");
    }
}
