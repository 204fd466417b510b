use std::collections::HashMap;

/// A self-contained UI component mounted into a node
pub trait Component: Send {
    /// Markup that replaces the node's server-rendered output
    fn render(&self) -> String;

    /// Called once when the node leaves the document
    fn destroy(&mut self) {}
}

pub type ComponentFactory = Box<dyn Fn(&str) -> Box<dyn Component> + Send + Sync>;

/// Component factories keyed by mount class
#[derive(Default)]
pub struct MountRegistry {
    factories: HashMap<String, ComponentFactory>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a class to a factory; a later binding for the same class replaces it
    pub fn bind(
        &mut self,
        class: impl Into<String>,
        factory: impl Fn(&str) -> Box<dyn Component> + Send + Sync + 'static,
    ) {
        self.factories.insert(class.into(), Box::new(factory));
    }

    /// Factory bound to the first of `classes` that has one
    pub fn factory_for<'a>(&self, classes: impl IntoIterator<Item = &'a str>) -> Option<(&str, &ComponentFactory)> {
        classes
            .into_iter()
            .find_map(|class| self.factories.get_key_value(class))
            .map(|(class, factory)| (class.as_str(), factory))
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for MountRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut classes: Vec<&String> = self.factories.keys().collect();
        classes.sort();
        f.debug_struct("MountRegistry").field("classes", &classes).finish()
    }
}

/// A component bound to a node, seeded once from the node's text
pub struct MountedComponent {
    pub node_id: String,
    pub class: String,
    pub input: String,
    component: Box<dyn Component>,
}

impl MountedComponent {
    pub(crate) fn new(node_id: String, class: String, input: String, component: Box<dyn Component>) -> Self {
        Self {
            node_id,
            class,
            input,
            component,
        }
    }

    pub fn render(&self) -> String {
        self.component.render()
    }

    pub(crate) fn destroy(&mut self) {
        self.component.destroy();
    }
}

impl std::fmt::Debug for MountedComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountedComponent")
            .field("node_id", &self.node_id)
            .field("class", &self.class)
            .field("input", &self.input)
            .finish()
    }
}

/// Text editor seeded with the node's content
#[derive(Debug, Clone)]
pub struct Editor {
    content: String,
}

impl Editor {
    pub fn new(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }
}

impl Component for Editor {
    fn render(&self) -> String {
        format!("<textarea class=\"editor\">{}</textarea>", escape_html(&self.content))
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_lookup() {
        let mut registry = MountRegistry::new();
        assert!(registry.is_empty());
        registry.bind("vue-editor", |text| Box::new(Editor::new(text)));

        let (class, factory) = registry.factory_for(["content", "vue-editor"]).unwrap();
        assert_eq!(class, "vue-editor");
        assert_eq!(factory("a < b").render(), "<textarea class=\"editor\">a &lt; b</textarea>");

        assert!(registry.factory_for(["content"]).is_none());
    }
}
