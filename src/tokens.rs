use std::collections::BTreeMap;
use std::sync::LazyLock;
use regex::{Captures, Regex};

/// `theme('spacing.18')`, `theme("colors.brand")`
static THEME_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"theme\(\s*["']?(?P<key>[\w.-]+)["']?\s*\)"#).expect("theme pattern is valid")
});

/// Design-token lookup table, flattened to dotted keys
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesignTokens {
    values: BTreeMap<String, String>,
}

impl DesignTokens {
    pub fn from_table(table: &toml::Table) -> Self {
        let mut values = BTreeMap::new();
        flatten("", table, &mut values);
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace every `theme(key)` reference. The first unknown key is an error.
    pub fn substitute(&self, css: &str) -> std::result::Result<String, String> {
        let mut missing: Option<String> = None;

        let replaced = THEME_REF_RE.replace_all(css, |caps: &Captures| {
            let key = &caps["key"];
            match self.get(key) {
                Some(value) => value.to_string(),
                None => {
                    if missing.is_none() {
                        missing = Some(key.to_string());
                    }
                    caps[0].to_string()
                }
            }
        });

        match missing {
            Some(key) => Err(format!("unknown design token '{}'", key)),
            None => Ok(replaced.into_owned()),
        }
    }
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        match value {
            toml::Value::Table(inner) => flatten(&path, inner, out),
            other => {
                out.insert(path, render(other));
            }
        }
    }
}

fn render(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Array(items) => items.iter().map(render).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}
