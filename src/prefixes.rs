use std::collections::BTreeMap;
use regex::{Captures, Regex};

use crate::errors::Result;

/// Vendor-prefix expansion for a known set of CSS properties
#[derive(Debug, Clone)]
pub struct PrefixRegistry {
    rules: BTreeMap<String, Vec<String>>,
    matcher: Option<Regex>,
}

impl PrefixRegistry {
    /// Built-in rules plus configured ones; a configured property replaces
    /// the built-in entry of the same name
    pub fn new(extra: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut rules = default_rules();
        for (property, prefixes) in extra {
            rules.insert(property.to_lowercase(), prefixes.clone());
        }

        let matcher = if rules.is_empty() {
            None
        } else {
            let alternatives = rules
                .keys()
                .map(|property| regex::escape(property))
                .collect::<Vec<_>>()
                .join("|");
            // Only unprefixed declarations: the property must follow the
            // start of a block, a `;` or whitespace.
            Some(Regex::new(&format!(
                r"(?m)(?P<lead>^|[{{;\s])(?P<indent>[ \t]*)(?P<prop>{})\s*:(?P<value>[^;{{}}]*)",
                alternatives
            ))?)
        };

        Ok(Self { rules, matcher })
    }

    pub fn prefixes_for(&self, property: &str) -> Option<&[String]> {
        self.rules.get(property).map(Vec::as_slice)
    }

    pub fn has_rule(&self, property: &str) -> bool {
        self.rules.contains_key(property)
    }

    /// Insert prefixed copies ahead of each matching declaration
    pub fn expand(&self, css: &str) -> String {
        let Some(matcher) = &self.matcher else {
            return css.to_string();
        };

        matcher
            .replace_all(css, |caps: &Captures| {
                let property = &caps["prop"];
                let value = caps["value"].trim();

                let mut declarations: Vec<String> = self
                    .prefixes_for(property)
                    .unwrap_or_default()
                    .iter()
                    .map(|prefix| format!("-{}-{}: {};", prefix, property, value))
                    .collect();
                declarations.push(format!("{}: {}", property, value));

                format!("{}{}{}", &caps["lead"], &caps["indent"], declarations.join(" "))
            })
            .into_owned()
    }
}

fn default_rules() -> BTreeMap<String, Vec<String>> {
    let table: &[(&str, &[&str])] = &[
        ("user-select", &["webkit", "moz", "ms"]),
        ("appearance", &["webkit", "moz"]),
        ("backdrop-filter", &["webkit"]),
        ("text-size-adjust", &["webkit", "moz", "ms"]),
        ("hyphens", &["webkit", "ms"]),
        ("mask-image", &["webkit"]),
        ("clip-path", &["webkit"]),
        ("box-decoration-break", &["webkit"]),
        ("tab-size", &["moz"]),
    ];

    table
        .iter()
        .map(|(property, prefixes)| {
            (
                property.to_string(),
                prefixes.iter().map(|p| p.to_string()).collect(),
            )
        })
        .collect()
}
