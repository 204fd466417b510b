use std::collections::BTreeMap;
use std::sync::LazyLock;
use regex::Regex;

/// Opening tag of a top-level block: `<script lang="js">`
static BLOCK_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<(?P<tag>template|script|style)(?P<attrs>(?:\s+[\w:@.-]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+))?)*)\s*>"#)
        .expect("block pattern is valid")
});

static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<name>[\w:@.-]+)(?:\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<bare>[^\s>]+)))?"#)
        .expect("attribute pattern is valid")
});

/// One top-level block of a single-file component
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub content: String,
    pub attributes: BTreeMap<String, String>,
    /// Line of the opening tag
    pub line: usize,
}

impl Block {
    pub fn lang(&self) -> Option<&str> {
        self.attributes.get("lang").map(String::as_str)
    }
}

/// A single-file component split into its blocks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentBlocks {
    pub template: Option<Block>,
    pub script: Option<Block>,
    pub styles: Vec<Block>,
}

impl ComponentBlocks {
    pub fn parse(source: &str) -> std::result::Result<Self, String> {
        let mut blocks = ComponentBlocks::default();
        let mut cursor = 0usize;

        while let Some(caps) = BLOCK_OPEN_RE.captures_at(source, cursor) {
            let open = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((cursor, cursor));
            let tag = caps["tag"].to_lowercase();
            let attributes = parse_attributes(caps.name("attrs").map_or("", |m| m.as_str()));
            let line = line_of(source, open.0);

            let close_tag = format!("</{}>", tag);
            // Templates nest; the block runs to the last closing tag before the
            // next top-level block.
            let close = if tag == "template" {
                find_template_close(source, open.1)
            } else {
                find_ci(source, &close_tag, open.1)
            }
            .ok_or_else(|| format!("<{}> opened at line {} is never closed", tag, line))?;

            let block = Block {
                content: source[open.1..close].to_string(),
                attributes,
                line,
            };

            match tag.as_str() {
                "template" => {
                    if blocks.template.is_some() {
                        return Err(format!("second <template> block at line {}", line));
                    }
                    blocks.template = Some(block);
                }
                "script" => {
                    if blocks.script.is_some() {
                        return Err(format!("second <script> block at line {}", line));
                    }
                    blocks.script = Some(block);
                }
                _ => blocks.styles.push(block),
            }

            cursor = close + close_tag.len();
        }

        Ok(blocks)
    }

    /// Reject blocks written in a language the chains cannot process
    pub fn check_languages(&self) -> std::result::Result<(), String> {
        if let Some(script) = &self.script {
            match script.lang() {
                None | Some("js") | Some("javascript") => {}
                Some(other) => {
                    return Err(format!(
                        "unsupported script lang '{}' at line {}",
                        other, script.line
                    ));
                }
            }
        }
        for style in &self.styles {
            match style.lang() {
                None | Some("css") => {}
                Some(other) => {
                    return Err(format!(
                        "unsupported style lang '{}' at line {}",
                        other, style.line
                    ));
                }
            }
        }
        Ok(())
    }
}

fn parse_attributes(raw: &str) -> BTreeMap<String, String> {
    ATTRIBUTE_RE
        .captures_iter(raw)
        .map(|caps| {
            let value = caps
                .name("dq")
                .or_else(|| caps.name("sq"))
                .or_else(|| caps.name("bare"))
                .map_or(String::new(), |m| m.as_str().to_string());
            (caps["name"].to_lowercase(), value)
        })
        .collect()
}

fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    haystack[from..]
        .to_ascii_lowercase()
        .find(&needle.to_ascii_lowercase())
        .map(|i| i + from)
}

fn find_template_close(source: &str, from: usize) -> Option<usize> {
    let lower = source.to_ascii_lowercase();
    let mut depth = 1usize;
    let mut cursor = from;

    loop {
        let next_open = lower[cursor..].find("<template").map(|i| i + cursor);
        let next_close = lower[cursor..].find("</template>").map(|i| i + cursor)?;

        match next_open {
            Some(open) if open < next_close => {
                depth += 1;
                cursor = open + "<template".len();
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Some(next_close);
                }
                cursor = next_close + "</template>".len();
            }
        }
    }
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    const EDITOR: &str = r#"<template>
  <div class="editor">
    <template v-if="ready"><textarea v-model="text"></textarea></template>
  </div>
</template>

<script>
export default {
  props: { content: String },
  data() { return { text: this.content, ready: true }; }
};
</script>

<style scoped>
.editor { padding: theme('spacing.18'); }
</style>
<style>
textarea { user-select: none; }
</style>
"#;

    #[test]
    fn test_parse_blocks() {
        let blocks = ComponentBlocks::parse(EDITOR).unwrap();

        let template = blocks.template.unwrap();
        assert!(template.content.contains("<textarea v-model=\"text\"></textarea></template>"));
        assert!(template.content.trim_end().ends_with("</div>"));
        assert_eq!(template.line, 1);

        let script = blocks.script.unwrap();
        assert!(script.content.contains("export default"));
        assert!(!script.content.contains("<style"));
        assert_eq!(script.line, 7);

        assert_eq!(blocks.styles.len(), 2);
        assert!(blocks.styles[0].attributes.contains_key("scoped"));
        assert!(blocks.styles[1].content.contains("user-select"));
    }

    #[test]
    fn test_languages() {
        let blocks = ComponentBlocks::parse("<script lang=\"ts\">let a: number = 1;</script>").unwrap();
        assert_eq!(blocks.script.as_ref().unwrap().lang(), Some("ts"));
        assert!(blocks.check_languages().unwrap_err().contains("ts"));

        let blocks = ComponentBlocks::parse("<style lang='scss'>a { b { c: d } }</style>").unwrap();
        assert!(blocks.check_languages().is_err());

        let blocks = ComponentBlocks::parse("<script lang=\"js\"></script><style lang=\"css\"></style>").unwrap();
        assert!(blocks.check_languages().is_ok());
    }

    #[test]
    fn test_unclosed_block() {
        let err = ComponentBlocks::parse("<template>\n<div></div>\n\n<script>\nexport default {}\n").unwrap_err();
        assert!(err.contains("<template>"), "{}", err);
        assert!(err.contains("line 1"));
    }

    #[test]
    fn test_duplicate_script_block() {
        let err = ComponentBlocks::parse("<script></script>\n<script></script>").unwrap_err();
        assert!(err.contains("second <script>"));
    }
}
