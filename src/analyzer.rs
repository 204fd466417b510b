//! Lexical analysis of scripts and stylesheets.
//!
//! Nothing here builds an AST. The lexers walk the source once, tracking
//! strings, comments, template literals and regular expressions so that
//! delimiter balance can be checked and comments can be dropped before the
//! import/export patterns run.

use std::collections::HashSet;
use std::sync::LazyLock;
use regex::Regex;

/// `import x from "y"`, `import {a, b as c} from "y"`, `import "y"`
pub(crate) static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*import[ \t]*(?:(?P<clause>[\w$*{}\s,]+?)\s*from\s*)?["'](?P<src>[^"'\n]+)["'][ \t]*;?"#,
    )
    .expect("import pattern is valid")
});

/// `export * from "y"`, `export {a as b} from "y"`
pub(crate) static EXPORT_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*export[ \t]*(?P<clause>\*(?:\s*as\s+[\w$]+)?|\{[^}]*\})\s*from\s*["'](?P<src>[^"'\n]+)["'][ \t]*;?"#,
    )
    .expect("export-from pattern is valid")
});

/// `require("y")`
pub(crate) static REQUIRE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\brequire\s*\(\s*["'](?P<src>[^"'\n]+)["']\s*\)"#)
        .expect("require pattern is valid")
});

/// `@import "x.css";`, `@import url(x.css) screen;`
pub(crate) static CSS_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)@import\s+(?:url\(\s*["']?(?P<url>[^"')]+)["']?\s*\)|["'](?P<src>[^"']+)["'])(?P<media>[^;]*);"#,
    )
    .expect("css import pattern is valid")
});

const REGEX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "void", "delete", "throw", "new",
    "yield", "await", "instanceof",
];

/// Validate a script and return it with comments removed.
///
/// The diagnostic names the line of the offending token.
pub fn lex_script(code: &str) -> std::result::Result<String, String> {
    lex(code).map(|sink| sink.stripped)
}

/// Validate a script and return a copy of it, byte for byte the same length,
/// in which comments and the bodies of string, template and regular
/// expression literals are blanked. Quotes, `${`/`}` and line breaks stay put,
/// so offsets and line numbers found in the mask hold for the original.
pub fn mask_script(code: &str) -> std::result::Result<String, String> {
    lex(code).map(|sink| sink.masked)
}

/// Lexer output: the comment-free script and its literal mask
struct Sink {
    stripped: String,
    masked: String,
}

impl Sink {
    fn code(&mut self, c: char) {
        self.stripped.push(c);
        self.masked.push(c);
    }

    fn code_str(&mut self, s: &str) {
        self.stripped.push_str(s);
        self.masked.push_str(s);
    }

    fn literal(&mut self, c: char) {
        self.stripped.push(c);
        blank(&mut self.masked, c);
    }

    fn comment(&mut self, c: char) {
        blank(&mut self.masked, c);
    }
}

fn blank(masked: &mut String, c: char) {
    if c == '\n' {
        masked.push('\n');
    } else {
        masked.push_str(&" ".repeat(c.len_utf8()));
    }
}

fn lex(code: &str) -> std::result::Result<Sink, String> {
    let chars: Vec<char> = code.chars().collect();
    let len = chars.len();
    let mut out = Sink {
        stripped: String::with_capacity(code.len()),
        masked: String::with_capacity(code.len()),
    };
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    let mut prev: Option<char> = None;
    let mut prev_word = String::new();
    let mut i = 0usize;

    while i < len {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            '\n' => {
                line += 1;
                out.code('\n');
                i += 1;
            }
            c if c.is_whitespace() => {
                out.code(c);
                i += 1;
            }
            '/' if next == Some('/') => {
                while i < len && chars[i] != '\n' {
                    out.comment(chars[i]);
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                let start = line;
                out.comment('/');
                out.comment('*');
                i += 2;
                loop {
                    if i >= len {
                        return Err(format!("unterminated comment starting at line {}", start));
                    }
                    if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        out.comment('*');
                        out.comment('/');
                        i += 2;
                        break;
                    }
                    if chars[i] == '\n' {
                        line += 1;
                        out.stripped.push('\n');
                    }
                    out.comment(chars[i]);
                    i += 1;
                }
                out.stripped.push(' ');
            }
            '/' if regex_allowed(prev, &prev_word) => {
                let start = line;
                let mut in_class = false;
                out.code('/');
                i += 1;
                loop {
                    match chars.get(i) {
                        None | Some('\n') => {
                            return Err(format!(
                                "unterminated regular expression at line {}",
                                start
                            ));
                        }
                        Some('\\') => {
                            out.literal('\\');
                            if let Some(&escaped) = chars.get(i + 1) {
                                out.literal(escaped);
                            }
                            i += 2;
                        }
                        Some('[') => {
                            in_class = true;
                            out.literal('[');
                            i += 1;
                        }
                        Some(']') => {
                            in_class = false;
                            out.literal(']');
                            i += 1;
                        }
                        Some('/') if !in_class => {
                            out.code('/');
                            i += 1;
                            break;
                        }
                        Some(&other) => {
                            out.literal(other);
                            i += 1;
                        }
                    }
                }
                prev = Some(')');
                prev_word.clear();
            }
            '\'' | '"' => {
                let start = line;
                out.code(c);
                i += 1;
                loop {
                    match chars.get(i) {
                        None | Some('\n') => {
                            return Err(format!("unterminated string literal at line {}", start));
                        }
                        Some('\\') => {
                            out.literal('\\');
                            if let Some(&escaped) = chars.get(i + 1) {
                                if escaped == '\n' {
                                    line += 1;
                                }
                                out.literal(escaped);
                            }
                            i += 2;
                        }
                        Some(&quote) if quote == c => {
                            out.code(quote);
                            i += 1;
                            break;
                        }
                        Some(&other) => {
                            out.literal(other);
                            i += 1;
                        }
                    }
                }
                prev = Some('"');
                prev_word.clear();
            }
            '`' => {
                out.code('`');
                let start = line;
                let (next_i, in_expression) = scan_template(&chars, i + 1, &mut out, &mut line, start)?;
                i = next_i;
                if in_expression {
                    stack.push(('$', start));
                    prev = Some('{');
                } else {
                    prev = Some('"');
                }
                prev_word.clear();
            }
            '(' | '[' | '{' => {
                stack.push((c, line));
                out.code(c);
                prev = Some(c);
                prev_word.clear();
                i += 1;
            }
            ')' | ']' | '}' => {
                match stack.pop() {
                    Some(('$', start)) if c == '}' => {
                        out.code('}');
                        let (next_i, in_expression) = scan_template(&chars, i + 1, &mut out, &mut line, start)?;
                        i = next_i;
                        if in_expression {
                            stack.push(('$', start));
                            prev = Some('{');
                        } else {
                            prev = Some('"');
                        }
                        prev_word.clear();
                        continue;
                    }
                    Some((open, _)) if closes(open, c) => {}
                    Some(('$', start)) => {
                        return Err(format!(
                            "unexpected '{}' at line {} inside template expression opened at line {}",
                            c, line, start
                        ));
                    }
                    Some((open, start)) => {
                        return Err(format!(
                            "mismatched '{}' at line {}: '{}' opened at line {} is still open",
                            c, line, open, start
                        ));
                    }
                    None => {
                        return Err(format!("unexpected '{}' at line {}", c, line));
                    }
                }
                out.code(c);
                prev = Some(c);
                prev_word.clear();
                i += 1;
            }
            c if is_ident_char(c) => {
                let mut word = String::new();
                while i < len && is_ident_char(chars[i]) {
                    word.push(chars[i]);
                    i += 1;
                }
                out.code_str(&word);
                prev = word.chars().last();
                prev_word = word;
            }
            other => {
                out.code(other);
                prev = Some(other);
                prev_word.clear();
                i += 1;
            }
        }
    }

    if let Some((open, start)) = stack.pop() {
        return Err(if open == '$' {
            format!("unterminated template literal starting at line {}", start)
        } else {
            format!("unclosed '{}' opened at line {}", open, start)
        });
    }

    Ok(out)
}

/// Scan a template literal body. Returns the next index and whether the scan
/// stopped at a `${` expression rather than the closing backtick.
fn scan_template(
    chars: &[char],
    mut i: usize,
    out: &mut Sink,
    line: &mut usize,
    start: usize,
) -> std::result::Result<(usize, bool), String> {
    loop {
        match chars.get(i) {
            None => return Err(format!("unterminated template literal starting at line {}", start)),
            Some('\\') => {
                out.literal('\\');
                if let Some(&escaped) = chars.get(i + 1) {
                    if escaped == '\n' {
                        *line += 1;
                    }
                    out.literal(escaped);
                }
                i += 2;
            }
            Some('`') => {
                out.code('`');
                return Ok((i + 1, false));
            }
            Some('$') if chars.get(i + 1) == Some(&'{') => {
                out.code_str("${");
                return Ok((i + 2, true));
            }
            Some(&c) => {
                if c == '\n' {
                    *line += 1;
                }
                out.literal(c);
                i += 1;
            }
        }
    }
}

/// Validate a stylesheet and return it with comments removed.
pub fn lex_stylesheet(css: &str) -> std::result::Result<String, String> {
    let chars: Vec<char> = css.chars().collect();
    let len = chars.len();
    let mut out = String::with_capacity(css.len());
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < len {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                out.push('\n');
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let start = line;
                i += 2;
                loop {
                    if i >= len {
                        return Err(format!("unterminated comment starting at line {}", start));
                    }
                    if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        i += 2;
                        break;
                    }
                    if chars[i] == '\n' {
                        line += 1;
                        out.push('\n');
                    }
                    i += 1;
                }
            }
            '\'' | '"' => {
                let start = line;
                out.push(c);
                i += 1;
                loop {
                    match chars.get(i) {
                        None | Some('\n') => {
                            return Err(format!("unterminated string at line {}", start));
                        }
                        Some('\\') => {
                            out.push('\\');
                            if let Some(&escaped) = chars.get(i + 1) {
                                out.push(escaped);
                            }
                            i += 2;
                        }
                        Some(&quote) if quote == c => {
                            out.push(quote);
                            i += 1;
                            break;
                        }
                        Some(&other) => {
                            out.push(other);
                            i += 1;
                        }
                    }
                }
            }
            '{' | '(' | '[' => {
                stack.push((c, line));
                out.push(c);
                i += 1;
            }
            '}' | ')' | ']' => {
                match stack.pop() {
                    Some((open, _)) if closes(open, c) => {}
                    Some((open, start)) => {
                        return Err(format!(
                            "mismatched '{}' at line {}: '{}' opened at line {} is still open",
                            c, line, open, start
                        ));
                    }
                    None => return Err(format!("unexpected '{}' at line {}", c, line)),
                }
                out.push(c);
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    if let Some((open, start)) = stack.pop() {
        return Err(format!("unclosed '{}' opened at line {}", open, start));
    }

    Ok(out)
}

/// Statically declared dependency specifiers of a script, in source order
pub fn scan_script_imports(code: &str) -> Vec<String> {
    // Unlexable input is still scanned; the transform chain reports the error.
    let masked = mask_script(code).unwrap_or_else(|_| code.to_string());

    let mut found: Vec<(usize, String)> = Vec::new();
    for re in [&*IMPORT_RE, &*EXPORT_FROM_RE, &*REQUIRE_RE] {
        for caps in re.captures_iter(&masked) {
            if let Some(src) = caps.name("src") {
                found.push((src.start(), code[src.range()].to_string()));
            }
        }
    }
    found.sort_by_key(|(position, _)| *position);

    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter_map(|(_, specifier)| seen.insert(specifier.clone()).then_some(specifier))
        .collect()
}

fn regex_allowed(prev: Option<char>, prev_word: &str) -> bool {
    match prev {
        None => true,
        Some(c) if "(,=:[!&|?{};+-*%<>~^".contains(c) => true,
        Some(c) if is_ident_char(c) => REGEX_KEYWORDS.contains(&prev_word),
        _ => false,
    }
}

fn closes(open: char, close: char) -> bool {
    matches!((open, close), ('(', ')') | ('[', ']') | ('{', '}'))
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lex_script_strips_comments() {
        let code = "// header\nconst a = 1; /* block\ncomment */ const b = \"// not a comment\";\n";
        let lexed = lex_script(code).unwrap();
        assert!(!lexed.contains("header"));
        assert!(!lexed.contains("block"));
        assert!(lexed.contains("\"// not a comment\""));
        assert_eq!(lexed.lines().count(), code.lines().count());
    }

    #[test]
    fn test_lex_script_reports_unbalanced_delimiters() {
        let err = lex_script("function f() {\n  return (1;\n}\n").unwrap_err();
        assert!(err.contains("line 3"), "{}", err);

        let err = lex_script("let x = [1, 2;\n").unwrap_err();
        assert!(err.contains("unclosed '['"), "{}", err);

        let err = lex_script("}").unwrap_err();
        assert!(err.contains("unexpected '}' at line 1"));
    }

    #[test]
    fn test_lex_script_unterminated_literals() {
        assert!(lex_script("const s = 'abc;\n").unwrap_err().contains("string"));
        assert!(lex_script("const s = `abc").unwrap_err().contains("template"));
        assert!(lex_script("/* open").unwrap_err().contains("comment"));
    }

    #[test]
    fn test_lex_script_handles_templates_and_regexes() {
        let code = "const t = `a ${ {x: 1}.x } b ${`nested ${y}`}`;\nconst r = /[/}]+\\//g.test(t);\nconst d = a / b / c;\n";
        assert!(lex_script(code).is_ok());
    }

    #[test]
    fn test_lex_stylesheet() {
        assert!(lex_stylesheet(".a { color: red; } /* } */").is_ok());
        let err = lex_stylesheet(".a { color: red;\n.b { }\n").unwrap_err();
        assert!(err.contains("unclosed '{'"));
        assert!(lex_stylesheet(".a { content: \"}\" }").is_ok());
    }

    #[test]
    fn test_scan_script_imports() {
        let code = r#"
import css from "../css/app.css";
// import socket from "./socket"
import "phoenix_html";
import { Socket } from "phoenix";
import LiveSocket, {
  Hooks
} from 'phoenix_live_view';
export { format } from "./format";
const legacy = require("./legacy");
import "phoenix_html";
"#;
        assert_eq!(
            scan_script_imports(code),
            vec![
                "../css/app.css",
                "phoenix_html",
                "phoenix",
                "phoenix_live_view",
                "./format",
                "./legacy",
            ]
        );
    }

    #[test]
    fn test_scan_ignores_dynamic_imports_and_strings() {
        let code = "const lazy = import(\"./lazy\");\nconst s = 'import x from \"./nope\"';\n";
        assert!(scan_script_imports(code).is_empty());
    }

    #[test]
    fn test_scan_ignores_imports_inside_literals() {
        let code = "const help = \"call require('./plugin') to load a plugin\";\nconst doc = `\nimport x from \"./x\"\nexport * from './y'\n`;\nconst re = /require\\(\"\\.\\/z\"\\)/;\nimport { real } from \"./real\";\n";
        assert_eq!(scan_script_imports(code), vec!["./real"]);
    }

    #[test]
    fn test_scan_sees_requires_in_template_expressions() {
        let code = "const view = `<div>${require(\"./partial\").render()}</div>`;\n";
        assert_eq!(scan_script_imports(code), vec!["./partial"]);
    }

    #[test]
    fn test_mask_script_keeps_offsets() {
        let code = "const s = \"héllo\"; // note\nconst t = `a\nb ${c} d`;\n";
        let masked = mask_script(code).unwrap();
        assert_eq!(masked.len(), code.len());
        assert_eq!(masked.lines().count(), code.lines().count());
        assert!(masked.starts_with("const s = \"      \";"));
        assert!(!masked.contains("note"));
        assert!(masked.contains("${c}"));
        assert!(!masked.contains('d'));
    }

    #[test]
    fn test_css_import_pattern() {
        let css = "@import \"base.css\";\n@import url('theme.css') screen;\n";
        let specifiers: Vec<String> = CSS_IMPORT_RE
            .captures_iter(css)
            .map(|c| c.name("src").or_else(|| c.name("url")).unwrap().as_str().to_string())
            .collect();
        assert_eq!(specifiers, vec!["base.css", "theme.css"]);
    }
}
