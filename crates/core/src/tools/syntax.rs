//! # Syntax Checks
//!
//! Content-type detection and per-language syntax validation. Rust, JSON,
//! YAML and TOML go through their serde parsers; Python, the JavaScript
//! family and CSS go through tree-sitter grammars.

use serde::{Deserialize, Serialize};
use tree_sitter::{Language, Node, Parser};

/// Declared content type of an artifact, from its path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Jsx,
    Tsx,
    Json,
    Yaml,
    Toml,
    Html,
    Css,
    Markdown,
    Dockerfile,
    Text,
    Other,
}

impl ContentType {
    pub fn detect(path: &str) -> Self {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        if file_name == "Dockerfile" || file_name.starts_with("Dockerfile.") {
            return ContentType::Dockerfile;
        }
        let ext = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
            _ => return ContentType::Other,
        };
        match ext.as_str() {
            "rs" => ContentType::Rust,
            "py" => ContentType::Python,
            "js" | "mjs" | "cjs" => ContentType::JavaScript,
            "ts" | "mts" | "cts" => ContentType::TypeScript,
            "jsx" => ContentType::Jsx,
            "tsx" => ContentType::Tsx,
            "json" => ContentType::Json,
            "yaml" | "yml" => ContentType::Yaml,
            "toml" => ContentType::Toml,
            "html" | "htm" => ContentType::Html,
            "css" => ContentType::Css,
            "md" | "markdown" => ContentType::Markdown,
            "txt" | "cfg" | "ini" | "env" => ContentType::Text,
            _ => ContentType::Other,
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(
            self,
            ContentType::JavaScript | ContentType::TypeScript | ContentType::Jsx | ContentType::Tsx
        )
    }

    /// Data formats where long lines are normal
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            ContentType::Json | ContentType::Markdown | ContentType::Text | ContentType::Other
        )
    }
}

/// A syntax failure located in a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxFault {
    pub line: Option<u32>,
    pub message: String,
}

impl SyntaxFault {
    fn at(line: usize, message: impl Into<String>) -> Self {
        Self {
            line: Some(line as u32),
            message: message.into(),
        }
    }
}

/// Check `content` according to its type. Types without a checker pass.
pub fn check(content_type: ContentType, content: &str) -> Option<SyntaxFault> {
    match content_type {
        ContentType::Rust => check_rust(content),
        ContentType::Json => check_json(content),
        ContentType::Yaml => check_yaml(content),
        ContentType::Toml => check_toml(content),
        other => {
            let (language, label) = grammar(other)?;
            check_tree(language, label, content)
        }
    }
}

fn check_rust(content: &str) -> Option<SyntaxFault> {
    let err = syn::parse_file(content).err()?;
    let line = err.span().start().line;
    Some(SyntaxFault {
        line: (line > 0).then_some(line as u32),
        message: format!("Rust syntax error: {}", err),
    })
}

fn check_json(content: &str) -> Option<SyntaxFault> {
    let err = serde_json::from_str::<serde_json::Value>(content).err()?;
    Some(SyntaxFault {
        line: (err.line() > 0).then_some(err.line() as u32),
        message: format!("Invalid JSON: {}", strip_position(&err.to_string())),
    })
}

fn check_yaml(content: &str) -> Option<SyntaxFault> {
    use serde::Deserialize as _;
    for document in serde_yaml::Deserializer::from_str(content) {
        if let Err(err) = serde_yaml::Value::deserialize(document) {
            return Some(SyntaxFault {
                line: err.location().map(|l| l.line() as u32),
                message: format!("Invalid YAML: {}", strip_position(&err.to_string())),
            });
        }
    }
    None
}

fn check_toml(content: &str) -> Option<SyntaxFault> {
    let err = toml::from_str::<toml::Table>(content).err()?;
    let line = err
        .span()
        .map(|span| content[..span.start.min(content.len())].matches('\n').count() + 1);
    Some(SyntaxFault {
        line: line.map(|l| l as u32),
        message: format!("Invalid TOML: {}", err.message()),
    })
}

/// Drop serde's " at line X column Y" suffix so messages stay stable
fn strip_position(message: &str) -> String {
    match message.find(" at line ") {
        Some(idx) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

// ============================================================================
// Tree-sitter grammars
// ============================================================================

fn grammar(content_type: ContentType) -> Option<(Language, &'static str)> {
    let (language, label) = match content_type {
        ContentType::Python => (tree_sitter_python::LANGUAGE, "Python"),
        // The JavaScript grammar covers JSX
        ContentType::JavaScript | ContentType::Jsx => {
            (tree_sitter_javascript::LANGUAGE, "JavaScript")
        }
        ContentType::TypeScript => (tree_sitter_typescript::LANGUAGE_TYPESCRIPT, "TypeScript"),
        ContentType::Tsx => (tree_sitter_typescript::LANGUAGE_TSX, "TSX"),
        ContentType::Css => (tree_sitter_css::LANGUAGE, "CSS"),
        _ => return None,
    };
    Some((language.into(), label))
}

/// Parse with tree-sitter and report the first `ERROR` or `MISSING` node
fn check_tree(language: Language, label: &str, content: &str) -> Option<SyntaxFault> {
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&language) {
        tracing::warn!(language = label, error = %e, "Grammar unavailable; syntax check skipped");
        return None;
    }
    let tree = parser.parse(content, None)?;
    let fault = first_fault(tree.root_node())?;

    let message = if fault.is_missing() {
        format!("{} syntax error: missing '{}'", label, fault.kind())
    } else {
        let text = fault.utf8_text(content.as_bytes()).unwrap_or_default();
        let first_line = text.lines().next().unwrap_or_default().trim();
        let snippet: String = first_line.chars().take(40).collect();
        if snippet.is_empty() {
            format!("{} syntax error: unexpected end of input", label)
        } else {
            format!("{} syntax error near '{}'", label, snippet)
        }
    };
    Some(SyntaxFault::at(fault.start_position().row + 1, message))
}

/// Depth-first search in document order
fn first_fault(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_fault)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_content_type() {
        assert_eq!(ContentType::detect("src/main.rs"), ContentType::Rust);
        assert_eq!(ContentType::detect("web/App.TSX"), ContentType::Tsx);
        assert_eq!(ContentType::detect("Dockerfile"), ContentType::Dockerfile);
        assert_eq!(ContentType::detect(".gitignore"), ContentType::Other);
        assert_eq!(ContentType::detect("docker-compose.yml"), ContentType::Yaml);
    }

    #[test]
    fn test_json_error_has_line() {
        let fault = check(ContentType::Json, "{\n  \"a\": 1,\n  \"b\": \n}").unwrap();
        assert_eq!(fault.line, Some(4));
        assert!(fault.message.starts_with("Invalid JSON"));
        assert!(!fault.message.contains(" at line "));
        assert!(check(ContentType::Json, "{\"ok\": true}").is_none());
    }

    #[test]
    fn test_yaml_and_toml() {
        assert!(check(ContentType::Yaml, "a: 1\nb: [1, 2\n").is_some());
        assert!(check(ContentType::Yaml, "a: 1\n---\nb: 2\n").is_none());
        assert!(check(ContentType::Toml, "[package]\nname = \"x\"\n").is_none());
        let fault = check(ContentType::Toml, "[package]\nname = \n").unwrap();
        assert_eq!(fault.line, Some(2));
    }

    #[test]
    fn test_rust_syntax() {
        assert!(check(ContentType::Rust, "fn main() { println!(\"hi\"); }").is_none());
        let fault = check(ContentType::Rust, "fn main() {\n    let x = ;\n}").unwrap();
        assert_eq!(fault.line, Some(2));
    }

    #[test]
    fn test_script_syntax() {
        let ok = "const s = '}'; // {\n/* ( */ const r = /[)]/g;\nconst t = `${a + {b: 1}.b}`;\n";
        assert!(check(ContentType::JavaScript, ok).is_none());

        let fault = check(ContentType::JavaScript, "let ok = 1;\nlet x = (1 + ;\n").unwrap();
        assert_eq!(fault.line, Some(2));
        assert!(fault.message.starts_with("JavaScript syntax error"));
    }

    #[test]
    fn test_regex_literal_with_brackets() {
        let src = "export function hasParen(s) {\n  return /[(]/.test(s);\n}\n";
        assert!(check(ContentType::JavaScript, src).is_none());
    }

    #[test]
    fn test_jsx_text_is_not_code() {
        let src = "export default function App() {\n  return <p>Step 1) open the app</p>;\n}\n";
        assert!(check(ContentType::Jsx, src).is_none());
        let src = "export default function App() {\n  return (\n    <p>Don't panic</p>\n  );\n}\n";
        assert!(check(ContentType::Jsx, src).is_none());

        let bad = "export const App = () => <div>;\n";
        assert!(check(ContentType::Jsx, bad).is_some());
    }

    #[test]
    fn test_typescript_and_tsx() {
        let ts = "interface User { id: number }\nexport const f = (u: User): number => u.id;\n";
        assert!(check(ContentType::TypeScript, ts).is_none());
        let tsx = "type P = { name: string };\nexport const Hi = ({ name }: P) => <b>{name}</b>;\n";
        assert!(check(ContentType::Tsx, tsx).is_none());

        assert!(check(ContentType::TypeScript, "let a = 1;\nif (a) {\n  a++;\n").is_some());
    }

    #[test]
    fn test_python_checks() {
        let ok = "def f(a: int,\n      b: str) -> int:\n    if a: return 1\n    s = \"\"\"\n  ( unbalanced\n\"\"\"\n    return {'k': a}[\"k\"]  # (\n";
        assert!(check(ContentType::Python, ok).is_none());
        assert!(check(ContentType::Python, "while (n := next(it)):\n    pass\n").is_none());

        let fault = check(ContentType::Python, "def f()\n    return 1\n").unwrap();
        assert!(fault.message.starts_with("Python syntax error"));
        assert!(check(ContentType::Python, "print((1, 2)\n").is_some());
    }

    #[test]
    fn test_css() {
        assert!(check(ContentType::Css, "body { margin: 0; }\n").is_none());
        assert!(check(ContentType::Css, "body { margin: 0;\n").is_some());
    }
}
