//! Tree-sitter grammars and comment/text node collection.

use std::collections::HashMap;
use std::sync::Mutex;

use tree_sitter::{Language, Node, Parser};

use crate::extract::{Candidate, SpanKind};

/// Grammars bundled with the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grammar {
    JavaScript,
    TypeScript,
    Tsx,
    Python,
    Rust,
    Html,
}

impl Grammar {
    pub fn for_language(language_id: &str) -> Option<Self> {
        match language_id {
            "javascript" | "javascriptreact" => Some(Grammar::JavaScript),
            "typescript" => Some(Grammar::TypeScript),
            "typescriptreact" => Some(Grammar::Tsx),
            "python" => Some(Grammar::Python),
            "rust" => Some(Grammar::Rust),
            "html" => Some(Grammar::Html),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Grammar::JavaScript => "javascript",
            Grammar::TypeScript => "typescript",
            Grammar::Tsx => "tsx",
            Grammar::Python => "python",
            Grammar::Rust => "rust",
            Grammar::Html => "html",
        }
    }

    fn language(self) -> Language {
        match self {
            Grammar::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Grammar::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Grammar::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Grammar::Python => tree_sitter_python::LANGUAGE.into(),
            Grammar::Rust => tree_sitter_rust::LANGUAGE.into(),
            Grammar::Html => tree_sitter_html::LANGUAGE.into(),
        }
    }

    /// Markup text node kinds, collected as plain text.
    fn extra_kinds(self) -> &'static [&'static str] {
        match self {
            Grammar::Html => &["text"],
            _ => &[],
        }
    }
}

/// Memoized grammar loads. A grammar that fails to load stays unavailable
/// for the registry's lifetime.
#[derive(Default)]
pub struct GrammarRegistry {
    loaded: Mutex<HashMap<Grammar, Option<Language>>>,
}

impl GrammarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, grammar: Grammar) -> Option<Language> {
        let mut loaded = self.loaded.lock().unwrap_or_else(|e| e.into_inner());
        loaded
            .entry(grammar)
            .or_insert_with(|| {
                let language = grammar.language();
                let mut parser = Parser::new();
                match parser.set_language(&language) {
                    Ok(()) => Some(language),
                    Err(err) => {
                        tracing::warn!(grammar = grammar.name(), error = %err, "grammar unavailable");
                        None
                    }
                }
            })
            .clone()
    }

    pub fn is_loaded(&self, grammar: Grammar) -> bool {
        self.load(grammar).is_some()
    }
}

/// Byte ranges of qualifying nodes in document order. Returns nothing when
/// the grammar is unavailable or the text cannot be parsed.
pub fn collect_nodes(text: &str, grammar: Grammar, registry: &GrammarRegistry) -> Vec<Candidate> {
    let Some(language) = registry.load(grammar) else {
        return Vec::new();
    };
    let mut parser = Parser::new();
    if parser.set_language(&language).is_err() {
        return Vec::new();
    }
    let Some(tree) = parser.parse(text, None) else {
        return Vec::new();
    };
    let mut candidates = Vec::new();
    visit(tree.root_node(), text, grammar, &mut candidates);
    candidates
}

fn visit(node: Node, text: &str, grammar: Grammar, out: &mut Vec<Candidate>) {
    if grammar == Grammar::Html && is_script_or_style(node, text) {
        return;
    }
    if let Some(kind) = classify(node, text, grammar) {
        out.push(Candidate::new(node.start_byte(), node.end_byte(), kind));
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit(child, text, grammar, out);
    }
}

fn classify(node: Node, text: &str, grammar: Grammar) -> Option<SpanKind> {
    let kind = node.kind();
    if kind.contains("comment") {
        return Some(SpanKind::Comment);
    }
    if grammar.extra_kinds().contains(&kind) {
        return Some(SpanKind::Text);
    }
    (grammar == Grammar::Python && kind == "string" && is_triple_quoted(node_text(node, text)))
        .then_some(SpanKind::Comment)
}

fn is_script_or_style(node: Node, text: &str) -> bool {
    match node.kind() {
        "script_element" | "style_element" => true,
        "element" => {
            let mut cursor = node.walk();
            let tag = node
                .children(&mut cursor)
                .find(|child| child.kind() == "start_tag")
                .and_then(|start| {
                    let mut inner = start.walk();
                    let name = start
                        .children(&mut inner)
                        .find(|child| child.kind() == "tag_name");
                    name
                })
                .map(|name| node_text(name, text).to_ascii_lowercase());
            matches!(tag.as_deref(), Some("script" | "style"))
        }
        _ => false,
    }
}

fn node_text<'a>(node: Node, text: &'a str) -> &'a str {
    text.get(node.start_byte()..node.end_byte()).unwrap_or_default()
}

pub(crate) fn is_triple_quoted(raw: &str) -> bool {
    let body = raw.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    body.starts_with("\"\"\"") || body.starts_with("'''")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slices<'a>(text: &'a str, grammar: Grammar) -> Vec<&'a str> {
        let registry = GrammarRegistry::new();
        collect_nodes(text, grammar, &registry)
            .into_iter()
            .map(|candidate| &text[candidate.start..candidate.end])
            .collect()
    }

    #[test]
    fn maps_language_ids() {
        assert_eq!(Grammar::for_language("javascriptreact"), Some(Grammar::JavaScript));
        assert_eq!(Grammar::for_language("typescriptreact"), Some(Grammar::Tsx));
        assert_eq!(Grammar::for_language("latex"), None);
    }

    #[test]
    fn registry_memoizes_loads() {
        let registry = GrammarRegistry::new();
        assert!(registry.is_loaded(Grammar::Rust));
        assert!(registry.is_loaded(Grammar::Rust));
        assert_eq!(registry.loaded.lock().unwrap().len(), 1);
    }

    #[test]
    fn collects_javascript_comments() {
        let text = "// 最初のコメント\nconst s = \"// not a comment\";\n/* ブロック */\n";
        assert_eq!(
            slices(text, Grammar::JavaScript),
            vec!["// 最初のコメント", "/* ブロック */"]
        );
    }

    #[test]
    fn collects_python_docstrings_and_comments() {
        let text = "def f():\n    \"\"\"説明文です。\"\"\"\n    x = 'single'  # 注釈\n";
        assert_eq!(
            slices(text, Grammar::Python),
            vec!["\"\"\"説明文です。\"\"\"", "# 注釈"]
        );
    }

    #[test]
    fn html_skips_script_and_style_subtrees() {
        let text = "<p>本文です</p><script>var a = \"スクリプト\";</script><style>p{}</style><!-- 注記 -->";
        let found = slices(text, Grammar::Html);
        assert!(found.contains(&"本文です"));
        assert!(found.contains(&"<!-- 注記 -->"));
        assert!(!found.iter().any(|s| s.contains("スクリプト")));
    }
}
