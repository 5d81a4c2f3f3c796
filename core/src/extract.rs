//! Extraction of analysable Japanese spans from host-language documents.
//!
//! Prose documents are analysed whole. Markup, LaTeX and source files yield
//! candidate spans (comments, docstrings, text nodes) from either a
//! tree-sitter parse or regular expressions; both paths feed the same
//! sanitizer and Japanese-density filter, so a segment's text is always an
//! exact substring of the document starting at its offset.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::grammar::{self, Grammar, GrammarRegistry};

/// Analysable span of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    /// Byte offset of `text` within the document.
    pub offset: usize,
}

/// Regex pattern sets, one per comment syntax family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegexFamily {
    CStyle,
    Hash,
    Python,
    Html,
    Latex,
}

impl RegexFamily {
    pub fn for_language(language_id: &str) -> Option<Self> {
        match language_id {
            "javascript" | "javascriptreact" | "typescript" | "typescriptreact" | "rust" | "c"
            | "cpp" | "csharp" | "java" | "go" | "swift" | "kotlin" | "php" | "dart" | "scala" => {
                Some(RegexFamily::CStyle)
            }
            "ruby" | "shellscript" | "perl" | "r" | "yaml" | "toml" => Some(RegexFamily::Hash),
            "python" => Some(RegexFamily::Python),
            "html" => Some(RegexFamily::Html),
            "latex" => Some(RegexFamily::Latex),
            _ => None,
        }
    }
}

/// Whether a candidate still carries comment or docstring markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Comment,
    Text,
}

/// Byte range proposed for analysis, before sanitization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub start: usize,
    pub end: usize,
    pub kind: SpanKind,
}

impl Candidate {
    pub fn new(start: usize, end: usize, kind: SpanKind) -> Self {
        Self { start, end, kind }
    }
}

/// How a document is turned into candidate spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    WholeDocument,
    Ast(Grammar),
    Regex(RegexFamily),
}

pub const PROSE_LANGUAGES: [&str; 3] = ["plaintext", "markdown", "japanese"];

/// Pick a strategy for `language_id`, preferring a loadable grammar.
pub fn select_strategy(language_id: &str, grammars: &GrammarRegistry) -> Strategy {
    if PROSE_LANGUAGES.contains(&language_id) {
        return Strategy::WholeDocument;
    }
    if let Some(grammar) = Grammar::for_language(language_id) {
        if grammars.is_loaded(grammar) {
            return Strategy::Ast(grammar);
        }
    }
    match RegexFamily::for_language(language_id) {
        Some(family) => Strategy::Regex(family),
        None => Strategy::WholeDocument,
    }
}

pub fn extract(
    text: &str,
    language_id: &str,
    min_japanese_ratio: f32,
    grammars: &GrammarRegistry,
) -> Vec<Segment> {
    let strategy = select_strategy(language_id, grammars);
    let segments = extract_with(text, strategy, min_japanese_ratio, grammars);
    tracing::debug!(language_id, ?strategy, segments = segments.len(), "extracted segments");
    segments
}

pub fn extract_with(
    text: &str,
    strategy: Strategy,
    min_japanese_ratio: f32,
    grammars: &GrammarRegistry,
) -> Vec<Segment> {
    let candidates = match strategy {
        Strategy::WholeDocument => {
            return vec![Segment {
                text: text.to_string(),
                offset: 0,
            }];
        }
        Strategy::Ast(grammar) => grammar::collect_nodes(text, grammar, grammars),
        Strategy::Regex(family) => regex_candidates(text, family),
    };
    candidates
        .into_iter()
        .filter_map(|candidate| {
            let raw = text.get(candidate.start..candidate.end)?;
            let (from, to) = match candidate.kind {
                SpanKind::Comment => sanitize(raw)?,
                SpanKind::Text => trim_text(raw)?,
            };
            let body = &raw[from..to];
            (japanese_ratio(body) >= min_japanese_ratio).then(|| Segment {
                text: body.to_string(),
                offset: candidate.start + from,
            })
        })
        .collect()
}

/// Strip comment markers and surrounding whitespace. Returns the retained
/// byte range within `raw`, or `None` when nothing is left.
pub fn sanitize(raw: &str) -> Option<(usize, usize)> {
    let (mut start, mut end) = strip_markers(raw);
    let trimmed = trim_range(raw, start, end);
    start = trimmed.0;
    end = trimmed.1;
    let body = &raw[start..end];
    if let Some(first_line) = body.lines().next() {
        if !first_line.is_empty() && first_line.chars().all(|c| c == '*') {
            let skip = body.find('\n').map(|idx| idx + 1).unwrap_or(body.len());
            (start, end) = trim_range(raw, start + skip, end);
        }
    }
    (start < end).then_some((start, end))
}

/// Text nodes and prose runs have no markers; only whitespace is dropped.
fn trim_text(raw: &str) -> Option<(usize, usize)> {
    let (start, end) = trim_range(raw, 0, raw.len());
    (start < end).then_some((start, end))
}

fn strip_markers(raw: &str) -> (usize, usize) {
    let len = raw.len();
    if raw.starts_with("<!--") {
        let end = if raw.ends_with("-->") && len >= 7 { len - 3 } else { len };
        return (4, end);
    }
    if raw.starts_with("/*") {
        let start = 2 + raw[2..].len() - raw[2..].trim_start_matches(['*', '!']).len();
        let mut end = len;
        if raw.ends_with("*/") && len >= start + 2 {
            end = len - 2;
            end = start + raw[start..end].trim_end_matches('*').len();
        }
        return (start, end.max(start));
    }
    if raw.starts_with("//") {
        let rest = raw.trim_start_matches('/');
        let rest = rest.strip_prefix('!').unwrap_or(rest);
        return (len - rest.len(), len);
    }
    if raw.starts_with('#') {
        return (len - raw.trim_start_matches('#').len(), len);
    }
    if raw.starts_with('%') {
        return (len - raw.trim_start_matches('%').len(), len);
    }
    if grammar::is_triple_quoted(raw) {
        let prefix = len - raw.trim_start_matches(|c: char| c.is_ascii_alphabetic()).len();
        let quote = &raw[prefix..prefix + 3];
        let start = prefix + 3;
        let end = if len >= start + 3 && raw.ends_with(quote) {
            len - 3
        } else {
            len
        };
        return (start, end);
    }
    (0, len)
}

fn trim_range(raw: &str, start: usize, end: usize) -> (usize, usize) {
    let slice = &raw[start..end];
    let leading = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    (start + leading, start + leading + trimmed.len())
}

fn is_japanese(c: char) -> bool {
    matches!(
        c,
        '\u{3000}'..='\u{303F}'
            | '\u{3040}'..='\u{309F}'
            | '\u{30A0}'..='\u{30FF}'
            | '\u{3400}'..='\u{4DBF}'
            | '\u{4E00}'..='\u{9FFF}'
            | '\u{FF66}'..='\u{FF9F}'
    )
}

/// Share of non-whitespace grapheme clusters that are Japanese.
pub fn japanese_ratio(text: &str) -> f32 {
    let mut total = 0usize;
    let mut japanese = 0usize;
    for grapheme in text.graphemes(true) {
        let Some(first) = grapheme.chars().next() else {
            continue;
        };
        if first.is_whitespace() {
            continue;
        }
        total += 1;
        if is_japanese(first) {
            japanese += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        japanese as f32 / total as f32
    }
}

// Alternations are scanned leftmost-first, so a marker inside an earlier
// comment never starts a candidate of its own.
static COMMENT_C: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/|//[^\n]*").expect("static regex"));
static COMMENT_HASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"#[^\n]*").expect("static regex"));
static COMMENT_PYTHON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)[rRuUbBfF]{0,2}""".*?"""|[rRuUbBfF]{0,2}'''.*?'''|#[^\n]*"#)
        .expect("static regex")
});
static HTML_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("static regex"));
static HTML_RAW_ELEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>").expect("static regex")
});
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex"));
static LATEX_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)(?:^|[^\\])(?:\\\\)*(%[^\n]*)").expect("static regex"));
static LATEX_MATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\$\$.*?\$\$|\$[^$]*\$|\\\[.*?\\\]|\\\(.*?\\\)").expect("static regex")
});
static LATEX_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\[A-Za-z@]+\*?|\\.|[{}]").expect("static regex"));
static UNMASKED_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\x00]+").expect("static regex"));

/// Candidate byte ranges for the regex strategy, in document order.
pub fn regex_candidates(text: &str, family: RegexFamily) -> Vec<Candidate> {
    use SpanKind::{Comment, Text};
    match family {
        RegexFamily::CStyle => matches(text, &COMMENT_C, Comment),
        RegexFamily::Hash => matches(text, &COMMENT_HASH, Comment),
        RegexFamily::Python => matches(text, &COMMENT_PYTHON, Comment),
        RegexFamily::Html => {
            let comments = matches(text, &HTML_COMMENT, Comment);
            let masked = mask(text, &[&HTML_COMMENT, &HTML_RAW_ELEMENT, &HTML_TAG]);
            merge(comments, matches(&masked, &UNMASKED_RUN, Text))
        }
        RegexFamily::Latex => {
            let comments: Vec<Candidate> = LATEX_COMMENT
                .captures_iter(text)
                .filter_map(|caps| caps.get(1))
                .map(|m| Candidate::new(m.start(), m.end(), Comment))
                .collect();
            let mut masked = mask_ranges(text, &comments);
            masked = mask(&masked, &[&LATEX_MATH, &LATEX_COMMAND]);
            merge(comments, matches(&masked, &UNMASKED_RUN, Text))
        }
    }
}

fn matches(text: &str, pattern: &Regex, kind: SpanKind) -> Vec<Candidate> {
    pattern
        .find_iter(text)
        .map(|m| Candidate::new(m.start(), m.end(), kind))
        .collect()
}

/// Combine two candidate lists, keeping the earliest of any overlapping ranges.
fn merge(mut left: Vec<Candidate>, right: Vec<Candidate>) -> Vec<Candidate> {
    left.extend(right);
    left.sort_by_key(|c| (c.start, std::cmp::Reverse(c.end)));
    drop_overlaps(left)
}

fn drop_overlaps(sorted: Vec<Candidate>) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::with_capacity(sorted.len());
    for candidate in sorted {
        if kept.last().is_some_and(|last| candidate.start < last.end) {
            continue;
        }
        kept.push(candidate);
    }
    kept
}

fn mask(text: &str, patterns: &[&Regex]) -> String {
    let mut masked = text.to_string();
    for pattern in patterns {
        let ranges = matches(&masked, pattern, SpanKind::Text);
        masked = mask_ranges(&masked, &ranges);
    }
    masked
}

/// Replace every byte in `ranges` with NUL, keeping offsets stable.
fn mask_ranges(text: &str, ranges: &[Candidate]) -> String {
    let mut bytes = text.as_bytes().to_vec();
    for range in ranges {
        bytes[range.start..range.end].fill(0);
    }
    String::from_utf8(bytes).unwrap_or_default()
}

/// Editor language id for a file path, from its extension.
pub fn language_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let id = match ext.as_str() {
        "txt" => "plaintext",
        "md" | "markdown" | "mdx" => "markdown",
        "html" | "htm" => "html",
        "tex" | "sty" | "cls" => "latex",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "py" | "pyi" => "python",
        "rs" => "rust",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "cpp",
        "cs" => "csharp",
        "java" => "java",
        "go" => "go",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "php" => "php",
        "dart" => "dart",
        "scala" => "scala",
        "rb" => "ruby",
        "sh" | "bash" | "zsh" => "shellscript",
        "pl" | "pm" => "perl",
        "r" => "r",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        _ => return None,
    };
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str, strategy: Strategy) -> Vec<Segment> {
        extract_with(text, strategy, 0.1, &GrammarRegistry::new())
    }

    fn assert_anchored(text: &str, segments: &[Segment]) {
        for segment in segments {
            assert_eq!(
                &text[segment.offset..segment.offset + segment.text.len()],
                segment.text
            );
        }
    }

    #[test]
    fn prose_is_a_single_segment() {
        let registry = GrammarRegistry::new();
        let text = "  本文です。\n";
        let segments = extract(text, "markdown", 0.1, &registry);
        assert_eq!(
            segments,
            vec![Segment {
                text: text.into(),
                offset: 0
            }]
        );
    }

    #[test]
    fn unknown_language_falls_back_to_whole_document() {
        let registry = GrammarRegistry::new();
        assert_eq!(select_strategy("cobol", &registry), Strategy::WholeDocument);
        assert_eq!(extract("abc", "cobol", 0.1, &registry).len(), 1);
    }

    #[test]
    fn prefers_ast_when_grammar_loads() {
        let registry = GrammarRegistry::new();
        assert_eq!(
            select_strategy("python", &registry),
            Strategy::Ast(Grammar::Python)
        );
        assert_eq!(
            select_strategy("java", &registry),
            Strategy::Regex(RegexFamily::CStyle)
        );
        assert_eq!(
            select_strategy("latex", &registry),
            Strategy::Regex(RegexFamily::Latex)
        );
    }

    #[test]
    fn sanitizes_markers() {
        let check = |raw: &str, expected: &str| {
            let (start, end) = sanitize(raw).unwrap();
            assert_eq!(&raw[start..end], expected, "raw: {raw:?}");
        };
        check("// コメント", "コメント");
        check("/// ドキュメント", "ドキュメント");
        check("//! モジュール", "モジュール");
        check("# 注釈", "注釈");
        check("% 注釈", "注釈");
        check("/** 説明 */", "説明");
        check("/*****\n * 一行目\n */", "* 一行目");
        check("<!-- 注記 -->", "注記");
        check("\"\"\"\n  説明文\n\"\"\"", "説明文");
        check("r'''生文字列'''", "生文字列");
        assert_eq!(sanitize("//   "), None);
        assert_eq!(sanitize("/* */"), None);
    }

    #[test]
    fn ratio_counts_japanese_graphemes() {
        assert_eq!(japanese_ratio(""), 0.0);
        assert_eq!(japanese_ratio("   "), 0.0);
        assert_eq!(japanese_ratio("日本語"), 1.0);
        assert!((japanese_ratio("ab日本") - 0.5).abs() < f32::EPSILON);
        assert!((japanese_ratio("a b 日 本") - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn ratio_filter_drops_english_comments() {
        let text = "// English only\n// 日本語のコメント\nlet x = 1;\n";
        let segments = run(text, Strategy::Regex(RegexFamily::CStyle));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "日本語のコメント");
        assert_anchored(text, &segments);
    }

    #[test]
    fn retained_segments_survive_reextraction() {
        let text = "/* 設定値 config を読み込む */\n// mostly english コメント text\n";
        let segments = run(text, Strategy::Regex(RegexFamily::CStyle));
        assert!(!segments.is_empty());
        for segment in segments {
            let (start, end) = sanitize(&segment.text).unwrap();
            assert_eq!(&segment.text[start..end], segment.text);
            assert!(japanese_ratio(&segment.text) >= 0.1);
        }
    }

    #[test]
    fn block_comment_swallows_nested_line_markers() {
        let text = "/* 説明 // 続き */ x(); // 行末の注釈";
        let segments = run(text, Strategy::Regex(RegexFamily::CStyle));
        let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["説明 // 続き", "行末の注釈"]);
        assert_anchored(text, &segments);
    }

    #[test]
    fn python_regex_finds_docstrings_and_comments() {
        let text = "def f():\n    \"\"\"関数の説明。\"\"\"\n    return 1  # 戻り値\n";
        let segments = run(text, Strategy::Regex(RegexFamily::Python));
        let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["関数の説明。", "戻り値"]);
        assert_anchored(text, &segments);
    }

    #[test]
    fn ast_and_regex_agree_on_simple_sources() {
        let text = "// 最初の説明\nfunction f() {\n  /* 処理の本体 */\n  return 1;\n}\n";
        let ast = run(text, Strategy::Ast(Grammar::JavaScript));
        let regex = run(text, Strategy::Regex(RegexFamily::CStyle));
        assert_eq!(ast, regex);
        assert_eq!(ast.len(), 2);
        assert_anchored(text, &ast);

        let text = "x = 1  # 値の設定\ndef g():\n    '''説明'''\n";
        let ast = run(text, Strategy::Ast(Grammar::Python));
        let regex = run(text, Strategy::Regex(RegexFamily::Python));
        assert_eq!(ast, regex);
    }

    #[test]
    fn html_regex_skips_scripts_tags_and_styles() {
        let text = "<html><body>\n<p class=\"説明\">本文です。</p>\n<script>let s = \"スクリプト\";</script>\n<style>p { content: \"スタイル\"; }</style>\n<!-- 注記です -->\n</body></html>";
        let segments = run(text, Strategy::Regex(RegexFamily::Html));
        let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["本文です。", "注記です"]);
        assert_anchored(text, &segments);
    }

    #[test]
    fn html_ast_matches_regex_for_text_nodes() {
        let text = "<p>本文です。</p><script>var s = \"スクリプト\";</script><!-- 注記です -->";
        let ast = run(text, Strategy::Ast(Grammar::Html));
        let regex = run(text, Strategy::Regex(RegexFamily::Html));
        assert_eq!(ast, regex);
    }

    #[test]
    fn latex_extracts_prose_outside_commands_and_math() {
        let text = "\\section{はじめに}\n本稿では$x^2$を扱う。\\\\\n% 注釈です\n100\\% 正しい";
        let segments = run(text, Strategy::Regex(RegexFamily::Latex));
        let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["はじめに", "本稿では", "を扱う。", "注釈です", "正しい"]);
        assert_anchored(text, &segments);
    }

    #[test]
    fn html_text_keeps_marker_like_prefixes() {
        let text = "<p>#1 今日の予定です。</p>\n<p>// 注意してください。</p>\n<!-- # 注記です -->";
        let expected = vec!["#1 今日の予定です。", "// 注意してください。", "# 注記です"];
        for strategy in [
            Strategy::Regex(RegexFamily::Html),
            Strategy::Ast(Grammar::Html),
        ] {
            let segments = run(text, strategy);
            let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
            assert_eq!(texts, expected, "{strategy:?}");
            assert_anchored(text, &segments);
        }
    }

    #[test]
    fn latex_prose_keeps_marker_like_prefixes() {
        let text = "\\textbf{注}#1 番目の項目です。\n";
        let segments = run(text, Strategy::Regex(RegexFamily::Latex));
        let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["注", "#1 番目の項目です。"]);
        assert_anchored(text, &segments);
    }

    #[test]
    fn latex_comment_after_escaped_backslash() {
        let text = "改行\\\\% 行末の注釈\n100\\% 正しい\n";
        let segments = run(text, Strategy::Regex(RegexFamily::Latex));
        let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["改行", "行末の注釈", "正しい"]);
        assert_anchored(text, &segments);
    }

    #[test]
    fn maps_extensions_to_language_ids() {
        assert_eq!(language_for_path(Path::new("a/b.tsx")), Some("typescriptreact"));
        assert_eq!(language_for_path(Path::new("README.md")), Some("markdown"));
        assert_eq!(language_for_path(Path::new("paper.TEX")), Some("latex"));
        assert_eq!(language_for_path(Path::new("binary.bin")), None);
    }
}
