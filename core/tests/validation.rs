use std::sync::Arc;

use kotoba_core::{
    AnalysisContext, Analyzer, Config, DocumentReport, MorphBackend, Morpheme, Position, Result,
    RuleCode, Severity,
};

/// Longest-match tokenizer over a fixed IPADIC-style lexicon. Characters not
/// in the lexicon become single-character tokens.
struct Lexicon(&'static [(&'static str, &'static [&'static str])]);

impl MorphBackend for Lexicon {
    fn name(&self) -> &'static str {
        "lexicon"
    }

    fn analyze(&self, text: &str) -> Result<Vec<Morpheme>> {
        let mut out = Vec::new();
        let mut rest = text;
        while let Some(ch) = rest.chars().next() {
            let hit = self
                .0
                .iter()
                .filter(|(surface, _)| rest.starts_with(surface))
                .max_by_key(|(surface, _)| surface.len());
            let (surface, features): (&str, &[&str]) = match hit {
                Some(&(surface, features)) => (surface, features),
                None if ch.is_whitespace() || ch.is_ascii_punctuation() => {
                    (&rest[..ch.len_utf8()], SYMBOL)
                }
                None => (&rest[..ch.len_utf8()], NOUN),
            };
            out.push(Morpheme::from_ipadic(surface, features));
            rest = &rest[surface.len()..];
        }
        Ok(out)
    }
}

const SYMBOL: &[&str] = &["記号", "一般"];
const NOUN: &[&str] = &["名詞", "一般"];

const ENTRIES: &[(&str, &[&str])] = &[
    ("これ", &["名詞", "代名詞", "一般"]),
    ("は", &["助詞", "係助詞"]),
    ("を", &["助詞", "格助詞", "一般"]),
    ("に", &["助詞", "格助詞", "一般"]),
    ("が", &["助詞", "接続助詞", "*", "*", "*", "*", "が"]),
    ("、", &["記号", "読点"]),
    ("。", &["記号", "句点"]),
    ("\n", &["記号", "一般"]),
    ("とても", &["副詞", "助詞類接続"]),
    ("すごく", &["形容詞", "自立", "*", "*", "形容詞・アウオ段", "連用テ接続", "すごい"]),
    ("非常", &["名詞", "形容動詞語幹"]),
    ("良い", &["形容詞", "自立", "*", "*", "形容詞・アウオ段", "基本形", "良い"]),
    ("本", &["名詞", "一般"]),
    ("読む", &["動詞", "自立", "*", "*", "五段・マ行", "基本形", "読む"]),
    ("見", &["動詞", "自立", "*", "*", "一段", "未然形", "見る"]),
    ("れる", &["動詞", "接尾", "*", "*", "一段", "基本形", "れる"]),
    ("来れる", &["動詞", "自立", "*", "*", "一段", "基本形", "来れる"]),
    ("しかし", &["接続詞", "*"]),
    ("雨", &["名詞", "一般"]),
    ("だ", &["助動詞", "*", "*", "*", "特殊・ダ", "基本形", "だ"]),
    ("晴れ", &["動詞", "自立", "*", "*", "一段", "連用形", "晴れる"]),
    ("た", &["助動詞", "*", "*", "*", "特殊・タ", "基本形", "た"]),
    ("行く", &["動詞", "自立", "*", "*", "五段・カ行促音便", "基本形", "行く"]),
    ("けど", &["助詞", "接続助詞", "*", "*", "*", "*", "けど"]),
];

fn analyzer_with(config: Config) -> Analyzer {
    let context = AnalysisContext::with_backend(Box::new(Lexicon(ENTRIES)));
    Analyzer::new(config, Arc::new(context))
}

fn check(text: &str, language_id: &str) -> DocumentReport {
    analyzer_with(Config::default())
        .check(text, language_id)
        .unwrap()
}

fn codes(report: &DocumentReport) -> Vec<RuleCode> {
    report.diagnostics.iter().map(|d| d.diagnostic.code).collect()
}

fn assert_spans_index_document(text: &str, report: &DocumentReport) {
    for d in &report.diagnostics {
        let (start, end) = d.diagnostic.span;
        let slice = text
            .get(start..end)
            .unwrap_or_else(|| panic!("span {start}..{end} outside document"));
        assert_eq!(slice.trim(), d.diagnostic.snippet);
        assert_eq!(kotoba_core::position::to_offset(text, d.range.start), start);
        assert_eq!(kotoba_core::position::to_offset(text, d.range.end), end);
    }
}

#[test]
fn flags_comma_heavy_sentence_in_prose() {
    let text = "これは、とても、すごく、非常に、良い。";
    let report = check(text, "markdown");
    assert_eq!(codes(&report), vec![RuleCode::CommaLimit]);
    let d = &report.diagnostics[0];
    assert_eq!(d.source, "kotoba");
    assert_eq!(d.diagnostic.severity, Severity::Warning);
    assert_eq!(d.range.start, Position::new(0, 0));
    assert_eq!(d.range.end, Position::new(0, 19));
    assert_eq!(report.segment_count, 1);
    assert_eq!(report.code_counts.get(&RuleCode::CommaLimit), Some(&1));
    assert_spans_index_document(text, &report);
}

#[test]
fn raising_the_comma_limit_silences_the_rule() {
    let mut config = Config::default();
    config.rules.comma_limit_max = 4;
    let report = analyzer_with(config)
        .check("これは、とても、すごく、非常に、良い。", "plaintext")
        .unwrap();
    assert!(report.diagnostics.is_empty());
}

#[test]
fn docstring_diagnostics_are_anchored_in_the_source_file() {
    let text = "def f():\n    \"\"\"これを見れる。\"\"\"\n    return 1\n";
    let report = check(text, "python");
    assert_eq!(codes(&report), vec![RuleCode::RaDropping]);
    let d = &report.diagnostics[0];
    assert_eq!(d.range.start, Position::new(1, 10));
    assert_eq!(d.range.end, Position::new(1, 13));
    assert_eq!(d.diagnostic.snippet, "見れる");
    assert_spans_index_document(text, &report);
}

#[test]
fn each_comment_is_checked_separately() {
    let text = "// 来れる\nfn main() {}\n/* 本をを読む。 */\n";
    let report = check(text, "rust");
    assert_eq!(report.segment_count, 2);
    assert_eq!(
        codes(&report),
        vec![
            RuleCode::RaDropping,
            RuleCode::DuplicateParticle,
            RuleCode::AdjacentParticles
        ]
    );
    let lines: Vec<u32> = report.diagnostics.iter().map(|d| d.range.start.line).collect();
    assert_eq!(lines, vec![0, 2, 2]);
    assert_spans_index_document(text, &report);
}

#[test]
fn english_comments_produce_nothing() {
    let text = "// Load the config\nconst x = 1; /* TODO: refactor */\n";
    let report = check(text, "javascript");
    assert_eq!(report.segment_count, 0);
    assert!(report.diagnostics.is_empty());
}

#[test]
fn regex_languages_are_analysed_too() {
    let text = "# しかし雨だ。しかし晴れた。\nputs 1\n";
    let report = check(text, "ruby");
    assert_eq!(codes(&report), vec![RuleCode::ConjunctionRepeat]);
    assert_spans_index_document(text, &report);
}

#[test]
fn conjunctions_on_separate_lines_are_not_repeats() {
    let report = check("しかし雨だ。\nしかし晴れた。", "plaintext");
    assert!(report.diagnostics.is_empty());
}

#[test]
fn counts_every_repeat_past_the_first() {
    let report = check("本ををを読む。", "plaintext");
    assert_eq!(report.code_counts.get(&RuleCode::DuplicateParticle), Some(&2));
    assert_eq!(report.code_counts.get(&RuleCode::AdjacentParticles), Some(&2));
}

#[test]
fn adversative_ga_counts_per_sentence() {
    let report = check("雨だが本に行くが、晴れた。雨だが行く。", "plaintext");
    assert_eq!(codes(&report), vec![RuleCode::AdversativeGa]);
    assert_eq!(report.diagnostics[0].diagnostic.snippet, "雨だが本に行くが、晴れた。");
}

#[test]
fn severity_floor_filters_warnings() {
    let config = Config {
        min_severity: Severity::Error,
        ..Config::default()
    };
    let report = analyzer_with(config).check("来れる。", "plaintext").unwrap();
    assert!(report.diagnostics.is_empty());
}

#[test]
fn disabled_rules_do_not_report() {
    let mut config = Config::default();
    config.rules.ra_dropping = false;
    let report = analyzer_with(config).check("来れる。", "plaintext").unwrap();
    assert!(report.diagnostics.is_empty());
}

#[test]
fn languages_outside_the_target_list_are_skipped() {
    let config = Config {
        target_languages: vec!["markdown".into()],
        ..Config::default()
    };
    let analyzer = analyzer_with(config);
    assert!(analyzer.check("来れる。", "plaintext").unwrap().diagnostics.is_empty());
    assert_eq!(analyzer.check("来れる。", "markdown").unwrap().diagnostics.len(), 1);
}

#[test]
fn unknown_languages_are_checked_as_prose() {
    let config = Config {
        target_languages: vec!["restructuredtext".into()],
        ..Config::default()
    };
    let report = analyzer_with(config).check("来れる。", "restructuredtext").unwrap();
    assert_eq!(codes(&report), vec![RuleCode::RaDropping]);
}

#[test]
fn document_tokens_use_document_offsets() {
    let text = "let a = 1; // これは本。\n";
    let analyzer = analyzer_with(Config::default());
    let tokens = analyzer.document_tokens(text, "typescript").unwrap();
    assert!(!tokens.is_empty());
    assert_eq!(tokens[0].surface, "これ");
    for token in &tokens {
        assert_eq!(&text[token.offset..token.end()], token.surface);
    }
    let offsets: Vec<usize> = tokens.iter().map(|t| t.offset).collect();
    assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn html_text_outside_scripts_is_checked() {
    let text = "<p>来れる。</p>\n<script>// 来れる</script>\n";
    let report = check(text, "html");
    assert_eq!(report.segment_count, 1);
    assert_eq!(codes(&report), vec![RuleCode::RaDropping]);
    assert_eq!(report.diagnostics[0].range.start, Position::new(0, 3));
}

#[test]
fn latex_prose_is_checked_outside_commands() {
    let text = "\\section{序論}\n来れる。$x$\n";
    let report = check(text, "latex");
    assert_eq!(codes(&report), vec![RuleCode::RaDropping]);
    assert_eq!(report.diagnostics[0].range.start, Position::new(1, 0));
    assert_spans_index_document(text, &report);
}

#[test]
fn report_serializes_for_tooling() {
    let report = check("来れる。", "plaintext");
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["diagnostics"][0]["code"], "ra-dropping");
    assert_eq!(value["code_counts"]["ra-dropping"], 1);
    assert_eq!(value["segment_count"], 1);
}

#[test]
fn embedded_dictionary_pipeline_is_structurally_sound() {
    let context = Arc::new(AnalysisContext::new());
    context.tokenizer.initialize().unwrap();
    let analyzer = Analyzer::new(Config::default(), context);
    let text = "// これは、とても、すごく、非常に、良い文章です。\nfn main() {}\n";
    let report = analyzer.check(text, "rust").unwrap();
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.diagnostic.code == RuleCode::CommaLimit));
    assert_spans_index_document(text, &report);

    let tokens = analyzer.document_tokens(text, "rust").unwrap();
    for token in &tokens {
        assert_eq!(&text[token.offset..token.end()], token.surface);
    }
}
