//! Token lookup, hover rendering and part-of-speech classes for decoration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tokenizer::{Token, POS_CONJUNCTION, POS_NOUN, POS_PARTICLE, POS_SYMBOL, POS_VERB};

/// Coarse part-of-speech class used for semantic highlighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PosClass {
    Noun,
    Verb,
    Adjective,
    Adverb,
    Particle,
    AuxiliaryVerb,
    Conjunction,
    Prefix,
    Interjection,
    Symbol,
    Other,
}

impl PosClass {
    pub const ALL: [PosClass; 11] = [
        PosClass::Noun,
        PosClass::Verb,
        PosClass::Adjective,
        PosClass::Adverb,
        PosClass::Particle,
        PosClass::AuxiliaryVerb,
        PosClass::Conjunction,
        PosClass::Prefix,
        PosClass::Interjection,
        PosClass::Symbol,
        PosClass::Other,
    ];

    pub fn classify(pos: &str) -> Self {
        match pos {
            POS_NOUN => PosClass::Noun,
            POS_VERB => PosClass::Verb,
            "形容詞" | "形容動詞" | "連体詞" => PosClass::Adjective,
            "副詞" => PosClass::Adverb,
            POS_PARTICLE => PosClass::Particle,
            "助動詞" => PosClass::AuxiliaryVerb,
            POS_CONJUNCTION => PosClass::Conjunction,
            "接頭詞" => PosClass::Prefix,
            "感動詞" | "フィラー" => PosClass::Interjection,
            POS_SYMBOL => PosClass::Symbol,
            _ => PosClass::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PosClass::Noun => "noun",
            PosClass::Verb => "verb",
            PosClass::Adjective => "adjective",
            PosClass::Adverb => "adverb",
            PosClass::Particle => "particle",
            PosClass::AuxiliaryVerb => "auxiliary-verb",
            PosClass::Conjunction => "conjunction",
            PosClass::Prefix => "prefix",
            PosClass::Interjection => "interjection",
            PosClass::Symbol => "symbol",
            PosClass::Other => "other",
        }
    }

    /// Position in [`PosClass::ALL`], used as a legend index.
    pub fn index(self) -> usize {
        PosClass::ALL
            .iter()
            .position(|class| *class == self)
            .unwrap_or(PosClass::ALL.len() - 1)
    }
}

impl fmt::Display for PosClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token covering `offset`, if any. Tokens must be in offset order.
pub fn token_at(tokens: &[Token], offset: usize) -> Option<&Token> {
    let idx = tokens.partition_point(|token| token.end() <= offset);
    tokens
        .get(idx)
        .filter(|token| token.offset <= offset && offset < token.end())
}

/// Render every token field as a Markdown table.
pub fn describe(token: &Token) -> String {
    let flags: Vec<&str> = [
        (token.modifiers.proper, "proper"),
        (token.modifiers.numeric, "numeric"),
        (token.modifiers.kana, "kana"),
        (token.modifiers.kanji, "kanji"),
    ]
    .into_iter()
    .filter_map(|(set, name)| set.then_some(name))
    .collect();
    let rows = [
        ("表層形", token.surface.clone()),
        ("品詞", token.pos.clone()),
        ("品詞細分類1", token.pos_detail1.clone()),
        ("品詞細分類2", token.pos_detail2.clone()),
        ("品詞細分類3", token.pos_detail3.clone()),
        ("活用型", token.conjugation_type.clone()),
        ("活用形", token.conjugation_form.clone()),
        ("原形", token.base_form.clone()),
        ("読み", token.reading.clone()),
        ("発音", token.pronunciation.clone()),
        ("位置", format!("{}..{}", token.offset, token.end())),
        ("分類", PosClass::classify(&token.pos).to_string()),
        ("修飾子", flags.join(", ")),
    ];
    let mut out = format!("**{}**\n\n| 項目 | 値 |\n|---|---|\n", escape(&token.surface));
    for (label, value) in rows {
        out.push_str(&format!("| {label} | {} |\n", escape(&value)));
    }
    out
}

/// Hover body, with an optional enrichment summary appended.
pub fn hover_markdown(token: &Token, summary: Option<&str>) -> String {
    let mut out = describe(token);
    if let Some(summary) = summary.filter(|s| !s.trim().is_empty()) {
        out.push_str("\n---\n\n");
        out.push_str(summary.trim());
        out.push('\n');
    }
    out
}

fn escape(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', "\\n")
}
