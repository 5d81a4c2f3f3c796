//! Grammar rules over sentences and token streams.
//!
//! Each rule is a pure function of its inputs. The repetition rules share the
//! [`Streak`] scanner: a run grows while the adjacency condition holds and
//! resets on the first mismatch, and every step past the configured length
//! produces a diagnostic.

use crate::sentence::Sentence;
use crate::tokenizer::{Token, POS_CONJUNCTION, POS_VERB};
use crate::{Diagnostic, RuleCode, RuleConfig, Severity};

const JAPANESE_COMMA: char = '、';
const CONNECTIVE_PARTICLE: &str = "接続助詞";
const ADVERSATIVE_GA: &str = "が";
const INDEPENDENT: &str = "自立";
const SUFFIX: &str = "接尾";
const ICHIDAN: &str = "一段";
const STEM_FORM: &str = "未然形";
const RA_SUFFIX: &str = "れる";
const CONTRACTED_POTENTIALS: [&str; 2] = ["来れる", "これる"];

/// Run counter: a mismatch restarts the run at the current element.
#[derive(Debug, Default, Clone, Copy)]
pub struct Streak {
    length: usize,
}

impl Streak {
    /// Feed one element. `extends` says whether it continues the current
    /// run; returns the run length including this element.
    pub fn advance(&mut self, extends: bool) -> usize {
        self.length = if extends { self.length + 1 } else { 1 };
        self.length
    }
}

fn span_of(first: &Token, last: &Token) -> (usize, usize) {
    (first.offset, last.end())
}

fn diagnostic(text: &str, code: RuleCode, span: (usize, usize), message: String) -> Diagnostic {
    Diagnostic {
        code,
        message,
        severity: Severity::Warning,
        span,
        snippet: text.get(span.0..span.1).unwrap_or_default().trim().to_string(),
    }
}

pub fn check_comma_limit(text: &str, sentences: &[Sentence], max: usize) -> Vec<Diagnostic> {
    sentences
        .iter()
        .filter_map(|sentence| {
            let count = sentence.text.matches(JAPANESE_COMMA).count();
            (count > max).then(|| {
                diagnostic(
                    text,
                    RuleCode::CommaLimit,
                    (sentence.start, sentence.end),
                    format!("一文に読点「、」が{count}個あります。{max}個以下にしてください。"),
                )
            })
        })
        .collect()
}

fn is_adversative_ga(token: &Token) -> bool {
    token.is_particle()
        && token.pos_detail1 == CONNECTIVE_PARTICLE
        && token.base_form == ADVERSATIVE_GA
}

pub fn check_adversative_ga(text: &str, sentences: &[Sentence], max: usize) -> Vec<Diagnostic> {
    sentences
        .iter()
        .filter_map(|sentence| {
            let count = sentence.tokens.iter().filter(|t| is_adversative_ga(t)).count();
            (count > max).then(|| {
                diagnostic(
                    text,
                    RuleCode::AdversativeGa,
                    (sentence.start, sentence.end),
                    format!(
                        "逆接の接続助詞「が」が{count}回使われています。{max}回以下にしてください。"
                    ),
                )
            })
        })
        .collect()
}

pub fn check_duplicate_particle(text: &str, sentences: &[Sentence]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for sentence in sentences {
        let mut streak = Streak::default();
        let mut previous: Option<&Token> = None;
        for token in sentence.tokens.iter().filter(|t| t.is_particle()) {
            let repeats = previous.is_some_and(|prev| {
                prev.surface == token.surface && prev.pos_key() == token.pos_key()
            });
            if streak.advance(repeats) > 1 {
                if let Some(prev) = previous {
                    diagnostics.push(diagnostic(
                        text,
                        RuleCode::DuplicateParticle,
                        span_of(prev, token),
                        format!("助詞「{}」が連続して使われています。", token.surface),
                    ));
                }
            }
            previous = Some(token);
        }
    }
    diagnostics
}

pub fn check_adjacent_particles(text: &str, sentences: &[Sentence]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for sentence in sentences {
        let mut streak = Streak::default();
        let mut previous: Option<&Token> = None;
        for token in &sentence.tokens {
            let adjacent = token.is_particle()
                && previous.is_some_and(|prev| {
                    prev.is_particle()
                        && prev.pos_key() == token.pos_key()
                        && prev.end() == token.offset
                });
            if streak.advance(adjacent) > 1 {
                if let Some(prev) = previous {
                    diagnostics.push(diagnostic(
                        text,
                        RuleCode::AdjacentParticles,
                        span_of(prev, token),
                        format!(
                            "同じ種類の助詞「{}」と「{}」が隣接しています。",
                            prev.surface, token.surface
                        ),
                    ));
                }
            }
            previous = Some(token);
        }
    }
    diagnostics
}

/// Scans the whole document, so `tokens` is the flattened token stream of
/// every sentence in order.
pub fn check_conjunction_repeat(text: &str, tokens: &[Token], max_repeat: usize) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut streak = Streak::default();
    let mut previous: Option<&Token> = None;
    for token in tokens.iter().filter(|t| t.pos == POS_CONJUNCTION) {
        let repeats = previous.is_some_and(|prev| {
            let between = text
                .get(prev.end().min(token.offset)..token.offset)
                .unwrap_or_default();
            prev.surface == token.surface && !between.contains('\n')
        });
        if streak.advance(repeats) > max_repeat.max(1) {
            if let Some(prev) = previous {
                diagnostics.push(diagnostic(
                    text,
                    RuleCode::ConjunctionRepeat,
                    span_of(prev, token),
                    format!("接続詞「{}」が繰り返し使われています。", token.surface),
                ));
            }
        }
        previous = Some(token);
    }
    diagnostics
}

fn is_ichidan_stem(token: &Token) -> bool {
    token.pos == POS_VERB
        && token.pos_detail1 == INDEPENDENT
        && token.conjugation_type.starts_with(ICHIDAN)
        && token.conjugation_form == STEM_FORM
}

fn is_ra_suffix(token: &Token) -> bool {
    token.pos == POS_VERB && token.pos_detail1 == SUFFIX && token.base_form == RA_SUFFIX
}

pub fn check_ra_dropping(text: &str, sentences: &[Sentence]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for sentence in sentences {
        for (idx, token) in sentence.tokens.iter().enumerate() {
            let span = if CONTRACTED_POTENTIALS.contains(&token.base_form.as_str()) {
                Some(span_of(token, token))
            } else {
                sentence
                    .tokens
                    .get(idx + 1)
                    .filter(|next| is_ichidan_stem(token) && is_ra_suffix(next))
                    .map(|next| span_of(token, next))
            };
            if let Some(span) = span {
                let found = text.get(span.0..span.1).unwrap_or_default();
                diagnostics.push(diagnostic(
                    text,
                    RuleCode::RaDropping,
                    span,
                    format!("ら抜き言葉「{found}」が使われています。"),
                ));
            }
        }
    }
    diagnostics
}

/// Run every enabled rule. Output is grouped by rule in a fixed order and
/// follows token order within each rule.
pub fn check_grammar(text: &str, sentences: &[Sentence], config: &RuleConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    if config.comma_limit {
        diagnostics.extend(check_comma_limit(text, sentences, config.comma_limit_max));
    }
    if config.adversative_ga {
        diagnostics.extend(check_adversative_ga(
            text,
            sentences,
            config.adversative_ga_max,
        ));
    }
    if config.duplicate_particle {
        diagnostics.extend(check_duplicate_particle(text, sentences));
    }
    if config.adjacent_particles {
        diagnostics.extend(check_adjacent_particles(text, sentences));
    }
    if config.conjunction_repeat {
        let tokens: Vec<Token> = sentences
            .iter()
            .flat_map(|s| s.tokens.iter().cloned())
            .collect();
        diagnostics.extend(check_conjunction_repeat(
            text,
            &tokens,
            config.conjunction_repeat_max,
        ));
    }
    if config.ra_dropping {
        diagnostics.extend(check_ra_dropping(text, sentences));
    }
    diagnostics
}
