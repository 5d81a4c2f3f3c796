use serde::{Deserialize, Serialize};

use crate::tokenizer::{Token, POS_SYMBOL};

/// Surfaces that close a sentence.
const TERMINALS: [&str; 6] = ["。", "！", "？", "!", "?", "\n"];

/// Contiguous run of tokens ending at a terminal (or at the end of input).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub tokens: Vec<Token>,
}

impl Sentence {
    fn from_tokens(text: &str, tokens: Vec<Token>) -> Option<Self> {
        let start = tokens.first()?.offset;
        let end = tokens.last()?.end();
        Some(Self {
            text: text.get(start..end).unwrap_or_default().to_string(),
            start,
            end,
            tokens,
        })
    }
}

fn is_terminal(token: &Token) -> bool {
    let surface = token.surface.as_str();
    if TERMINALS.contains(&surface) {
        return true;
    }
    token.pos == POS_SYMBOL && TERMINALS.contains(&surface.trim_matches(' '))
}

/// Partition `tokens` (anchored in `text`) into sentences.
pub fn segment(text: &str, tokens: &[Token]) -> Vec<Sentence> {
    let mut sentences = Vec::new();
    let mut buffer: Vec<Token> = Vec::new();
    for token in tokens {
        buffer.push(token.clone());
        if is_terminal(token) {
            sentences.extend(Sentence::from_tokens(text, std::mem::take(&mut buffer)));
        }
    }
    sentences.extend(Sentence::from_tokens(text, buffer));
    sentences
}
