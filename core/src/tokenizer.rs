//! Canonical token model and the adapter that wraps a morphological backend.
//!
//! Backends report surface forms and feature columns; they are not trusted to
//! report offsets. The adapter re-derives offsets by scanning the analysed
//! text forward from a cursor, which keeps offsets monotonic even when the
//! backend mis-segments.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

pub const UNSET: &str = "*";

pub const POS_NOUN: &str = "名詞";
pub const POS_VERB: &str = "動詞";
pub const POS_PARTICLE: &str = "助詞";
pub const POS_CONJUNCTION: &str = "接続詞";
pub const POS_SYMBOL: &str = "記号";
pub const DETAIL_PROPER_NOUN: &str = "固有名詞";
pub const DETAIL_NUMERAL: &str = "数";

/// Backend-neutral morphological record, before offsets are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Morpheme {
    pub surface: String,
    pub pos: String,
    pub pos_detail: [String; 3],
    pub conjugation_type: String,
    pub conjugation_form: String,
    pub base_form: Option<String>,
    pub reading: String,
    pub pronunciation: String,
}

impl Morpheme {
    /// Map the IPADIC feature layout:
    /// pos, pos1, pos2, pos3, conjugation type, conjugation form, base form,
    /// reading, pronunciation. Unknown words may carry fewer columns.
    pub fn from_ipadic(surface: impl Into<String>, features: &[&str]) -> Self {
        let column = |idx: usize| -> String {
            features
                .get(idx)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .unwrap_or(UNSET)
                .to_string()
        };
        let base_form = features
            .get(6)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty() && *value != UNSET)
            .map(str::to_string);
        Self {
            surface: surface.into(),
            pos: column(0),
            pos_detail: [column(1), column(2), column(3)],
            conjugation_type: column(4),
            conjugation_form: column(5),
            base_form,
            reading: column(7),
            pronunciation: column(8),
        }
    }
}

/// Flags derived from the surface form and POS classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub proper: bool,
    pub numeric: bool,
    pub kana: bool,
    pub kanji: bool,
}

/// One morphological unit anchored in the analysed text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub surface: String,
    pub pos: String,
    pub pos_detail1: String,
    pub pos_detail2: String,
    pub pos_detail3: String,
    pub conjugation_type: String,
    pub conjugation_form: String,
    pub base_form: String,
    pub reading: String,
    pub pronunciation: String,
    /// Byte offset of `surface` within the analysed text.
    pub offset: usize,
    /// Byte length of `surface`.
    pub length: usize,
    pub modifiers: Modifiers,
}

impl Token {
    pub fn from_morpheme(morpheme: Morpheme, offset: usize) -> Self {
        let Morpheme {
            surface,
            pos,
            pos_detail: [pos_detail1, pos_detail2, pos_detail3],
            conjugation_type,
            conjugation_form,
            base_form,
            reading,
            pronunciation,
        } = morpheme;
        let modifiers = Modifiers {
            proper: pos_detail1 == DETAIL_PROPER_NOUN,
            numeric: pos_detail1 == DETAIL_NUMERAL || is_digits(&surface),
            kana: surface.chars().any(is_kana),
            kanji: surface.chars().any(is_kanji),
        };
        Self {
            length: surface.len(),
            base_form: base_form.unwrap_or_else(|| surface.clone()),
            surface,
            pos,
            pos_detail1,
            pos_detail2,
            pos_detail3,
            conjugation_type,
            conjugation_form,
            reading,
            pronunciation,
            offset,
            modifiers,
        }
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    pub fn is_particle(&self) -> bool {
        self.pos == POS_PARTICLE
    }

    /// Key used when comparing two tokens' grammatical category.
    pub fn pos_key(&self) -> (&str, &str) {
        (&self.pos, &self.pos_detail1)
    }

    /// Shift the token into the coordinates of an enclosing text.
    pub fn shifted(mut self, by: usize) -> Self {
        self.offset += by;
        self
    }
}

fn is_digits(surface: &str) -> bool {
    !surface.is_empty()
        && surface
            .chars()
            .all(|c| c.is_ascii_digit() || ('０'..='９').contains(&c))
}

pub(crate) fn is_kana(c: char) -> bool {
    matches!(c, '\u{3040}'..='\u{309F}' | '\u{30A0}'..='\u{30FF}')
}

pub(crate) fn is_kanji(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}')
}

/// Morphological analysis capability.
pub trait MorphBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Analyse `text` into records in text order.
    fn analyze(&self, text: &str) -> Result<Vec<Morpheme>>;
}

type BackendLoader = Box<dyn Fn() -> Result<Box<dyn MorphBackend>> + Send + Sync>;

/// Lazily initialised wrapper around one [`MorphBackend`].
pub struct TokenizerAdapter {
    loader: BackendLoader,
    backend: OnceCell<Box<dyn MorphBackend>>,
}

impl TokenizerAdapter {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Box<dyn MorphBackend>> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            backend: OnceCell::new(),
        }
    }

    /// Adapter around the embedded IPADIC dictionary.
    pub fn lindera() -> Self {
        Self::new(|| {
            let backend = crate::lindera_backend::LinderaBackend::load()?;
            Ok(Box::new(backend) as Box<dyn MorphBackend>)
        })
    }

    /// Adapter that is ready immediately.
    pub fn with_backend(backend: Box<dyn MorphBackend>) -> Self {
        let adapter = Self::new(|| {
            Err(AnalysisError::Initialization(
                "backend was supplied pre-initialized".into(),
            ))
        });
        let _ = adapter.backend.set(backend);
        adapter
    }

    /// Load the backend. Concurrent callers block on the same in-flight load;
    /// once loaded, further calls return immediately.
    pub fn initialize(&self) -> Result<()> {
        self.backend
            .get_or_try_init(|| {
                let backend = (self.loader)().inspect_err(|err| {
                    tracing::error!(error = %err, "tokenizer initialization failed");
                })?;
                tracing::info!(backend = backend.name(), "tokenizer ready");
                Ok(backend)
            })
            .map(|_| ())
    }

    pub fn is_ready(&self) -> bool {
        self.backend.get().is_some()
    }

    pub fn tokenize(&self, text: &str) -> Result<Vec<Token>> {
        let backend = self.backend.get().ok_or(AnalysisError::NotInitialized)?;
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let morphemes = backend.analyze(text)?;
        Ok(anchor(text, morphemes))
    }
}

/// Assign offsets by locating each surface at or after a running cursor.
/// A surface that cannot be found is placed at the cursor itself.
///
/// The cursor always sits on a char boundary, so a miss never stops later
/// surfaces from being found.
pub fn anchor(text: &str, morphemes: Vec<Morpheme>) -> Vec<Token> {
    let mut cursor = 0usize;
    let mut tokens = Vec::with_capacity(morphemes.len());
    for morpheme in morphemes {
        let offset = text[cursor..]
            .find(morpheme.surface.as_str())
            .map(|found| cursor + found)
            .unwrap_or(cursor);
        let token = Token::from_morpheme(morpheme, offset);
        cursor = ceil_boundary(text, token.end());
        tokens.push(token);
    }
    tokens
}

fn ceil_boundary(text: &str, offset: usize) -> usize {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset += 1;
    }
    offset
}
