//! IPADIC backend built on Lindera's embedded dictionary.

use lindera::dictionary::{load_dictionary_from_kind, DictionaryKind};
use lindera::mode::Mode;
use lindera::segmenter::Segmenter;
use lindera::tokenizer::Tokenizer;

use crate::error::{AnalysisError, Result};
use crate::tokenizer::{MorphBackend, Morpheme};

pub struct LinderaBackend {
    tokenizer: Tokenizer,
}

impl LinderaBackend {
    pub fn load() -> Result<Self> {
        let dictionary = load_dictionary_from_kind(DictionaryKind::IPADIC).map_err(|e| {
            AnalysisError::Initialization(format!("failed to load IPADIC dictionary: {e}"))
        })?;
        let segmenter = Segmenter::new(Mode::Normal, dictionary, None);
        Ok(Self {
            tokenizer: Tokenizer::new(segmenter),
        })
    }
}

impl MorphBackend for LinderaBackend {
    fn name(&self) -> &'static str {
        "lindera-ipadic"
    }

    fn analyze(&self, text: &str) -> Result<Vec<Morpheme>> {
        let mut tokens = self
            .tokenizer
            .tokenize(text)
            .map_err(|e| AnalysisError::Tokenize(e.to_string()))?;
        let mut morphemes = Vec::with_capacity(tokens.len());
        for token in tokens.iter_mut() {
            let surface = token.text.to_string();
            let details = token.details();
            morphemes.push(Morpheme::from_ipadic(surface, &details));
        }
        Ok(morphemes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::TokenizerAdapter;

    #[test]
    fn tokenizes_with_embedded_dictionary() {
        let adapter = TokenizerAdapter::lindera();
        adapter.initialize().unwrap();
        let text = "日本語の形態素解析を行うことができます。";
        let tokens = adapter.tokenize(text).unwrap();

        let joined: String = tokens.iter().map(|t| t.surface.as_str()).collect();
        assert_eq!(joined, text);
        for token in &tokens {
            assert_eq!(&text[token.offset..token.end()], token.surface);
        }
        assert!(tokens.iter().any(|t| t.surface == "の" && t.is_particle()));
        assert_eq!(tokens.last().map(|t| t.surface.as_str()), Some("。"));
    }
}
