//! Kotoba core analysis engine.
//! Extracts Japanese prose from documents and source comments, runs it
//! through morphological analysis and reports grammar and style issues.

use std::{collections::BTreeMap, fmt, path::Path, str::FromStr, sync::Arc};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub mod enrichment;
pub mod error;
pub mod extract;
pub mod grammar;
pub mod hover;
pub mod lindera_backend;
pub mod position;
pub mod rules;
pub mod sentence;
pub mod tokenizer;

pub use error::{AnalysisError, Result};
pub use extract::{language_for_path, Segment};
pub use grammar::GrammarRegistry;
pub use hover::PosClass;
pub use position::{LineIndex, Position, Range};
pub use tokenizer::{MorphBackend, Morpheme, Token, TokenizerAdapter};

/// Diagnostic source reported to editors.
pub const SOURCE: &str = "kotoba";

/// Default configuration file name.
pub const CONFIG_FILE: &str = "kotoba.yml";

/// Per-rule switches and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuleConfig {
    pub comma_limit: bool,
    pub comma_limit_max: usize,
    pub adversative_ga: bool,
    pub adversative_ga_max: usize,
    pub duplicate_particle: bool,
    pub adjacent_particles: bool,
    pub conjunction_repeat: bool,
    pub conjunction_repeat_max: usize,
    pub ra_dropping: bool,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            comma_limit: true,
            comma_limit_max: 3,
            adversative_ga: true,
            adversative_ga_max: 1,
            duplicate_particle: true,
            adjacent_particles: true,
            conjunction_repeat: true,
            conjunction_repeat_max: 1,
            ra_dropping: true,
        }
    }
}

impl RuleConfig {
    pub fn is_enabled(&self, code: RuleCode) -> bool {
        match code {
            RuleCode::CommaLimit => self.comma_limit,
            RuleCode::AdversativeGa => self.adversative_ga,
            RuleCode::DuplicateParticle => self.duplicate_particle,
            RuleCode::AdjacentParticles => self.adjacent_particles,
            RuleCode::ConjunctionRepeat => self.conjunction_repeat,
            RuleCode::RaDropping => self.ra_dropping,
        }
    }

    pub fn set_enabled(&mut self, code: RuleCode, enabled: bool) {
        let flag = match code {
            RuleCode::CommaLimit => &mut self.comma_limit,
            RuleCode::AdversativeGa => &mut self.adversative_ga,
            RuleCode::DuplicateParticle => &mut self.duplicate_particle,
            RuleCode::AdjacentParticles => &mut self.adjacent_particles,
            RuleCode::ConjunctionRepeat => &mut self.conjunction_repeat,
            RuleCode::RaDropping => &mut self.ra_dropping,
        };
        *flag = enabled;
    }
}

/// Hover enrichment settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: enrichment::DEFAULT_ENDPOINT.into(),
            timeout_secs: enrichment::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

/// Top-level configuration for the analyzer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub enabled: bool,
    pub target_languages: Vec<String>,
    pub min_japanese_ratio: f32,
    pub min_severity: Severity,
    pub rules: RuleConfig,
    pub enrichment: EnrichmentConfig,
    /// Paths skipped by the batch linter.
    pub ignore_globs: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            target_languages: DEFAULT_TARGET_LANGUAGES
                .iter()
                .map(|id| id.to_string())
                .collect(),
            min_japanese_ratio: 0.1,
            min_severity: Severity::Hint,
            rules: RuleConfig::default(),
            enrichment: EnrichmentConfig::default(),
            ignore_globs: vec![
                "**/.git/**".into(),
                "**/target/**".into(),
                "**/node_modules/**".into(),
            ],
        }
    }
}

pub const DEFAULT_TARGET_LANGUAGES: [&str; 27] = [
    "plaintext",
    "markdown",
    "japanese",
    "html",
    "latex",
    "javascript",
    "javascriptreact",
    "typescript",
    "typescriptreact",
    "rust",
    "c",
    "cpp",
    "csharp",
    "java",
    "go",
    "swift",
    "kotlin",
    "php",
    "dart",
    "scala",
    "python",
    "ruby",
    "shellscript",
    "perl",
    "r",
    "yaml",
    "toml",
];

/// Load a YAML config, falling back to defaults when the file is absent.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    if text.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&text)
        .with_context(|| format!("Invalid config structure in {}", path.display()))
}

/// Diagnostic severity, numbered as editors number it.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, Ord, PartialOrd,
)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Error,
    Warning,
    Information,
    #[default]
    Hint,
}

impl Severity {
    pub fn level(self) -> u8 {
        match self {
            Severity::Error => 1,
            Severity::Warning => 2,
            Severity::Information => 3,
            Severity::Hint => 4,
        }
    }

    /// Whether a diagnostic of this severity passes a `minimum` filter.
    pub fn reaches(self, minimum: Severity) -> bool {
        self.level() <= minimum.level()
    }
}

/// Rule identifiers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[serde(rename_all = "kebab-case")]
pub enum RuleCode {
    CommaLimit,
    AdversativeGa,
    DuplicateParticle,
    AdjacentParticles,
    ConjunctionRepeat,
    RaDropping,
}

impl RuleCode {
    pub const ALL: [RuleCode; 6] = [
        RuleCode::CommaLimit,
        RuleCode::AdversativeGa,
        RuleCode::DuplicateParticle,
        RuleCode::AdjacentParticles,
        RuleCode::ConjunctionRepeat,
        RuleCode::RaDropping,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RuleCode::CommaLimit => "comma-limit",
            RuleCode::AdversativeGa => "adversative-ga",
            RuleCode::DuplicateParticle => "duplicate-particle",
            RuleCode::AdjacentParticles => "adjacent-particles",
            RuleCode::ConjunctionRepeat => "conjunction-repeat",
            RuleCode::RaDropping => "ra-dropping",
        }
    }
}

impl fmt::Display for RuleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleCode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let name = s.trim().to_lowercase().replace('_', "-");
        RuleCode::ALL
            .into_iter()
            .find(|code| code.as_str() == name)
            .ok_or_else(|| format!("unknown rule code `{}`", s.trim()))
    }
}

/// Rule finding in the coordinates of the text that was checked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Diagnostic {
    pub code: RuleCode,
    pub message: String,
    pub severity: Severity,
    /// Byte range.
    pub span: (usize, usize),
    pub snippet: String,
}

/// Finding anchored in the full document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentDiagnostic {
    pub range: Range,
    pub source: String,
    #[serde(flatten)]
    pub diagnostic: Diagnostic,
}

/// Findings for one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentReport {
    pub diagnostics: Vec<DocumentDiagnostic>,
    pub code_counts: BTreeMap<RuleCode, usize>,
    pub segment_count: usize,
}

impl DocumentReport {
    /// Keep only diagnostics whose code passes `keep`, recounting codes.
    pub fn retain(&mut self, mut keep: impl FnMut(RuleCode) -> bool) {
        self.diagnostics.retain(|d| keep(d.diagnostic.code));
        self.code_counts = count_codes(&self.diagnostics);
    }
}

fn count_codes(diagnostics: &[DocumentDiagnostic]) -> BTreeMap<RuleCode, usize> {
    let mut counts = BTreeMap::new();
    for d in diagnostics {
        *counts.entry(d.diagnostic.code).or_default() += 1;
    }
    counts
}

/// Long-lived state shared by every analysis in a process.
pub struct AnalysisContext {
    pub tokenizer: TokenizerAdapter,
    pub grammars: GrammarRegistry,
}

impl AnalysisContext {
    /// Context backed by the embedded IPADIC dictionary. The tokenizer still
    /// needs [`TokenizerAdapter::initialize`] before analysis.
    pub fn new() -> Self {
        Self::with_tokenizer(TokenizerAdapter::lindera())
    }

    pub fn with_tokenizer(tokenizer: TokenizerAdapter) -> Self {
        Self {
            tokenizer,
            grammars: GrammarRegistry::new(),
        }
    }

    /// Context around a ready backend.
    pub fn with_backend(backend: Box<dyn MorphBackend>) -> Self {
        Self::with_tokenizer(TokenizerAdapter::with_backend(backend))
    }
}

impl Default for AnalysisContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Analyzer pairs one configuration snapshot with the shared context.
pub struct Analyzer {
    config: Config,
    context: Arc<AnalysisContext>,
}

impl Analyzer {
    pub fn new(config: Config, context: Arc<AnalysisContext>) -> Self {
        Self { config, context }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn context(&self) -> &Arc<AnalysisContext> {
        &self.context
    }

    /// Whether documents of `language_id` are analysed at all.
    pub fn accepts(&self, language_id: &str) -> bool {
        self.config.enabled
            && self
                .config
                .target_languages
                .iter()
                .any(|id| id == language_id)
    }

    pub fn check(&self, text: &str, language_id: &str) -> Result<DocumentReport> {
        if !self.accepts(language_id) {
            return Ok(DocumentReport::default());
        }
        if !self.context.tokenizer.is_ready() {
            return Err(AnalysisError::NotInitialized);
        }
        let segments = self.segments(text, language_id);
        let index = LineIndex::new(text);
        let mut diagnostics = Vec::new();
        for segment in &segments {
            let tokens = self.context.tokenizer.tokenize(&segment.text)?;
            let sentences = sentence::segment(&segment.text, &tokens);
            for diagnostic in rules::check_grammar(&segment.text, &sentences, &self.config.rules) {
                if !diagnostic.severity.reaches(self.config.min_severity) {
                    continue;
                }
                let span = position::shift_span(diagnostic.span, segment.offset);
                diagnostics.push(DocumentDiagnostic {
                    range: index.range(span),
                    source: SOURCE.into(),
                    diagnostic: Diagnostic {
                        span,
                        ..diagnostic
                    },
                });
            }
        }
        tracing::debug!(
            language_id,
            segments = segments.len(),
            diagnostics = diagnostics.len(),
            "checked document"
        );
        Ok(DocumentReport {
            code_counts: count_codes(&diagnostics),
            diagnostics,
            segment_count: segments.len(),
        })
    }

    /// Tokens of every segment, with offsets into `text`.
    pub fn document_tokens(&self, text: &str, language_id: &str) -> Result<Vec<Token>> {
        if !self.accepts(language_id) {
            return Ok(Vec::new());
        }
        let mut tokens = Vec::new();
        for segment in self.segments(text, language_id) {
            let local = self.context.tokenizer.tokenize(&segment.text)?;
            tokens.extend(local.into_iter().map(|t| t.shifted(segment.offset)));
        }
        Ok(tokens)
    }

    fn segments(&self, text: &str, language_id: &str) -> Vec<Segment> {
        extract::extract(
            text,
            language_id,
            self.config.min_japanese_ratio,
            &self.context.grammars,
        )
    }
}
