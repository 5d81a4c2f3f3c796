//! Kotoba Language Server Protocol implementation.
//!
//! Keeps the tokenizer and grammars hot in memory and provides Japanese
//! grammar diagnostics, token hovers and part-of-speech semantic tokens.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kotoba_core::enrichment::{EnrichmentCache, WikipediaFetcher};
use kotoba_core::hover::{self, PosClass};
use kotoba_core::tokenizer::{Modifiers, Token};
use kotoba_core::{
    load_config, AnalysisContext, AnalysisError, Analyzer, Config, DocumentDiagnostic, LineIndex,
    RuleCode, Severity, CONFIG_FILE, SOURCE,
};
use serde_json::Value;
use tokio::sync::RwLock;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer, LspService, Server};
use tracing_subscriber::EnvFilter;

/// Document state cached by the server.
struct DocumentState {
    content: String,
    language_id: String,
    version: i32,
    /// Reassigned on every open and content change; a validation pass only
    /// publishes while its generation is still current.
    generation: u64,
}

/// Snapshot of a document taken before analysis.
struct Snapshot {
    content: String,
    language_id: String,
    version: i32,
    generation: u64,
}

/// Open documents keyed by URI. Every open or content change assigns a new
/// generation from a counter shared by all documents; a result computed from
/// a snapshot is only current while the document still has that generation.
#[derive(Default)]
struct DocumentStore {
    documents: DashMap<Url, DocumentState>,
    generations: AtomicU64,
}

impl DocumentStore {
    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn open(&self, uri: Url, content: String, language_id: String, version: i32) {
        let generation = self.next_generation();
        self.documents.insert(
            uri,
            DocumentState {
                content,
                language_id,
                version,
                generation,
            },
        );
    }

    /// Replace the content of an open document. Returns false if it is not open.
    fn update(&self, uri: &Url, content: String, version: i32) -> bool {
        let Some(mut doc) = self.documents.get_mut(uri) else {
            return false;
        };
        doc.content = content;
        doc.version = version;
        doc.generation = self.next_generation();
        true
    }

    fn close(&self, uri: &Url) {
        self.documents.remove(uri);
    }

    fn uris(&self) -> Vec<Url> {
        self.documents.iter().map(|e| e.key().clone()).collect()
    }

    fn snapshot(&self, uri: &Url) -> Option<Snapshot> {
        self.documents.get(uri).map(|doc| Snapshot {
            content: doc.content.clone(),
            language_id: doc.language_id.clone(),
            version: doc.version,
            generation: doc.generation,
        })
    }

    fn is_current(&self, uri: &Url, generation: u64) -> bool {
        self.documents
            .get(uri)
            .is_some_and(|doc| doc.generation == generation)
    }
}

#[derive(Clone, Default)]
struct CodeFilter {
    only: HashSet<RuleCode>,
    disable: HashSet<RuleCode>,
}

impl CodeFilter {
    fn from_settings(map: &serde_json::Map<String, Value>) -> Self {
        Self {
            only: parse_codes(map.get("onlyRules")),
            disable: parse_codes(map.get("disableRules")),
        }
    }

    fn allows(&self, code: RuleCode) -> bool {
        if !self.only.is_empty() {
            return self.only.contains(&code);
        }
        !self.disable.contains(&code)
    }
}

fn parse_codes(value: Option<&Value>) -> HashSet<RuleCode> {
    let Some(Value::Array(items)) = value else {
        return HashSet::new();
    };
    items
        .iter()
        .filter_map(|item| item.as_str())
        .filter_map(|name| name.parse().ok())
        .collect()
}

type Enrichment = EnrichmentCache<WikipediaFetcher>;

/// Kotoba Language Server backend.
struct Backend {
    client: Client,
    context: Arc<AnalysisContext>,
    analyzer: RwLock<Arc<Analyzer>>,
    enrichment: RwLock<Option<Arc<Enrichment>>>,
    documents: DocumentStore,
    workspace_root: RwLock<Option<PathBuf>>,
    config_path: RwLock<Option<PathBuf>>,
    inline_config: RwLock<Option<Config>>,
    code_filter: RwLock<CodeFilter>,
}

impl Backend {
    fn new(client: Client) -> Self {
        let context = Arc::new(AnalysisContext::new());
        let analyzer = Analyzer::new(Config::default(), context.clone());
        Self {
            client,
            context,
            analyzer: RwLock::new(Arc::new(analyzer)),
            enrichment: RwLock::new(None),
            documents: DocumentStore::default(),
            workspace_root: RwLock::new(None),
            config_path: RwLock::new(None),
            inline_config: RwLock::new(None),
            code_filter: RwLock::new(CodeFilter::default()),
        }
    }

    async fn resolve_path(&self, configured: &str) -> Option<PathBuf> {
        let configured = PathBuf::from(configured);
        if configured.is_absolute() {
            return Some(configured);
        }
        self.workspace_root
            .read()
            .await
            .as_ref()
            .map(|root| root.join(configured))
    }

    /// Apply `configPath` and rule filters from a settings object.
    async fn apply_settings(&self, map: &serde_json::Map<String, Value>) {
        if let Some(Value::String(config_path)) = map.get("configPath") {
            let resolved = if config_path.trim().is_empty() {
                None
            } else {
                self.resolve_path(config_path).await
            };
            *self.config_path.write().await = resolved;
        }
        *self.code_filter.write().await = CodeFilter::from_settings(map);
    }

    async fn reload_analyzer(&self) -> anyhow::Result<()> {
        let inline = self.inline_config.read().await.clone();
        let (config, origin) = match inline {
            Some(config) => (config, "workspace settings".to_string()),
            None => {
                let configured = self.config_path.read().await.clone();
                let root = self.workspace_root.read().await.clone();
                let resolved = configured.or_else(|| root.map(|r| r.join(CONFIG_FILE)));
                match resolved {
                    Some(path) => {
                        let config = load_config(&path)?;
                        *self.config_path.write().await = Some(path.clone());
                        (config, path.display().to_string())
                    }
                    None => (Config::default(), "defaults".to_string()),
                }
            }
        };

        let enrichment = if config.enrichment.enabled {
            let fetcher = WikipediaFetcher::new(
                config.enrichment.endpoint.clone(),
                Duration::from_secs(config.enrichment.timeout_secs),
            )?;
            Some(Arc::new(EnrichmentCache::new(fetcher)))
        } else {
            None
        };
        *self.enrichment.write().await = enrichment;
        *self.analyzer.write().await = Arc::new(Analyzer::new(config, self.context.clone()));

        tracing::info!(%origin, "config loaded");
        self.client
            .log_message(MessageType::INFO, format!("Kotoba config loaded: {origin}"))
            .await;
        Ok(())
    }

    async fn reload_and_revalidate(&self) {
        if let Err(err) = self.reload_analyzer().await {
            tracing::error!(error = %format!("{err:#}"), "config reload failed");
            self.client
                .log_message(
                    MessageType::ERROR,
                    format!("Failed to reload config: {err:#}"),
                )
                .await;
        }
        self.revalidate_all().await;
    }

    async fn revalidate_all(&self) {
        let uris = self.documents.uris();
        for uri in uris {
            self.publish_diagnostics(uri).await;
        }
    }

    /// Analyze a document and publish its diagnostics, unless the document
    /// changed while the analysis ran.
    async fn publish_diagnostics(&self, uri: Url) {
        let Some(snapshot) = self.documents.snapshot(&uri) else {
            return;
        };
        if !self.context.tokenizer.is_ready() {
            // Revalidated once the tokenizer finishes loading.
            return;
        }
        let analyzer = self.analyzer.read().await.clone();
        let Snapshot {
            content,
            language_id,
            version,
            generation,
        } = snapshot;

        let result =
            tokio::task::spawn_blocking(move || analyzer.check(&content, &language_id)).await;

        let diagnostics = match result {
            Ok(Ok(report)) => {
                let filter = self.code_filter.read().await.clone();
                report
                    .diagnostics
                    .iter()
                    .filter(|d| filter.allows(d.diagnostic.code))
                    .map(to_lsp_diagnostic)
                    .collect()
            }
            Ok(Err(err)) => {
                self.report_analysis_error(&uri, &err).await;
                Vec::new()
            }
            Err(join_err) => {
                tracing::error!(%uri, error = %join_err, "analysis task failed");
                Vec::new()
            }
        };

        if !self.documents.is_current(&uri, generation) {
            tracing::debug!(%uri, generation, "dropping stale diagnostics");
            return;
        }
        self.client
            .publish_diagnostics(uri, diagnostics, Some(version))
            .await;
    }

    async fn report_analysis_error(&self, uri: &Url, err: &AnalysisError) {
        tracing::error!(%uri, error = %err, "analysis failed");
        self.client
            .log_message(
                MessageType::ERROR,
                format!("Kotoba analysis failed for {uri}: {err}"),
            )
            .await;
    }

    /// Tokens of the document at `uri`, in document offsets.
    async fn document_tokens(&self, uri: &Url) -> Option<(String, Vec<Token>)> {
        let snapshot = self.documents.snapshot(uri)?;
        if !self.context.tokenizer.is_ready() {
            return None;
        }
        let analyzer = self.analyzer.read().await.clone();
        let Snapshot {
            content,
            language_id,
            ..
        } = snapshot;
        let joined = tokio::task::spawn_blocking(move || {
            let tokens = analyzer.document_tokens(&content, &language_id);
            (content, tokens)
        })
        .await;
        match joined {
            Ok((content, Ok(tokens))) => Some((content, tokens)),
            Ok((_, Err(err))) => {
                self.report_analysis_error(uri, &err).await;
                None
            }
            Err(join_err) => {
                tracing::error!(%uri, error = %join_err, "token task failed");
                None
            }
        }
    }
}

fn to_lsp_position(position: kotoba_core::Position) -> Position {
    Position {
        line: position.line,
        character: position.character,
    }
}

fn to_lsp_range(range: kotoba_core::Range) -> Range {
    Range {
        start: to_lsp_position(range.start),
        end: to_lsp_position(range.end),
    }
}

/// Convert a core diagnostic to an LSP diagnostic.
fn to_lsp_diagnostic(diag: &DocumentDiagnostic) -> Diagnostic {
    let severity = match diag.diagnostic.severity {
        Severity::Error => DiagnosticSeverity::ERROR,
        Severity::Warning => DiagnosticSeverity::WARNING,
        Severity::Information => DiagnosticSeverity::INFORMATION,
        Severity::Hint => DiagnosticSeverity::HINT,
    };
    Diagnostic {
        range: to_lsp_range(diag.range),
        severity: Some(severity),
        code: Some(NumberOrString::String(diag.diagnostic.code.to_string())),
        code_description: None,
        source: Some(diag.source.clone()),
        message: diag.diagnostic.message.clone(),
        related_information: None,
        tags: None,
        data: None,
    }
}

const MODIFIER_NAMES: [&str; 4] = ["proper", "numeric", "kana", "kanji"];

fn semantic_legend() -> SemanticTokensLegend {
    SemanticTokensLegend {
        token_types: PosClass::ALL
            .iter()
            .map(|class| SemanticTokenType::new(class.as_str()))
            .collect(),
        token_modifiers: MODIFIER_NAMES
            .into_iter()
            .map(SemanticTokenModifier::new)
            .collect(),
    }
}

fn modifier_bits(modifiers: &Modifiers) -> u32 {
    [
        modifiers.proper,
        modifiers.numeric,
        modifiers.kana,
        modifiers.kanji,
    ]
    .iter()
    .enumerate()
    .filter(|(_, set)| **set)
    .fold(0, |bits, (idx, _)| bits | (1 << idx))
}

/// Relative-encoded semantic tokens. Whitespace and line-spanning tokens
/// are skipped.
fn encode_semantic_tokens(text: &str, tokens: &[Token]) -> Vec<SemanticToken> {
    let index = LineIndex::new(text);
    let mut data = Vec::with_capacity(tokens.len());
    let (mut prev_line, mut prev_start) = (0u32, 0u32);
    for token in tokens {
        if token.surface.trim().is_empty() || token.surface.contains('\n') {
            continue;
        }
        let position = index.position(token.offset);
        let delta_line = position.line.saturating_sub(prev_line);
        let delta_start = if delta_line == 0 {
            position.character.saturating_sub(prev_start)
        } else {
            position.character
        };
        data.push(SemanticToken {
            delta_line,
            delta_start,
            length: token.surface.encode_utf16().count() as u32,
            token_type: PosClass::classify(&token.pos).index() as u32,
            token_modifiers_bitset: modifier_bits(&token.modifiers),
        });
        prev_line = position.line;
        prev_start = position.character;
    }
    data
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        if let Some(root_uri) = params.root_uri.or_else(|| {
            params
                .workspace_folders
                .as_ref()
                .and_then(|folders| folders.first().map(|f| f.uri.clone()))
        }) {
            if let Ok(path) = root_uri.to_file_path() {
                *self.workspace_root.write().await = Some(path);
            }
        }

        if let Some(Value::Object(map)) = params.initialization_options {
            self.apply_settings(&map).await;
        }

        if let Err(err) = self.reload_analyzer().await {
            self.client
                .log_message(
                    MessageType::ERROR,
                    format!("Failed to load config: {err:#}"),
                )
                .await;
        }

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                // Diagnostics are pushed with publish_diagnostics(); no pull provider.
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                semantic_tokens_provider: Some(
                    SemanticTokensServerCapabilities::SemanticTokensOptions(
                        SemanticTokensOptions {
                            work_done_progress_options: WorkDoneProgressOptions::default(),
                            legend: semantic_legend(),
                            range: None,
                            full: Some(SemanticTokensFullOptions::Bool(true)),
                        },
                    ),
                ),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "Kotoba Language Server".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _params: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "Kotoba LSP initialized")
            .await;

        let context = self.context.clone();
        match tokio::task::spawn_blocking(move || context.tokenizer.initialize()).await {
            Ok(Ok(())) => {
                self.client
                    .log_message(MessageType::INFO, "Kotoba tokenizer ready")
                    .await;
                self.revalidate_all().await;
            }
            Ok(Err(err)) => {
                self.client
                    .log_message(
                        MessageType::ERROR,
                        format!("Kotoba tokenizer failed to load: {err}"),
                    )
                    .await;
            }
            Err(join_err) => {
                tracing::error!(error = %join_err, "tokenizer initialization task failed");
            }
        }
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let doc = params.text_document;
        let uri = doc.uri;
        self.documents
            .open(uri.clone(), doc.text, doc.language_id, doc.version);
        self.publish_diagnostics(uri).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        // With FULL sync, we get the complete new content
        if let Some(change) = params.content_changes.into_iter().last() {
            self.documents.update(&uri, change.text, version);
        }

        self.publish_diagnostics(uri).await;
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;
        let saved_path = uri.to_file_path().ok();
        let config_path = self.config_path.read().await.clone();
        let is_config = saved_path
            .as_ref()
            .zip(config_path.as_ref())
            .is_some_and(|(a, b)| a == b);

        if is_config {
            self.reload_and_revalidate().await;
        } else {
            self.publish_diagnostics(uri).await;
        }
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        let settings = match params.settings {
            Value::Object(mut map) => map.remove("kotoba").unwrap_or(Value::Object(map)),
            other => other,
        };
        if let Value::Object(map) = settings {
            self.apply_settings(&map).await;
            let mut inline = map.clone();
            for key in ["configPath", "onlyRules", "disableRules"] {
                inline.remove(key);
            }
            let inline_config = if inline.is_empty() {
                None
            } else {
                match serde_json::from_value::<Config>(Value::Object(inline)) {
                    Ok(config) => Some(config),
                    Err(err) => {
                        self.client
                            .log_message(
                                MessageType::ERROR,
                                format!("Ignoring invalid Kotoba settings: {err}"),
                            )
                            .await;
                        None
                    }
                }
            };
            *self.inline_config.write().await = inline_config;
        }
        self.reload_and_revalidate().await;
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        let config_path = self.config_path.read().await.clone();
        let should_reload = params.changes.iter().any(|change| match &config_path {
            Some(config_path) => change
                .uri
                .to_file_path()
                .is_ok_and(|path| &path == config_path),
            None => change.uri.path().ends_with(CONFIG_FILE),
        });
        if should_reload {
            self.reload_and_revalidate().await;
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        self.documents.close(&params.text_document.uri);
        // Clear diagnostics
        self.client
            .publish_diagnostics(params.text_document.uri, vec![], None)
            .await;
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let position = params.text_document_position_params.position;
        let uri = params.text_document_position_params.text_document.uri;
        let Some((content, tokens)) = self.document_tokens(&uri).await else {
            return Ok(None);
        };
        let index = LineIndex::new(&content);
        let offset = index.offset(kotoba_core::Position::new(position.line, position.character));
        let Some(token) = hover::token_at(&tokens, offset) else {
            return Ok(None);
        };

        let enrichment = self.enrichment.read().await.clone();
        let summary = match enrichment {
            Some(cache) if PosClass::classify(&token.pos) == PosClass::Noun => {
                cache.lookup(&token.base_form).await
            }
            _ => None,
        };

        Ok(Some(Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value: hover::hover_markdown(token, summary.as_deref()),
            }),
            range: Some(to_lsp_range(index.range((token.offset, token.end())))),
        }))
    }

    async fn semantic_tokens_full(
        &self,
        params: SemanticTokensParams,
    ) -> Result<Option<SemanticTokensResult>> {
        let Some((content, tokens)) = self.document_tokens(&params.text_document.uri).await else {
            return Ok(None);
        };
        Ok(Some(SemanticTokensResult::Tokens(SemanticTokens {
            result_id: None,
            data: encode_semantic_tokens(&content, &tokens),
        })))
    }
}

#[tokio::main]
async fn main() {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("KOTOBA_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
    tracing::info!(source = SOURCE, "language server starting");

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(Backend::new);
    Server::new(stdin, stdout, socket).serve(service).await;
}
