use std::{
    collections::{BTreeMap, HashSet},
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context};
use clap::{ArgAction, Parser};
use console::style;
use globset::{Glob, GlobSet, GlobSetBuilder};
use kotoba_core::{
    language_for_path, load_config, AnalysisContext, Analyzer, Config, DocumentDiagnostic,
    DocumentReport, RuleCode, Severity,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Kotoba CLI entry point.
#[derive(Debug, Parser)]
#[command(
    name = "kotoba",
    about = "Lint Japanese prose in documents and source comments."
)]
struct Args {
    /// Path to config file (YAML). Defaults to kotoba.yml if present.
    #[arg(long, default_value = kotoba_core::CONFIG_FILE)]
    config: PathBuf,

    /// Emit JSON output for automation.
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Strict mode: exit non-zero when any diagnostic is reported.
    #[arg(long, action = ArgAction::SetTrue)]
    strict: bool,

    /// Suppress per-file output.
    #[arg(long, action = ArgAction::SetTrue)]
    quiet: bool,

    /// Files or directories to lint.
    #[arg(value_name = "PATH", default_value = ".", num_args = 0..)]
    paths: Vec<PathBuf>,

    /// Treat every file as this editor language id instead of inferring it
    /// from the extension.
    #[arg(long, value_name = "ID")]
    language: Option<String>,

    /// Report only these rule codes (comma-separated).
    #[arg(long, value_delimiter = ',', value_name = "CODE[,CODE]")]
    only: Vec<String>,

    /// Disable rule codes (comma-separated).
    #[arg(long, value_delimiter = ',', value_name = "CODE[,CODE]")]
    disable: Vec<String>,

    /// Set config overrides (repeatable as key=value). Example: --set rules.comma_limit_max=4
    #[arg(long = "set", value_name = "KEY=VALUE", num_args = 0..)]
    sets: Vec<String>,
}

#[derive(Debug, Serialize)]
struct FileResult {
    path: String,
    language: String,
    segment_count: usize,
    code_counts: BTreeMap<RuleCode, usize>,
    diagnostics: Vec<DocumentDiagnostic>,
}

#[derive(Debug, Serialize)]
struct OutputReport {
    files: Vec<FileResult>,
    total_diagnostics: usize,
    code_counts: BTreeMap<RuleCode, usize>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("KOTOBA_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    run_lint(args)
}

fn run_lint(args: Args) -> anyhow::Result<()> {
    let mut cfg = load_config(&args.config)?;
    let config_root = match args.config.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) if args.config.exists() => dir.to_path_buf(),
        _ => env::current_dir()?,
    };
    apply_overrides(&mut cfg, &args.sets)?;
    apply_rule_filters(&mut cfg, &args.only, &args.disable);

    let context = Arc::new(AnalysisContext::new());
    context
        .tokenizer
        .initialize()
        .context("Failed to load the morphological dictionary")?;
    let mut target_languages = cfg.target_languages.clone();
    if let Some(language) = &args.language {
        if !target_languages.contains(language) {
            target_languages.push(language.clone());
        }
    }
    let file_ignore = build_ignore_set(&cfg.ignore_globs)?;
    let analyzer = Analyzer::new(
        Config {
            target_languages,
            ..cfg
        },
        context,
    );

    let mut files = collect_files(&args.paths, file_ignore.as_ref(), args.language.is_some())?;
    files.sort();

    let mut file_reports = Vec::new();
    let mut totals: BTreeMap<RuleCode, usize> = BTreeMap::new();
    let mut total_diags = 0usize;

    for path in files {
        let Some(language) = args
            .language
            .as_deref()
            .or_else(|| language_for_path(&path))
        else {
            continue;
        };
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!(path = %path.display(), "skipping non UTF-8 file");
                continue;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let report = analyzer
            .check(&content, language)
            .with_context(|| format!("Failed to analyze {}", path.display()))?;
        let rel_path = pathdiff::diff_paths(&path, &config_root).unwrap_or_else(|| path.clone());
        let rel_path_clean = rel_path.to_string_lossy().replace('\\', "/");

        total_diags += report.diagnostics.len();
        for (code, count) in &report.code_counts {
            *totals.entry(*code).or_default() += count;
        }

        if !args.quiet && !args.json {
            print_human_report(&rel_path_clean, language, &report);
        }

        file_reports.push(FileResult {
            path: rel_path_clean,
            language: language.to_string(),
            segment_count: report.segment_count,
            code_counts: report.code_counts,
            diagnostics: report.diagnostics,
        });
    }

    let file_count = file_reports.len();
    let output = OutputReport {
        files: file_reports,
        total_diagnostics: total_diags,
        code_counts: totals,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if !args.quiet {
        println!("\n{file_count} files, {total_diags} diagnostics");
        for (code, count) in &output.code_counts {
            println!("  {}: {count}", style(code).yellow());
        }
    }

    if args.strict && total_diags > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn build_ignore_set(patterns: &[String]) -> anyhow::Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern).with_context(|| format!("Invalid ignore glob `{pattern}`"))?,
        );
    }
    Ok(Some(builder.build()?))
}

fn collect_files(
    paths: &[PathBuf],
    ignore: Option<&GlobSet>,
    any_extension: bool,
) -> anyhow::Result<Vec<PathBuf>> {
    let supported = |path: &Path| any_extension || language_for_path(path).is_some();
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut walker = WalkDir::new(path).into_iter();
            while let Some(entry_res) = walker.next() {
                let entry = entry_res?;
                let entry_path = entry.path();
                if let Some(set) = ignore {
                    if set.is_match(entry_path) {
                        if entry.file_type().is_dir() {
                            walker.skip_current_dir();
                        }
                        continue;
                    }
                }
                if entry.file_type().is_file() && supported(entry_path) {
                    files.push(entry_path.to_path_buf());
                }
            }
        } else if path.is_file() {
            if ignore.is_some_and(|set| set.is_match(path)) {
                continue;
            }
            files.push(path.clone());
        } else {
            return Err(anyhow!("No such file or directory: {}", path.display()));
        }
    }
    Ok(files)
}

fn parse_codes(names: &[String]) -> HashSet<RuleCode> {
    names
        .iter()
        .filter(|name| !name.trim().is_empty())
        .filter_map(|name| match name.parse::<RuleCode>() {
            Ok(code) => Some(code),
            Err(err) => {
                tracing::warn!("{err}");
                None
            }
        })
        .collect()
}

/// `--only` keeps just the listed rules enabled; `--disable` turns rules off.
fn apply_rule_filters(cfg: &mut Config, only: &[String], disable: &[String]) {
    let only = parse_codes(only);
    if !only.is_empty() {
        for code in RuleCode::ALL {
            cfg.rules.set_enabled(code, only.contains(&code));
        }
    }
    for code in parse_codes(disable) {
        cfg.rules.set_enabled(code, false);
    }
}

fn parse_flag(val: &str) -> Option<bool> {
    match val.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn apply_overrides(cfg: &mut Config, sets: &[String]) -> anyhow::Result<()> {
    for kv in sets {
        let Some((key, val)) = kv.split_once('=') else {
            return Err(anyhow!("Override `{kv}` must look like key=value"));
        };
        let (key, val) = (key.trim(), val.trim());
        if key.is_empty() {
            continue;
        }
        let invalid = || anyhow!("Invalid value `{val}` for `{key}`");
        match key {
            "enabled" => cfg.enabled = parse_flag(val).ok_or_else(invalid)?,
            "min_japanese_ratio" => {
                cfg.min_japanese_ratio = val.parse::<f32>().map_err(|_| invalid())?;
            }
            "min_severity" => {
                cfg.min_severity = match val.to_ascii_lowercase().as_str() {
                    "error" | "1" => Severity::Error,
                    "warning" | "2" => Severity::Warning,
                    "information" | "info" | "3" => Severity::Information,
                    "hint" | "4" => Severity::Hint,
                    _ => return Err(invalid()),
                };
            }
            "target_languages" => {
                cfg.target_languages = val
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
            "rules.comma_limit_max" => {
                cfg.rules.comma_limit_max = val.parse::<usize>().map_err(|_| invalid())?;
            }
            "rules.adversative_ga_max" => {
                cfg.rules.adversative_ga_max = val.parse::<usize>().map_err(|_| invalid())?;
            }
            "rules.conjunction_repeat_max" => {
                cfg.rules.conjunction_repeat_max = val.parse::<usize>().map_err(|_| invalid())?;
            }
            other => {
                let code = other
                    .strip_prefix("rules.")
                    .and_then(|name| name.parse::<RuleCode>().ok())
                    .ok_or_else(|| anyhow!("Unknown config key `{other}`"))?;
                cfg.rules
                    .set_enabled(code, parse_flag(val).ok_or_else(invalid)?);
            }
        }
    }
    Ok(())
}

fn print_human_report(path: &str, language: &str, report: &DocumentReport) {
    println!(
        "{} ({}, {} segments)",
        style(path).bold(),
        language,
        report.segment_count
    );
    if report.diagnostics.is_empty() {
        println!("  {}", style("clean").green());
        return;
    }
    for diag in &report.diagnostics {
        println!(
            "  [{}] {}:{} {}",
            style(diag.diagnostic.code).yellow(),
            diag.range.start.line + 1,
            diag.range.start.character + 1,
            diag.diagnostic.message
        );
        if !diag.diagnostic.snippet.is_empty() {
            println!("      → {}", diag.diagnostic.snippet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_update_nested_rules() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            &[
                "rules.comma_limit_max=5".into(),
                "rules.ra_dropping=false".into(),
                "min_severity=warning".into(),
                "target_languages=markdown, latex".into(),
            ],
        )
        .unwrap();
        assert_eq!(cfg.rules.comma_limit_max, 5);
        assert!(!cfg.rules.ra_dropping);
        assert_eq!(cfg.min_severity, Severity::Warning);
        assert_eq!(cfg.target_languages, vec!["markdown", "latex"]);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        let mut cfg = Config::default();
        assert!(apply_overrides(&mut cfg, &["heading_style=title".into()]).is_err());
        assert!(apply_overrides(&mut cfg, &["rules.comma_limit_max=many".into()]).is_err());
        assert!(apply_overrides(&mut cfg, &["enabled".into()]).is_err());
    }

    #[test]
    fn only_keeps_listed_rules() {
        let mut cfg = Config::default();
        apply_rule_filters(&mut cfg, &["ra-dropping".into()], &[]);
        assert!(cfg.rules.ra_dropping);
        assert!(!cfg.rules.comma_limit);

        let mut cfg = Config::default();
        apply_rule_filters(&mut cfg, &[], &["comma-limit".into(), "nonsense".into()]);
        assert!(!cfg.rules.comma_limit);
        assert!(cfg.rules.duplicate_particle);
    }
}
