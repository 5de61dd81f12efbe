//! Configuration validation.
//!
//! Detects unknown or misspelled keys in the raw TOML document and flags
//! values that would make the gateway misbehave at runtime.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::schema::HeraldConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// "syntax", "unknown-field", "type-error" or "value"
    pub category: &'static str,
    /// Dotted path, e.g. "dispatch.message_delay_secs"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

fn known_sections() -> HashMap<&'static str, &'static [&'static str]> {
    HashMap::from([
        ("server", &["bind", "port"][..]),
        ("database", &["path"][..]),
        (
            "dispatch",
            &[
                "message_delay_secs",
                "default_cycle_delay_secs",
                "max_idle_cycles",
                "shutdown_grace_secs",
            ][..],
        ),
        (
            "sidecar",
            &["url", "request_timeout_secs", "connect_retries"][..],
        ),
        ("metrics", &["enabled"][..]),
    ])
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within edit distance 3, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

fn unknown_field(path: String, key: &str, candidates: &[&str]) -> Diagnostic {
    let message = match suggest(key, candidates) {
        Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
        None => "unknown field".to_string(),
    };
    Diagnostic::new(Severity::Error, "unknown-field", path, message)
}

/// Validate a config file at `path`, or the discovered config file when
/// `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path
        .map(Path::to_path_buf)
        .or_else(crate::loader::find_config_file);

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "syntax",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let is_toml = actual_path
        .extension()
        .and_then(|e| e.to_str())
        .is_none_or(|e| e == "toml");

    let mut result = if is_toml {
        match std::fs::read_to_string(&actual_path) {
            Ok(raw) => validate_toml_str(&crate::env_subst::substitute_env(&raw)),
            Err(e) => ValidationResult {
                diagnostics: vec![Diagnostic::new(
                    Severity::Error,
                    "syntax",
                    "",
                    format!("failed to read config: {e}"),
                )],
                config_path: None,
            },
        }
    } else {
        match crate::loader::load_config(&actual_path) {
            Ok(cfg) => ValidationResult {
                diagnostics: check_values(&cfg),
                config_path: None,
            },
            Err(e) => ValidationResult {
                diagnostics: vec![Diagnostic::new(
                    Severity::Error,
                    "syntax",
                    "",
                    e.to_string(),
                )],
                config_path: None,
            },
        }
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate raw TOML text: syntax, unknown keys, then value checks.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("TOML syntax error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    let sections = known_sections();
    let section_names: Vec<&str> = sections.keys().copied().collect();
    if let Some(table) = value.as_table() {
        for (key, child) in table {
            let Some(fields) = sections.get(key.as_str()) else {
                diagnostics.push(unknown_field(key.clone(), key, &section_names));
                continue;
            };
            if let Some(child_table) = child.as_table() {
                for field in child_table.keys() {
                    if !fields.contains(&field.as_str()) {
                        diagnostics.push(unknown_field(format!("{key}.{field}"), field, fields));
                    }
                }
            }
        }
    }

    match value.try_into::<HeraldConfig>() {
        Ok(cfg) => diagnostics.extend(check_values(&cfg)),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            e.to_string(),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Semantic checks on an already-parsed config.
#[must_use]
pub fn check_values(cfg: &HeraldConfig) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    if cfg.server.port == 0 {
        out.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "server.port",
            "port 0 binds a random port",
        ));
    }

    let delays = [
        ("dispatch.message_delay_secs", cfg.dispatch.message_delay_secs),
        (
            "dispatch.default_cycle_delay_secs",
            cfg.dispatch.default_cycle_delay_secs,
        ),
    ];
    for (path, secs) in delays {
        if !secs.is_finite() || secs < 0.0 {
            out.push(Diagnostic::new(
                Severity::Error,
                "value",
                path,
                format!("delay must be a non-negative number of seconds, got {secs}"),
            ));
        }
    }

    if cfg.dispatch.max_idle_cycles == Some(0) {
        out.push(Diagnostic::new(
            Severity::Error,
            "value",
            "dispatch.max_idle_cycles",
            "must be at least 1 (omit to wait indefinitely)",
        ));
    }

    let url = cfg.sidecar.url.trim();
    if url.is_empty() {
        out.push(Diagnostic::new(
            Severity::Error,
            "value",
            "sidecar.url",
            "sidecar url is empty",
        ));
    } else if !url.starts_with("ws://") && !url.starts_with("wss://") {
        out.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "sidecar.url",
            format!("expected a ws:// or wss:// url, got {url}"),
        ));
    }

    out
}
