//! Pattern definitions and the loader that vets them before compilation.
//!
//! Every pattern is screened for shapes that cause catastrophic backtracking in
//! backtracking engines: nested quantifiers, quantified alternations whose
//! branches overlap, repetition bounds above [`MAX_REPETITION`], and sources
//! longer than [`MAX_PATTERN_LEN`]. Offending patterns are rejected, not
//! compiled, so pattern packs stay portable to hosts with weaker engines.

use std::path::Path;
use std::sync::LazyLock;

use agent_primitives::Severity;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{SentinelError, SentinelResult};

/// Longest accepted pattern source.
pub const MAX_PATTERN_LEN: usize = 500;
/// Largest accepted `{n}` / `{n,m}` bound.
pub const MAX_REPETITION: u32 = 100;

const COMPILED_SIZE_LIMIT: usize = 1 << 20;

static QUANTIFIED_ALTERNATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\((?:\?:)?([^()]*\|[^()]*)\)(?:[+*]|\{\d+,?\d*\})")
        .expect("alternation screen is valid")
});

static REPETITION_BOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\d+)(?:,(\d*))?\}").expect("bound screen is valid"));

/// Serialized form of a detection pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternDefinition {
    /// Stable identifier reported in verdicts.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Grouping such as `secrets` or `injection`.
    pub category: String,
    /// Severity of a match.
    pub severity: Severity,
    /// Regular expression source.
    pub pattern: String,
    /// Disabled patterns are loaded but never run.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Match case-insensitively.
    #[serde(default)]
    pub case_insensitive: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl PatternDefinition {
    /// Creates an enabled, case-sensitive definition.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        severity: Severity,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            severity,
            pattern: pattern.into(),
            enabled: true,
            case_insensitive: false,
        }
    }

    /// Marks the definition as case-insensitive.
    #[must_use]
    pub fn ignore_case(mut self) -> Self {
        self.case_insensitive = true;
        self
    }
}

/// A definition that passed screening, with its compiled regex.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    definition: PatternDefinition,
    regex: Regex,
}

impl CompiledPattern {
    /// Source definition.
    #[must_use]
    pub fn definition(&self) -> &PatternDefinition {
        &self.definition
    }

    /// Compiled expression.
    #[must_use]
    pub fn regex(&self) -> &Regex {
        &self.regex
    }
}

/// Checks a pattern source for backtracking hazards.
///
/// # Errors
///
/// Returns a description of the first hazard found.
pub fn screen(pattern: &str) -> Result<(), String> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(format!(
            "pattern length {} exceeds {MAX_PATTERN_LEN}",
            pattern.len()
        ));
    }

    for caps in REPETITION_BOUND.captures_iter(pattern) {
        let bounds = [caps.get(1), caps.get(2)];
        for bound in bounds.into_iter().flatten() {
            if bound.as_str().is_empty() {
                continue;
            }
            let value: u64 = bound.as_str().parse().unwrap_or(u64::MAX);
            if value > u64::from(MAX_REPETITION) {
                return Err(format!("repetition bound {value} exceeds {MAX_REPETITION}"));
            }
        }
    }

    if let Some(found) = nested_quantifier(pattern) {
        return Err(format!("nested quantifier in `{found}`"));
    }

    for caps in QUANTIFIED_ALTERNATION.captures_iter(pattern) {
        let branches: Vec<&str> = caps[1].split('|').collect();
        for (i, left) in branches.iter().enumerate() {
            for right in &branches[i + 1..] {
                let overlapping = left.is_empty()
                    || right.is_empty()
                    || left.starts_with(right)
                    || right.starts_with(left);
                if overlapping {
                    return Err(format!("overlapping alternation `{left}` / `{right}`"));
                }
            }
        }
    }

    Ok(())
}

/// Finds a quantified group whose body, at any depth, contains a quantifier.
///
/// Only `+`, `*` and `{n,m}` count; `?` cannot repeat and is ignored.
/// Escapes and character classes are skipped.
fn nested_quantifier(pattern: &str) -> Option<&str> {
    let chars: Vec<(usize, char)> = pattern.char_indices().collect();
    let offset_of = |index: usize| chars.get(index).map_or(pattern.len(), |&(offset, _)| offset);
    // Open groups: start offset, and whether the body holds a quantifier.
    let mut groups: Vec<(usize, bool)> = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (offset, c) = chars[i];
        match c {
            '\\' => i += 2,
            '[' => i = class_end(&chars, i),
            '(' => {
                groups.push((offset, false));
                i += 1;
            }
            ')' => {
                let quantifier = quantifier_len(&chars[i + 1..]);
                let Some((start, inner)) = groups.pop() else {
                    i += 1 + quantifier.unwrap_or(0);
                    continue;
                };
                if let (true, Some(len)) = (inner, quantifier) {
                    return Some(&pattern[start..offset_of(i + 1 + len)]);
                }
                if let Some(parent) = groups.last_mut() {
                    parent.1 |= inner || quantifier.is_some();
                }
                i += 1 + quantifier.unwrap_or(0);
            }
            _ => match quantifier_len(&chars[i..]) {
                Some(len) => {
                    if let Some(group) = groups.last_mut() {
                        group.1 = true;
                    }
                    i += len;
                }
                None => i += 1,
            },
        }
    }
    None
}

/// Length of the `+`, `*` or `{n}` / `{n,}` / `{n,m}` quantifier at the
/// start of `rest`.
fn quantifier_len(rest: &[(usize, char)]) -> Option<usize> {
    match rest.first()?.1 {
        '+' | '*' => Some(1),
        '{' => {
            let mut len = 1;
            let mut digits = 0;
            while rest.get(len).is_some_and(|&(_, c)| c.is_ascii_digit()) {
                len += 1;
                digits += 1;
            }
            if digits == 0 {
                return None;
            }
            if rest.get(len).is_some_and(|&(_, c)| c == ',') {
                len += 1;
                while rest.get(len).is_some_and(|&(_, c)| c.is_ascii_digit()) {
                    len += 1;
                }
            }
            rest.get(len)
                .is_some_and(|&(_, c)| c == '}')
                .then_some(len + 1)
        }
        _ => None,
    }
}

/// Index just past the character class opening at `start`.
fn class_end(chars: &[(usize, char)], start: usize) -> usize {
    let mut i = start + 1;
    if chars.get(i).is_some_and(|&(_, c)| c == '^') {
        i += 1;
    }
    if chars.get(i).is_some_and(|&(_, c)| c == ']') {
        i += 1;
    }
    while let Some(&(_, c)) = chars.get(i) {
        match c {
            '\\' => i += 2,
            ']' => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Validates and compiles pattern definitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternLoader;

impl PatternLoader {
    /// Screens and compiles one definition.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::PatternRejected`] when screening or
    /// compilation fails.
    pub fn compile(definition: PatternDefinition) -> SentinelResult<CompiledPattern> {
        screen(&definition.pattern)
            .map_err(|reason| SentinelError::rejected(&definition.id, reason))?;
        let regex = RegexBuilder::new(&definition.pattern)
            .case_insensitive(definition.case_insensitive)
            .size_limit(COMPILED_SIZE_LIMIT)
            .build()
            .map_err(|err| SentinelError::rejected(&definition.id, err.to_string()))?;
        Ok(CompiledPattern { definition, regex })
    }

    /// Compiles every acceptable definition, logging and skipping the rest.
    #[must_use]
    pub fn compile_all(definitions: Vec<PatternDefinition>) -> Vec<CompiledPattern> {
        definitions
            .into_iter()
            .filter_map(|definition| match Self::compile(definition) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    warn!(error = %err, "pattern skipped");
                    None
                }
            })
            .collect()
    }

    /// Parses a JSON array of definitions.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::Serialization`] for malformed documents.
    /// Individual rejected patterns are skipped, not fatal.
    pub fn from_json_str(json: &str) -> SentinelResult<Vec<CompiledPattern>> {
        let definitions: Vec<PatternDefinition> = serde_json::from_str(json)?;
        Ok(Self::compile_all(definitions))
    }

    /// Loads every `*.json` file in `dir`, in file-name order, after the
    /// built-in set.
    ///
    /// # Errors
    ///
    /// Returns [`SentinelError::Io`] when the directory cannot be listed.
    pub async fn load_dir(dir: &Path) -> SentinelResult<Vec<CompiledPattern>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();

        let mut patterns = Self::builtin();
        for file in files {
            let json = tokio::fs::read_to_string(&file).await?;
            match Self::from_json_str(&json) {
                Ok(mut loaded) => {
                    debug!(file = %file.display(), count = loaded.len(), "patterns loaded");
                    patterns.append(&mut loaded);
                }
                Err(err) => warn!(file = %file.display(), error = %err, "pattern file skipped"),
            }
        }
        Ok(patterns)
    }

    /// Built-in pattern set.
    #[must_use]
    pub fn builtin() -> Vec<CompiledPattern> {
        Self::compile_all(builtin_definitions())
    }
}

fn builtin_definitions() -> Vec<PatternDefinition> {
    vec![
        PatternDefinition::new(
            "secret.private_key",
            "Embedded private key",
            "secrets",
            Severity::Critical,
            r"-----BEGIN (?:RSA |EC |OPENSSH )?PRIVATE KEY-----",
        ),
        PatternDefinition::new(
            "secret.aws_access_key",
            "AWS access key id",
            "secrets",
            Severity::Critical,
            r"AKIA[A-Z0-9]{16}",
        ),
        PatternDefinition::new(
            "secret.hardcoded_credential",
            "Hard-coded credential",
            "secrets",
            Severity::High,
            r#"(?:api[_-]?key|secret|password|passwd|token)\s*[:=]\s*['"][^'"\s]{8,}['"]"#,
        )
        .ignore_case(),
        PatternDefinition::new(
            "injection.eval",
            "Dynamic code evaluation",
            "injection",
            Severity::High,
            r"\beval\s*\(",
        ),
        PatternDefinition::new(
            "injection.sql_concat",
            "SQL built by string concatenation",
            "injection",
            Severity::High,
            r#"(?:select|insert|update|delete)\s[^;]*['"]\s*\+\s*\w"#,
        )
        .ignore_case(),
        PatternDefinition::new(
            "injection.shell_exec",
            "Shell command execution",
            "injection",
            Severity::Medium,
            r"\b(?:child_process|subprocess|os\.system|exec(?:Sync)?)\s*[.(]",
        ),
        PatternDefinition::new(
            "xss.inner_html",
            "Raw HTML assignment",
            "injection",
            Severity::Medium,
            r"\.innerHTML\s*=|dangerouslySetInnerHTML",
        ),
        PatternDefinition::new(
            "tls.verification_disabled",
            "TLS verification disabled",
            "transport",
            Severity::High,
            r"rejectUnauthorized\s*:\s*false|verify\s*=\s*False|danger_accept_invalid_certs\(true\)",
        ),
        PatternDefinition::new(
            "hygiene.debug_output",
            "Debug output left in code",
            "hygiene",
            Severity::Low,
            r"\bconsole\.log\(|\bdbg!\(|\bprint\(",
        ),
        PatternDefinition::new(
            "hygiene.todo",
            "Unresolved marker",
            "hygiene",
            Severity::Low,
            r"\b(?:TODO|FIXME|XXX)\b",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_backtracking_shapes() {
        assert!(screen(r"(a+)+$").unwrap_err().contains("nested"));
        assert!(screen(r"(\w+\s?)*x").is_err());
        assert_eq!(screen(r"x((a+)b)+y").unwrap_err(), "nested quantifier in `((a+)b)+`");
        assert!(screen(r"(?:(?:\d{1,3}\.)x)*").unwrap_err().contains("nested"));
        assert!(screen(r"((?:ab)*c){2,5}").is_err());
        assert!(screen(r"(?:ab|a)*c").unwrap_err().contains("overlapping"));
        assert!(screen(r"(a|a)+").is_err());
        assert!(screen(r"a{1,101}").unwrap_err().contains("bound"));
        assert!(screen(r"x{500}").is_err());
        assert!(screen(&"a".repeat(MAX_PATTERN_LEN + 1)).unwrap_err().contains("length"));
    }

    #[test]
    fn accepts_ordinary_patterns() {
        assert!(screen(r"AKIA[A-Z0-9]{16}").is_ok());
        assert!(screen(r"(?:cat|dog)s?").is_ok());
        assert!(screen(r"(?:foo|bar)+").is_ok());
        assert!(screen(r"a{2,}").is_ok());
        assert!(screen(r"((a+)b)?c").is_ok());
        assert!(screen(r"(?:[+*]x)+").is_ok());
        assert!(screen(r"(?:\+\d)+").is_ok());
        assert!(screen(r"(?:a\{2\})+").is_ok());
    }

    #[test]
    fn builtin_patterns_all_pass_screening() {
        assert_eq!(PatternLoader::builtin().len(), builtin_definitions().len());
    }

    #[test]
    fn json_loading_skips_rejected_patterns() {
        let json = r#"[
            {"id": "ok", "name": "ok", "category": "test", "severity": "low", "pattern": "needle"},
            {"id": "bad", "name": "bad", "category": "test", "severity": "high", "pattern": "(a+)+"},
            {"id": "off", "name": "off", "category": "test", "severity": "low", "pattern": "x", "enabled": false}
        ]"#;
        let loaded = PatternLoader::from_json_str(json).unwrap();
        let ids: Vec<_> = loaded.iter().map(|p| p.definition().id.as_str()).collect();
        assert_eq!(ids, ["ok", "off"]);
        assert!(!loaded[1].definition().enabled);
    }

    #[test]
    fn compile_reports_the_pattern_id() {
        let err = PatternLoader::compile(PatternDefinition::new(
            "broken",
            "broken",
            "test",
            Severity::Low,
            "(unclosed",
        ))
        .unwrap_err();
        assert!(matches!(err, SentinelError::PatternRejected { ref id, .. } if id == "broken"));
    }
}
